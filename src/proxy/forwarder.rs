//! Forwarding collaborator.
//!
//! A [`Forwarder`] relays one buffered request to the backend it is bound to
//! and returns the backend's response. Only transport failures are errors;
//! any HTTP status the backend answers with is a successful forward.

use bytes::Bytes;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::header::{self, HeaderMap, HeaderName, HeaderValue};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Response body type used across the proxy.
pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

/// Address of the client that sent the inbound request.
///
/// Stored in the request extensions by the listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientAddr(pub SocketAddr);

/// Transport-level forwarding failure.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connect to {target} timed out after {timeout:?}")]
    ConnectTimeout { target: String, timeout: Duration },

    #[error("backend handshake failed: {0}")]
    Handshake(#[source] hyper::Error),

    #[error("failed to send request to backend: {0}")]
    Send(#[source] hyper::Error),

    #[error("failed to build backend request: {0}")]
    Request(#[from] hyper::http::Error),
}

/// Relays a request to a single backend.
pub trait Forwarder: Send + Sync + 'static {
    /// Forward `req` and return the backend's response.
    ///
    /// The request is borrowed so that it can be re-issued on retry.
    fn forward(
        &self,
        req: &Request<Bytes>,
    ) -> impl Future<Output = Result<Response<ProxyBody>, TransportError>> + Send;
}

/// HTTP/1.1 forwarder for a single backend.
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    target: Uri,
    connect_timeout: Duration,
}

impl HttpForwarder {
    /// Create a forwarder for `target` (an `http://host:port[/base]` URI).
    pub fn new(target: Uri, connect_timeout: Duration) -> Self {
        Self {
            target,
            connect_timeout,
        }
    }

    fn connect_target(&self) -> String {
        let host = self.target.host().unwrap_or_default();
        let port = self.target.port_u16().unwrap_or(80);
        format!("{}:{}", host, port)
    }
}

impl Forwarder for HttpForwarder {
    async fn forward(&self, req: &Request<Bytes>) -> Result<Response<ProxyBody>, TransportError> {
        let outbound = build_outbound_request(&self.target, req)?;
        let connect_target = self.connect_target();

        let connect = TcpStream::connect(&connect_target);
        let stream = match timeout(self.connect_timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(TransportError::Connect {
                    target: connect_target,
                    source,
                });
            }
            Err(_) => {
                return Err(TransportError::ConnectTimeout {
                    target: connect_target,
                    timeout: self.connect_timeout,
                });
            }
        };
        let _ = stream.set_nodelay(true);

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(TransportError::Handshake)?;

        // Spawn connection driver
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                warn!(error = %e, "backend connection error");
            }
        });

        let response = sender
            .send_request(outbound)
            .await
            .map_err(TransportError::Send)?;

        let (mut parts, body) = response.into_parts();
        remove_hop_by_hop_headers(&mut parts.headers);

        debug!(status = parts.status.as_u16(), target = %self.target, "backend responded");

        Ok(Response::from_parts(parts, body.boxed()))
    }
}

/// Build the request sent to the backend from the buffered inbound request.
fn build_outbound_request(
    target: &Uri,
    req: &Request<Bytes>,
) -> Result<Request<Full<Bytes>>, TransportError> {
    let path = join_paths(target.path(), req.uri().path());
    let path_and_query = match (target.query(), req.uri().query()) {
        (Some(a), Some(b)) => format!("{}?{}&{}", path, a, b),
        (Some(q), None) | (None, Some(q)) => format!("{}?{}", path, q),
        (None, None) => path,
    };

    let mut builder = Request::builder()
        .method(req.method().clone())
        .uri(path_and_query)
        .version(hyper::Version::HTTP_11);

    if let Some(headers) = builder.headers_mut() {
        headers.extend(req.headers().iter().map(|(k, v)| (k.clone(), v.clone())));
        remove_hop_by_hop_headers(headers);

        if !headers.contains_key(header::HOST) {
            if let Some(authority) = target.authority() {
                if let Ok(value) = HeaderValue::from_str(authority.as_str()) {
                    headers.insert(header::HOST, value);
                }
            }
        }

        if let Some(ClientAddr(client)) = req.extensions().get::<ClientAddr>() {
            append_forwarded_for(headers, client.ip().to_string());
        }
    }

    Ok(builder.body(Full::new(req.body().clone()))?)
}

/// Join the backend base path and the request path with a single slash.
fn join_paths(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

fn append_forwarded_for(headers: &mut HeaderMap, client_ip: String) {
    let forwarded_for = HeaderName::from_static("x-forwarded-for");
    let value = match headers.get(&forwarded_for).and_then(|v| v.to_str().ok()) {
        Some(prior) => format!("{}, {}", prior, client_ip),
        None => client_ip,
    };

    if let Ok(value) = HeaderValue::from_str(&value) {
        headers.insert(forwarded_for, value);
    }
}

/// Strip hop-by-hop headers, including any named in `Connection`.
fn remove_hop_by_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in named {
        headers.remove(name);
    }

    for name in [
        header::CONNECTION,
        HeaderName::from_static("proxy-connection"),
        HeaderName::from_static("keep-alive"),
        header::PROXY_AUTHENTICATE,
        header::PROXY_AUTHORIZATION,
        header::TE,
        header::TRAILER,
        header::TRANSFER_ENCODING,
        header::UPGRADE,
    ] {
        headers.remove(name);
    }
}
