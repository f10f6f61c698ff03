//! Prometheus metrics HTTP server.

use crate::metrics::MetricsCollector;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Serves the collector's registry in the Prometheus text format.
pub struct MetricsServer {
    listener: TcpListener,
    path: Arc<str>,
    collector: MetricsCollector,
}

impl MetricsServer {
    /// Bind the metrics server.
    pub async fn bind(
        address: SocketAddr,
        path: &str,
        collector: MetricsCollector,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        info!(address = %listener.local_addr()?, path = %path, "metrics server bound");

        Ok(Self {
            listener,
            path: Arc::from(path),
            collector,
        })
    }

    /// Serve until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let collector = self.collector.clone();
                            let path = Arc::clone(&self.path);

                            tokio::spawn(async move {
                                let service = service_fn(move |req: Request<Incoming>| {
                                    let collector = collector.clone();
                                    let path = Arc::clone(&path);
                                    async move { handle_request(req, &collector, &path) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(TokioIo::new(stream), service)
                                    .await
                                {
                                    debug!(error = %e, "metrics connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept metrics connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("metrics server shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle an incoming metrics request.
fn handle_request<B>(
    req: Request<B>,
    collector: &MetricsCollector,
    metrics_path: &str,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET {
        return Ok(text_response(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed\n".into()));
    }

    if req.uri().path() != metrics_path {
        return Ok(text_response(StatusCode::NOT_FOUND, "Not found\n".into()));
    }

    match collector.encode() {
        Ok(buffer) => {
            let mut response = text_response(StatusCode::OK, buffer);
            response.headers_mut().insert(
                hyper::header::CONTENT_TYPE,
                hyper::header::HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
            );
            Ok(response)
        }
        Err(e) => {
            error!(error = %e, "failed to encode metrics");
            Ok(text_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to encode metrics\n".into(),
            ))
        }
    }
}

fn text_response(status: StatusCode, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
