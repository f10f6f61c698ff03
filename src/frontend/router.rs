//! Per-request routing.
//!
//! Picks the next live backend for each inbound request and forwards it
//! through the retry handler, or answers 503 when nothing is alive.

use crate::backend::BackendPool;
use crate::metrics::{MetricsCollector, NO_BACKEND};
use crate::proxy::{ClientAddr, Forwarder, ProxyBody, RetryContext, RetryHandler};
use crate::util::RequestId;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::{Request, Response, StatusCode};
use std::error::Error as StdError;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Default cap on a buffered inbound request body (10 MiB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Routes inbound requests to backends from a shared pool.
pub struct RequestRouter<F> {
    pool: Arc<BackendPool<F>>,
    retry: RetryHandler,
    metrics: MetricsCollector,
    max_body_size: usize,
}

impl<F: Forwarder> RequestRouter<F> {
    /// Create a new request router.
    pub fn new(pool: Arc<BackendPool<F>>, retry: RetryHandler, metrics: MetricsCollector) -> Self {
        Self {
            pool,
            retry,
            metrics,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
        }
    }

    /// Set the largest request body, in bytes, accepted for forwarding.
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.max_body_size = max_body_size;
        self
    }

    /// The backend pool requests are routed across.
    pub fn pool(&self) -> &Arc<BackendPool<F>> {
        &self.pool
    }

    /// Buffer an inbound request and route it.
    ///
    /// The body is read fully up front so it can be re-sent on retry. Bodies
    /// larger than the configured limit are answered with 413.
    pub async fn handle<B>(&self, req: Request<B>, client_addr: SocketAddr) -> Response<ProxyBody>
    where
        B: Body<Data = Bytes>,
        B::Error: Into<Box<dyn StdError + Send + Sync>>,
    {
        let request_id = RequestId::short();
        let (mut parts, body) = req.into_parts();

        let body = match Limited::new(body, self.max_body_size).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) if e.is::<LengthLimitError>() => {
                warn!(
                    request_id = %request_id,
                    client = %client_addr,
                    limit = self.max_body_size,
                    "request body too large"
                );
                return error_response(StatusCode::PAYLOAD_TOO_LARGE, "Request body too large");
            }
            Err(e) => {
                warn!(
                    request_id = %request_id,
                    client = %client_addr,
                    error = %e,
                    "failed to read request body"
                );
                return error_response(StatusCode::BAD_REQUEST, "Failed to read request body");
            }
        };

        parts.extensions.insert(ClientAddr(client_addr));
        self.route(Request::from_parts(parts, body), &request_id).await
    }

    /// Route a buffered request to the next live backend.
    pub async fn route(&self, req: Request<Bytes>, request_id: &RequestId) -> Response<ProxyBody> {
        let start = Instant::now();

        let Some(backend) = self.pool.select() else {
            warn!(
                request_id = %request_id,
                method = %req.method(),
                uri = %req.uri(),
                "no backend available"
            );
            self.metrics.record_request(NO_BACKEND, 503, start.elapsed());
            return error_response(StatusCode::SERVICE_UNAVAILABLE, "Service not available");
        };

        debug!(request_id = %request_id, backend = %backend.address(), "selected backend");

        let mut ctx = RetryContext::new();
        match self.retry.forward(&self.pool, &backend, &req, &mut ctx).await {
            Ok(response) => {
                let status = response.status().as_u16();
                let duration = start.elapsed();
                self.metrics.record_request(backend.address(), status, duration);

                info!(
                    request_id = %request_id,
                    method = %req.method(),
                    uri = %req.uri(),
                    backend = %backend.address(),
                    status,
                    retries = ctx.retries(),
                    duration_ms = duration.as_millis(),
                    "proxied request completed"
                );

                response
            }
            Err(e) => {
                let duration = start.elapsed();
                self.metrics.record_request(backend.address(), 503, duration);

                error!(
                    request_id = %request_id,
                    backend = %backend.address(),
                    retries = ctx.retries(),
                    error = %e,
                    "backend failed after retries"
                );

                error_response(StatusCode::SERVICE_UNAVAILABLE, "Service not available")
            }
        }
    }
}

/// Create an error response.
pub fn error_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
    let body = Full::new(Bytes::from(format!("{}: {}\n", status, message)))
        .map_err(|never| match never {})
        .boxed();

    let mut response = Response::new(body);
    *response.status_mut() = status;
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("text/plain"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{RetryPolicy, TransportError};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Answers with its own name, or fails every attempt.
    struct NamedForwarder {
        name: String,
        broken: bool,
        seen: Mutex<Vec<(Bytes, Option<ClientAddr>)>>,
    }

    impl Forwarder for NamedForwarder {
        async fn forward(
            &self,
            req: &Request<Bytes>,
        ) -> Result<Response<ProxyBody>, TransportError> {
            let client = req.extensions().get::<ClientAddr>().copied();
            self.seen.lock().unwrap().push((req.body().clone(), client));
            if self.broken {
                return Err(TransportError::ConnectTimeout {
                    target: self.name.clone(),
                    timeout: Duration::from_secs(1),
                });
            }
            let body = Full::new(Bytes::from(self.name.clone()))
                .map_err(|never| match never {})
                .boxed();
            Ok(Response::new(body))
        }
    }

    fn router(addresses: &[&str], broken: &[&str]) -> RequestRouter<NamedForwarder> {
        let pool = BackendPool::from_addresses(addresses.iter().copied(), |uri| NamedForwarder {
            name: uri.authority().unwrap().to_string(),
            broken: broken.iter().any(|b| uri.authority().unwrap() == *b),
            seen: Mutex::new(Vec::new()),
        })
        .unwrap();

        let policy = RetryPolicy {
            max_retries: 5,
            delay: Duration::from_millis(1),
        };
        let metrics = MetricsCollector::new();
        RequestRouter::new(Arc::new(pool), RetryHandler::new(policy, metrics.clone()), metrics)
    }

    fn request() -> Request<Bytes> {
        Request::builder().uri("/hello").body(Bytes::new()).unwrap()
    }

    async fn body_of(response: Response<ProxyBody>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_routes_round_robin() {
        let router = router(&["http://a:1", "http://b:2"], &[]);
        let id = RequestId::short();

        let first = body_of(router.route(request(), &id).await).await;
        let second = body_of(router.route(request(), &id).await).await;
        let third = body_of(router.route(request(), &id).await).await;

        assert_eq!(first, "a:1");
        assert_eq!(second, "b:2");
        assert_eq!(third, "a:1");
    }

    #[tokio::test]
    async fn test_skips_dead_backend() {
        let router = router(&["http://a:1", "http://b:2", "http://c:3"], &[]);
        router.pool().set_backend_status("http://b:2", false);
        let id = RequestId::short();

        for _ in 0..5 {
            let body = body_of(router.route(request(), &id).await).await;
            assert_ne!(body, "b:2");
        }
    }

    #[tokio::test]
    async fn test_no_backend_returns_503() {
        let router = router(&["http://a:1"], &[]);
        router.pool().set_backend_status("http://a:1", false);

        let response = router.route(request(), &RequestId::short()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(router.pool().backends()[0].forwarder().seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failing_backend_demoted_then_failover() {
        let router = router(&["http://a:1", "http://b:2"], &["a:1"]);
        let id = RequestId::short();

        // First request lands on the broken backend and exhausts its retries
        let response = router.route(request(), &id).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        let broken = &router.pool().backends()[0];
        assert_eq!(broken.forwarder().seen.lock().unwrap().len(), 6);
        assert!(!broken.is_alive());

        // Later requests only see the healthy backend
        for _ in 0..3 {
            let response = router.route(request(), &id).await;
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(body_of(response).await, "b:2");
        }
    }

    #[tokio::test]
    async fn test_handle_buffers_body_and_tags_client() {
        let router = router(&["http://a:1"], &[]);
        let client: SocketAddr = "192.168.1.100:12345".parse().unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/submit")
            .body(Full::new(Bytes::from_static(b"payload")))
            .unwrap();

        let response = router.handle(req, client).await;
        assert_eq!(response.status(), StatusCode::OK);

        let seen = router.pool().backends()[0].forwarder().seen.lock().unwrap();
        assert_eq!(seen[0].0.as_ref(), b"payload");
        assert_eq!(seen[0].1, Some(ClientAddr(client)));
    }

    #[tokio::test]
    async fn test_oversized_body_rejected() {
        let router = router(&["http://a:1"], &[]).with_max_body_size(4);
        let client: SocketAddr = "192.168.1.100:12345".parse().unwrap();
        let req = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Full::new(Bytes::from_static(b"too large")))
            .unwrap();

        let response = router.handle(req, client).await;
        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(router.pool().backends()[0].forwarder().seen.lock().unwrap().is_empty());

        // A body at the limit still goes through
        let req = Request::builder()
            .method("POST")
            .uri("/upload")
            .body(Full::new(Bytes::from_static(b"tiny")))
            .unwrap();
        let response = router.handle(req, client).await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[test]
    fn test_error_response() {
        let resp = error_response(StatusCode::SERVICE_UNAVAILABLE, "test error");
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
