//! Frontend listener implementation.
//!
//! Accepts incoming connections and serves HTTP/1.1 on each, routing every
//! request through the [`RequestRouter`].

use crate::frontend::RequestRouter;
use crate::proxy::Forwarder;
use hyper::Request;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Frontend listener that accepts and handles connections.
pub struct FrontendListener<F> {
    /// Router shared by all connections.
    router: Arc<RequestRouter<F>>,
    /// TCP listener.
    listener: TcpListener,
}

impl<F: Forwarder> FrontendListener<F> {
    /// Bind a new frontend listener.
    pub async fn bind(listen: SocketAddr, router: Arc<RequestRouter<F>>) -> std::io::Result<Self> {
        let listener = TcpListener::bind(listen).await?;

        info!(
            listen = %listener.local_addr()?,
            backends = router.pool().len(),
            "load balancer listening"
        );

        Ok(Self { router, listener })
    }

    /// The bound address.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the listener, accepting connections until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("frontend listener shutting down");
                    break;
                }
            }
        }
    }

    /// Serve one client connection on its own task.
    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let router = Arc::clone(&self.router);

        tokio::spawn(async move {
            let start_time = Instant::now();

            let service = service_fn(move |req: Request<Incoming>| {
                let router = Arc::clone(&router);
                async move { Ok::<_, Infallible>(router.handle(req, client_addr).await) }
            });

            let result = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(TokioIo::new(stream), service)
                .await;

            let duration = start_time.elapsed();
            match result {
                Ok(()) => debug!(
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    "connection completed"
                ),
                Err(e) => warn!(
                    client = %client_addr,
                    duration_ms = duration.as_millis(),
                    error = %e,
                    "connection handling failed"
                ),
            }
        });
    }
}
