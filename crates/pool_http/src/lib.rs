mod auth;
mod routes;

use std::sync::Arc;

use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use pool_registry::Registry;
use tokio::net::TcpListener;
use tracing::{error, info};

pub use routes::AppState;

/// Binds `addr` and serves the control-plane HTTP surface (component J)
/// forever. Each accepted connection is handled on its own task with a
/// plain HTTP/1.1 connection — the control API has no need for HTTP/2 or
/// TLS of its own.
pub async fn serve(addr: &str, registry: Arc<Registry>, secret: String) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(target: "pool::http", %addr, "control API listening");

    let state = Arc::new(AppState { registry, secret });

    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(target: "pool::http", error = ?e, "accept failed");
                continue;
            }
        };

        let state = state.clone();
        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let state = state.clone();
                async move { routes::handle(state, req).await }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                error!(target: "pool::http", client = %peer, error = ?e, "connection error");
            }
        });
    }
}
