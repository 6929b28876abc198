use std::sync::Arc;

use pool_outbound::Outbound;
use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument};

use crate::mixed;

const MAX_CONCURRENT_CONNS: usize = 512;

#[instrument(skip(outbound), fields(local_port, outbound = outbound.name()))]
pub(crate) async fn accept_loop(local_port: u16, outbound: Arc<Outbound>) -> anyhow::Result<()> {
    let listener = match TcpListener::bind(("0.0.0.0", local_port)).await {
        Ok(l) => {
            info!(target: "pool::listener", local_port, "bound mixed inbound");
            l
        }
        Err(e) => {
            error!(target: "pool::listener", local_port, error = ?e, "failed to bind mixed inbound");
            return Err(e.into());
        }
    };

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_CONNS));

    loop {
        let (stream, addr) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                error!(target: "pool::listener", local_port, error = ?e, "accept failed");
                continue;
            }
        };

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(e) => {
                error!(target: "pool::listener", local_port, error = ?e, "semaphore closed");
                return Err(e.into());
            }
        };

        let outbound = outbound.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = mixed::serve(stream, outbound).await {
                debug!(target: "pool::listener", local_port, client = %addr, error = ?e, "tunnel ended with error");
            }
        });
    }
}
