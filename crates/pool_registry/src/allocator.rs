use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use rand::Rng;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::debug;

const DIAL_PROBE_TIMEOUT: Duration = Duration::from_secs(1);

/// Assigns each proxy a unique local TCP port (component D). Combines
/// registry-level uniqueness (the `ports` map) with OS-level availability,
/// probed by dialing — a successful dial means the port is already taken.
pub struct PortAllocator {
    ports: Arc<DashMap<u16, String>>,
    start_port: u16,
    claim_lock: Mutex<()>,
}

impl PortAllocator {
    pub fn new(start_port: u16) -> Self {
        Self {
            ports: Arc::new(DashMap::new()),
            start_port,
            claim_lock: Mutex::new(()),
        }
    }

    /// Shared handle to the port map, for read paths like `local_port_map`.
    pub fn ports(&self) -> Arc<DashMap<u16, String>> {
        self.ports.clone()
    }

    /// Registers a port as claimed without probing — used by `init()` to
    /// re-populate the map from persisted descriptors whose listeners are
    /// about to be rebuilt.
    pub fn reserve(&self, port: u16, tag: &str) {
        self.ports.insert(port, tag.to_string());
    }

    /// Finds and claims a free local port, starting at the configured start
    /// port and falling back to a uniform random draw over `[1024, 65535]`.
    pub async fn allocate(&self, tag: &str) -> anyhow::Result<u16> {
        let _guard = self.claim_lock.lock().await;

        for port in self.start_port..=65535 {
            if self.try_claim(port, tag).await {
                return Ok(port);
            }
        }

        loop {
            let port = rand::thread_rng().gen_range(1024..=65535u16);
            if self.try_claim(port, tag).await {
                return Ok(port);
            }
        }
    }

    async fn try_claim(&self, port: u16, tag: &str) -> bool {
        if self.ports.contains_key(&port) {
            return false;
        }
        if dial_is_open(port).await {
            return false;
        }
        self.ports.insert(port, tag.to_string());
        true
    }

    /// Releases a previously claimed port; called on rollback and eviction.
    pub fn release(&self, port: u16) {
        debug!(target: "pool::registry", port, "releasing port");
        self.ports.remove(&port);
    }
}

async fn dial_is_open(port: u16) -> bool {
    matches!(
        timeout(DIAL_PROBE_TIMEOUT, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn skips_a_port_already_accepting_connections() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let occupied = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            loop {
                if listener.accept().await.is_err() {
                    break;
                }
            }
        });

        let allocator = PortAllocator::new(occupied);
        let allocated = allocator.allocate("test").await.unwrap();

        assert_ne!(allocated, occupied);
        assert!(allocated > occupied);
    }

    #[tokio::test]
    async fn skips_a_port_already_reserved_in_the_registry() {
        let allocator = PortAllocator::new(41000);
        allocator.reserve(41000, "existing");

        let allocated = allocator.allocate("new").await.unwrap();

        assert_eq!(allocated, 41001);
    }

    #[tokio::test]
    async fn release_frees_the_port_for_reuse() {
        let allocator = PortAllocator::new(42000);
        let port = allocator.allocate("a").await.unwrap();
        allocator.release(port);

        assert!(!allocator.ports().contains_key(&port));
    }
}
