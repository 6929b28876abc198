use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use pool_core::{coerce_port, PoolError, ProxyDescriptor};
use pool_listener::ListenerSet;
use pool_outbound::Outbound;
use pool_store::KvStore;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::add::{AddCounters, AddOutcome, AddRequest};
use crate::allocator::PortAllocator;
use crate::link::decode_link;

fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// The authoritative in-memory proxy pool (component E). Owns the active
/// outbound map, the installed listener set, the port allocator, and the
/// handle to the persistent store; mediates every structural mutation.
pub struct Registry {
    active: DashMap<String, Arc<Outbound>>,
    listeners: ListenerSet,
    allocator: PortAllocator,
    store: Arc<dyn KvStore>,
    delay_test_url: String,
    /// Registry mutex `R`: serializes structural mutations of `active`,
    /// `listeners` and their corresponding store writes.
    lock: Mutex<()>,
}

impl Registry {
    pub fn new(store: Arc<dyn KvStore>, start_port: u16, delay_test_url: String) -> Self {
        Self {
            active: DashMap::new(),
            listeners: ListenerSet::new(),
            allocator: PortAllocator::new(start_port),
            store,
            delay_test_url,
            lock: Mutex::new(()),
        }
    }

    /// Loads every persisted descriptor, rebuilds its outbound and listener,
    /// and installs the full listener set. Per-entry parse/build failures are
    /// logged and skipped; they do not abort startup.
    pub async fn init(&self) -> anyhow::Result<()> {
        let values = self.store.values().await?;
        let mut desired = Vec::new();

        for raw in values {
            let descriptor: ProxyDescriptor = match serde_json::from_str(&raw) {
                Ok(d) => d,
                Err(e) => {
                    warn!(target: "pool::registry", error = ?e, "skipping malformed descriptor at init");
                    continue;
                }
            };

            let outbound = match Outbound::parse(&descriptor.config) {
                Ok(o) => Arc::new(o),
                Err(e) => {
                    warn!(target: "pool::registry", proxy = %descriptor.name, error = ?e, "skipping unparseable proxy at init");
                    continue;
                }
            };

            self.allocator.reserve(descriptor.local_port, &descriptor.name);
            self.active.insert(descriptor.name.clone(), outbound.clone());
            desired.push((descriptor.name.clone(), descriptor.local_port, outbound));

            info!(
                target: "pool::registry",
                proxy = %descriptor.name,
                local_port = descriptor.local_port,
                "restored proxy from store"
            );
        }

        self.listeners.install(desired, true);
        Ok(())
    }

    /// Accepts a direct descriptor or a share link, allocates a port,
    /// installs a listener, and persists the result. On any failure after a
    /// port has been claimed, the port is released before the error is
    /// surfaced — no partial state is left behind.
    pub async fn add(&self, req: AddRequest) -> Result<AddCounters, PoolError> {
        let mut config = if let Some(link) = req.link.as_deref().filter(|l| !l.is_empty()) {
            decode_link(link)?
        } else {
            req.config.clone().ok_or(PoolError::BadRequest(
                "request must carry either `link` or `config`".into(),
            ))?
        };

        let port = coerce_port(&config)?;
        config.insert("port".into(), json!(port));

        let server = config
            .get("server")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PoolError::ParseProxy("config.server missing".into()))?
            .to_string();
        let key = ProxyDescriptor::registry_key(&server, port);

        if !req.force_update {
            let exists = self
                .store
                .exists(&key)
                .await
                .map_err(|e| PoolError::StoreError(e.to_string()))?;
            if exists {
                return Ok(AddCounters {
                    exist: 1,
                    ..Default::default()
                });
            }
        } else if let Some(raw) = self
            .store
            .get(&key)
            .await
            .map_err(|e| PoolError::StoreError(e.to_string()))?
        {
            if let Ok(old) = serde_json::from_str::<ProxyDescriptor>(&raw) {
                self.allocator.release(old.local_port);
            }
        }

        config.insert("name".into(), json!(key));

        let local_port = self
            .allocator
            .allocate(&key)
            .await
            .map_err(PoolError::ProbeFailed)?;

        let outcome = self
            .commit(key.clone(), config, local_port, req.sub_name.clone())
            .await;

        match outcome {
            Ok(AddOutcome::Success) => Ok(AddCounters {
                success: 1,
                ..Default::default()
            }),
            Ok(AddOutcome::Exist) => Ok(AddCounters {
                exist: 1,
                ..Default::default()
            }),
            Err(e) => {
                self.allocator.release(local_port);
                Err(e)
            }
        }
    }

    async fn commit(
        &self,
        key: String,
        config: pool_core::ProxyConfig,
        local_port: u16,
        sub_name: String,
    ) -> Result<AddOutcome, PoolError> {
        let outbound = Arc::new(Outbound::parse(&config).map_err(|e| {
            PoolError::ParseProxy(format!("failed to parse newly added proxy: {e}"))
        })?);

        let delay = outbound
            .url_test(&self.delay_test_url)
            .await
            .map_err(PoolError::ProbeFailed)?;

        let _guard = self.lock.lock().await;

        self.active.insert(key.clone(), outbound.clone());

        let desired: Vec<_> = self
            .active
            .iter()
            .map(|entry| {
                let name = entry.key().clone();
                let port = if name == key {
                    local_port
                } else {
                    self.listeners.local_port(&name).unwrap_or(local_port)
                };
                (name, port, entry.value().clone())
            })
            .collect();
        self.listeners.install(desired, true);

        let descriptor = ProxyDescriptor {
            config,
            name: key.clone(),
            local_port,
            sub_name,
            add_time: now(),
            last_check_time: now(),
            delay,
            success_count: 1,
            fail_count: 0,
            outbound_ip: String::new(),
            region: String::new(),
            ip_type: String::new(),
            ip_risk_score: String::new(),
        };

        let encoded = serde_json::to_string(&descriptor)
            .map_err(|e| PoolError::StoreError(e.to_string()))?;
        self.store
            .put(&key, &encoded)
            .await
            .map_err(|e| PoolError::StoreError(e.to_string()))?;

        info!(target: "pool::registry", proxy = %key, local_port, "added proxy");
        Ok(AddOutcome::Success)
    }

    /// Removes a proxy from memory and reinstalls listeners before deleting
    /// it from the store, so a crash mid-delete leaves (at worst) a stale
    /// store entry rather than a dangling live listener.
    pub async fn delete(&self, descriptor: &ProxyDescriptor) -> Result<(), PoolError> {
        let _guard = self.lock.lock().await;

        self.active.remove(&descriptor.name);
        self.listeners.remove(&descriptor.name);
        self.allocator.release(descriptor.local_port);

        self.store
            .delete(&descriptor.name)
            .await
            .map_err(|e| PoolError::StoreError(e.to_string()))?;

        info!(target: "pool::registry", proxy = %descriptor.name, "deleted proxy");
        Ok(())
    }

    pub async fn delete_by_name(&self, name: &str) -> Result<(), PoolError> {
        let raw = self
            .store
            .get(name)
            .await
            .map_err(|e| PoolError::StoreError(e.to_string()))?
            .ok_or(PoolError::NotFound)?;
        let descriptor: ProxyDescriptor =
            serde_json::from_str(&raw).map_err(|e| PoolError::ParseProxy(e.to_string()))?;
        self.delete(&descriptor).await
    }

    /// Refreshes a descriptor's bookkeeping fields and persists it; used by
    /// the health checker after each sweep.
    pub async fn update_db(&self, descriptor: &mut ProxyDescriptor) -> Result<(), PoolError> {
        let _guard = self.lock.lock().await;

        descriptor.last_check_time = now();
        let encoded = serde_json::to_string(descriptor)
            .map_err(|e| PoolError::StoreError(e.to_string()))?;
        self.store
            .put(&descriptor.name, &encoded)
            .await
            .map_err(|e| PoolError::StoreError(e.to_string()))?;
        Ok(())
    }

    pub async fn get_random(&self) -> Result<Option<ProxyDescriptor>, PoolError> {
        let raw = self
            .store
            .get_random()
            .await
            .map_err(|e| PoolError::StoreError(e.to_string()))?;
        match raw {
            Some(raw) => Ok(Some(
                serde_json::from_str(&raw).map_err(|e| PoolError::ParseProxy(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    pub async fn all(&self) -> Result<Vec<ProxyDescriptor>, PoolError> {
        let values = self
            .store
            .values()
            .await
            .map_err(|e| PoolError::StoreError(e.to_string()))?;

        let mut out = Vec::with_capacity(values.len());
        for raw in values {
            match serde_json::from_str::<ProxyDescriptor>(&raw) {
                Ok(d) => out.push(d),
                Err(e) => error!(target: "pool::registry", error = ?e, "malformed descriptor in store"),
            }
        }
        Ok(out)
    }

    /// `[{port: name}, ...]` ascending by port.
    pub fn local_port_map(&self) -> Vec<(u16, String)> {
        let ports = self.allocator.ports();
        let mut out: Vec<(u16, String)> = ports.iter().map(|e| (*e.key(), e.value().clone())).collect();
        out.sort_by_key(|(port, _)| *port);
        out
    }

    pub fn active_outbounds(&self) -> Vec<Arc<Outbound>> {
        self.active.iter().map(|e| e.value().clone()).collect()
    }

    pub fn any_local_port(&self) -> Option<u16> {
        self.listeners.any_local_port()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    /// In-memory stand-in for `KvStore`, used to exercise registry read/write
    /// paths that don't require a real network probe (`add` is excluded —
    /// it always performs a live `url_test`).
    #[derive(Default)]
    struct FakeStore {
        table: StdMutex<std::collections::HashMap<String, String>>,
    }

    #[async_trait]
    impl KvStore for FakeStore {
        async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
            Ok(self.table.lock().unwrap().get(key).cloned())
        }

        async fn get_random(&self) -> anyhow::Result<Option<String>> {
            Ok(self.table.lock().unwrap().values().next().cloned())
        }

        async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
            self.table.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }

        async fn delete(&self, key: &str) -> anyhow::Result<()> {
            self.table.lock().unwrap().remove(key);
            Ok(())
        }

        async fn exists(&self, key: &str) -> anyhow::Result<bool> {
            Ok(self.table.lock().unwrap().contains_key(key))
        }

        async fn keys(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.table.lock().unwrap().keys().cloned().collect())
        }

        async fn values(&self) -> anyhow::Result<Vec<String>> {
            Ok(self.table.lock().unwrap().values().cloned().collect())
        }

        async fn all(&self) -> anyhow::Result<Vec<(String, String)>> {
            Ok(self
                .table
                .lock()
                .unwrap()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect())
        }

        async fn len(&self) -> anyhow::Result<u64> {
            Ok(self.table.lock().unwrap().len() as u64)
        }

        async fn clear(&self) -> anyhow::Result<()> {
            self.table.lock().unwrap().clear();
            Ok(())
        }
    }

    fn sample_descriptor(name: &str, local_port: u16) -> ProxyDescriptor {
        let (server, port) = name.split_once(':').unwrap();
        let mut config = pool_core::ProxyConfig::new();
        config.insert("server".into(), json!(server));
        config.insert("port".into(), json!(port.parse::<u16>().unwrap()));
        config.insert("name".into(), json!(name));

        ProxyDescriptor {
            config,
            name: name.to_string(),
            local_port,
            sub_name: String::new(),
            add_time: 0,
            last_check_time: 0,
            delay: 0,
            success_count: 0,
            fail_count: 0,
            outbound_ip: String::new(),
            region: String::new(),
            ip_type: String::new(),
            ip_risk_score: String::new(),
        }
    }

    fn new_registry() -> Registry {
        Registry::new(Arc::new(FakeStore::default()), 40001, "http://example.invalid".into())
    }

    #[tokio::test]
    async fn delete_removes_from_store_and_releases_the_port() {
        let registry = new_registry();
        let descriptor = sample_descriptor("1.1.1.1:443", 40001);
        registry.allocator.reserve(40001, &descriptor.name);
        registry
            .store
            .put(&descriptor.name, &serde_json::to_string(&descriptor).unwrap())
            .await
            .unwrap();

        registry.delete(&descriptor).await.unwrap();

        assert!(!registry.store.exists(&descriptor.name).await.unwrap());
        assert!(!registry.allocator.ports().contains_key(&40001));
    }

    #[tokio::test]
    async fn update_db_stamps_last_check_time_and_persists() {
        let registry = new_registry();
        let mut descriptor = sample_descriptor("1.1.1.1:443", 40001);
        registry
            .store
            .put(&descriptor.name, &serde_json::to_string(&descriptor).unwrap())
            .await
            .unwrap();

        descriptor.delay = 42;
        registry.update_db(&mut descriptor).await.unwrap();

        let raw = registry.store.get(&descriptor.name).await.unwrap().unwrap();
        let persisted: ProxyDescriptor = serde_json::from_str(&raw).unwrap();
        assert_eq!(persisted.delay, 42);
        assert!(persisted.last_check_time > 0);
    }

    #[tokio::test]
    async fn local_port_map_is_sorted_ascending_by_port() {
        let registry = new_registry();
        registry.allocator.reserve(40050, "b:1");
        registry.allocator.reserve(40002, "a:1");

        let map = registry.local_port_map();
        assert_eq!(map, vec![(40002, "a:1".to_string()), (40050, "b:1".to_string())]);
    }

    #[tokio::test]
    async fn delete_by_name_fails_not_found_when_missing() {
        let registry = new_registry();
        let result = registry.delete_by_name("nope:1").await;
        assert!(matches!(result, Err(PoolError::NotFound)));
    }
}
