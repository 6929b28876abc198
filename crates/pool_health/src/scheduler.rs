use std::sync::Arc;
use std::time::Duration;

use pool_core::ProxyDescriptor;
use pool_outbound::Outbound;
use pool_registry::Registry;
use pool_store::KvStore;
use tokio::sync::Semaphore;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use crate::probes::{egress_ip, RiskScoreProbe};

const SWEEP_CONCURRENCY: usize = 16;
const MAX_FAIL_COUNT: u32 = 6;
const CHECK_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// The health-check scheduler (component G): a bounded-concurrency periodic
/// sweep of every stored proxy, enriching delay/egress/risk metadata and
/// evicting proxies that fail `MAX_FAIL_COUNT` sweeps in a row.
pub struct HealthScheduler {
    registry: Arc<Registry>,
    risk_probe: Arc<RiskScoreProbe>,
    delay_test_url: String,
}

impl HealthScheduler {
    pub fn new(registry: Arc<Registry>, risk_cache: Arc<dyn KvStore>, delay_test_url: String) -> Self {
        Self {
            registry,
            risk_probe: Arc::new(RiskScoreProbe::new(risk_cache)),
            delay_test_url,
        }
    }

    /// Runs sweeps on a fixed interval forever. Sweeps never overlap; a
    /// sweep-level error (e.g. the store is unreachable) is logged and the
    /// loop tries again at the next tick instead of exiting.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(CHECK_INTERVAL);
        loop {
            ticker.tick().await;
            if let Err(e) = self.do_check().await {
                error!(target: "pool::health", error = ?e, "health sweep failed");
            }
        }
    }

    /// One full pass over every persisted descriptor, bounded to
    /// `SWEEP_CONCURRENCY` concurrent probes.
    async fn do_check(&self) -> anyhow::Result<()> {
        let descriptors = self.registry.all().await.map_err(|e| anyhow::anyhow!(e))?;
        info!(target: "pool::health", count = descriptors.len(), "starting health sweep");

        let semaphore = Arc::new(Semaphore::new(SWEEP_CONCURRENCY));
        let mut tasks = Vec::with_capacity(descriptors.len());

        for descriptor in descriptors {
            let semaphore = semaphore.clone();
            let registry = self.registry.clone();
            let risk_probe = self.risk_probe.clone();
            let delay_test_url = self.delay_test_url.clone();

            tasks.push(tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(p) => p,
                    Err(_) => return,
                };
                process(descriptor, &registry, &risk_probe, &delay_test_url).await;
            }));
        }

        for task in tasks {
            if let Err(e) = task.await {
                warn!(target: "pool::health", error = ?e, "sweep task panicked");
            }
        }

        Ok(())
    }
}

async fn process(
    mut descriptor: ProxyDescriptor,
    registry: &Registry,
    risk_probe: &RiskScoreProbe,
    delay_test_url: &str,
) {
    let outbound = match Outbound::parse(&descriptor.config) {
        Ok(o) => o,
        Err(e) => {
            warn!(target: "pool::health", proxy = %descriptor.name, error = ?e, "skipping proxy with unparseable config");
            return;
        }
    };

    let mut succeeded = false;
    match outbound.url_test(delay_test_url).await {
        Ok(delay) => {
            descriptor.success_count += 1;
            descriptor.fail_count = 0;
            descriptor.delay = delay;
            succeeded = true;
        }
        Err(e) => {
            descriptor.fail_count += 1;
            debug!(
                target: "pool::health",
                proxy = %descriptor.name,
                fail_count = descriptor.fail_count,
                error = ?e,
                "url_test failed"
            );
            if descriptor.fail_count >= MAX_FAIL_COUNT {
                warn!(target: "pool::health", proxy = %descriptor.name, "evicting proxy after sustained failures");
                if let Err(e) = registry.delete(&descriptor).await {
                    error!(target: "pool::health", proxy = %descriptor.name, error = ?e, "failed to evict proxy");
                }
                return;
            }
        }
    }

    if succeeded && descriptor.outbound_ip.is_empty() {
        match egress_ip(&outbound).await {
            Ok(ip) => descriptor.outbound_ip = ip,
            Err(e) => debug!(target: "pool::health", proxy = %descriptor.name, error = ?e, "egress-ip probe failed"),
        }
    }

    if succeeded && descriptor.ip_risk_score.is_empty() {
        let local_port = registry.any_local_port();
        match risk_probe.lookup(&descriptor.outbound_ip, local_port).await {
            Ok(score) => {
                descriptor.region = score.location;
                descriptor.ip_type = score.ip_type;
                descriptor.ip_risk_score = score.risk_score;
            }
            Err(e) => debug!(target: "pool::health", proxy = %descriptor.name, error = ?e, "risk-score probe failed"),
        }
    }

    if let Err(e) = registry.update_db(&mut descriptor).await {
        error!(target: "pool::health", proxy = %descriptor.name, error = ?e, "failed to persist health-check update");
    }
}
