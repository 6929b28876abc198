use std::sync::Arc;

use pool_config::PoolConfig;
use pool_health::HealthScheduler;
use pool_registry::Registry;
use pool_store::RedisStore;
use tracing::info;

const CONFIG_PATH: &str = "proxypool.yaml";
const PROXY_POOL_TABLE: &str = "mihomo_proxy_pool";
const IP_RISK_TABLE: &str = "ip_risk";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    utils::init_tracing();

    let cfg = PoolConfig::from_file_or_default(CONFIG_PATH);
    cfg.print();

    let proxy_store: Arc<dyn pool_store::KvStore> =
        Arc::new(RedisStore::connect(&cfg.redis_conn, PROXY_POOL_TABLE).await?);
    let risk_store: Arc<dyn pool_store::KvStore> =
        Arc::new(RedisStore::connect(&cfg.redis_conn, IP_RISK_TABLE).await?);

    let registry = Arc::new(Registry::new(
        proxy_store,
        cfg.proxy_pool_start_port,
        cfg.delay_test_url.clone(),
    ));
    registry.init().await?;
    info!(target: "proxypool", "registry initialized, restored proxies from the store");

    let scheduler = Arc::new(HealthScheduler::new(
        registry.clone(),
        risk_store,
        cfg.delay_test_url.clone(),
    ));
    tokio::spawn(scheduler.run());
    info!(target: "proxypool", "health-check scheduler started");

    let server_addr = cfg.server_addr.clone();
    let secret = cfg.secret.clone();
    let http_registry = registry.clone();
    tokio::spawn(async move {
        if let Err(e) = pool_http::serve(&server_addr, http_registry, secret).await {
            tracing::error!(target: "proxypool", error = ?e, "control API server exited");
        }
    });
    info!(target: "proxypool", addr = %cfg.server_addr, "control API started");

    tokio::signal::ctrl_c().await?;
    info!(target: "proxypool", "received Ctrl+C, shutting down");
    Ok(())
}
