use std::time::{Duration, Instant};

use pool_core::{coerce_port, PoolError, ProxyConfig};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{debug, instrument};

const URL_TEST_TIMEOUT: Duration = Duration::from_secs(10);
const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
const ALIVE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Parses a descriptor's `config` and exposes the outbound capability set
/// (component B). Dials are generic TCP connects to `server:port` — this
/// adapter does not speak any specific proxy wire protocol; see the design
/// notes for the scope cut.
pub struct Outbound {
    name: String,
    server: String,
    port: u16,
    alive_cache: Mutex<Option<(Instant, bool)>>,
}

impl Outbound {
    /// Parses a proxy descriptor's config into an outbound adapter.
    pub fn parse(config: &ProxyConfig) -> Result<Self, PoolError> {
        let server = config
            .get("server")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PoolError::ParseProxy("config.server missing".into()))?
            .to_string();
        let port = coerce_port(config)?;
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{server}:{port}"));

        Ok(Self {
            name,
            server,
            port,
            alive_cache: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Opens a TCP stream to `server:port` through this outbound.
    #[instrument(skip(self), fields(outbound = %self.name))]
    pub async fn dial_context(&self) -> anyhow::Result<TcpStream> {
        match timeout(DIAL_TIMEOUT, TcpStream::connect((self.server.as_str(), self.port))).await {
            Ok(res) => Ok(res?),
            Err(_) => anyhow::bail!("dial timeout to {}:{}", self.server, self.port),
        }
    }

    /// Issues an HTTP GET through this proxy, measuring wall time to first
    /// response and failing when the status is outside `200..=299 | 300`.
    #[instrument(skip(self, url), fields(outbound = %self.name))]
    pub async fn url_test(&self, url: &str) -> anyhow::Result<u32> {
        let proxy_url = format!("http://{}:{}", self.server, self.port);
        let client = reqwest::Client::builder()
            .proxy(reqwest::Proxy::all(&proxy_url)?)
            .danger_accept_invalid_certs(true)
            .timeout(URL_TEST_TIMEOUT)
            .build()?;

        let started = Instant::now();
        let resp = client.get(url).send().await?;
        let status = resp.status().as_u16();
        let delay_ms = started.elapsed().as_millis() as u32;

        if !(200..=300).contains(&status) {
            anyhow::bail!("url_test status {status} out of range");
        }

        debug!(target: "pool::outbound", outbound = %self.name, delay_ms, "url_test ok");
        Ok(delay_ms)
    }

    /// Cheap cached liveness flag, short-TTL to avoid hammering a subscription
    /// URL every time the ingester is choosing a fetcher.
    pub async fn alive_for_test_url(&self, url: &str) -> bool {
        {
            let cache = self.alive_cache.lock().await;
            if let Some((checked_at, alive)) = *cache {
                if checked_at.elapsed() < ALIVE_CACHE_TTL {
                    return alive;
                }
            }
        }

        let alive = self.url_test(url).await.is_ok();
        *self.alive_cache.lock().await = Some((Instant::now(), alive));
        alive
    }
}

/// Builds the per-request reqwest proxy URL a caller (e.g. the egress-IP
/// probe) can use to route a request through this outbound's dial endpoint.
pub fn proxy_url(outbound: &Outbound) -> String {
    format!("http://{}:{}", outbound.server(), outbound.port())
}
