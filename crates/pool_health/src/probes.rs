use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use pool_core::IpRiskScore;
use pool_outbound::Outbound;
use pool_store::KvStore;
use scraper::{Html, Selector};
use tracing::{debug, warn};

const EGRESS_TEST_URL: &str = "https://speed.cloudflare.com/__down?bytes=1";
const EGRESS_TIMEOUT: Duration = Duration::from_secs(10);
const RISK_PAGE_ROOT: &str = "https://ping0.cc/";
const RISK_PAGE_PREFIX: &str = "https://ping0.cc/ip/";

/// Egress-IP probe (component H): HTTPS GET through the adapter's dial
/// endpoint (never the local listener); the egress IP is read back from the
/// `Cf-Meta-Ip` response header.
pub async fn egress_ip(outbound: &Outbound) -> anyhow::Result<String> {
    let client = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .proxy(reqwest::Proxy::all(pool_outbound::proxy_url(outbound))?)
        .timeout(EGRESS_TIMEOUT)
        .build()?;

    let resp = client.get(EGRESS_TEST_URL).send().await?;
    let ip = resp
        .headers()
        .get("Cf-Meta-Ip")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| anyhow::anyhow!("Cf-Meta-Ip header missing from egress probe response"))?;

    debug!(target: "pool::health", outbound = outbound.name(), ip, "egress-ip probe ok");
    Ok(ip)
}

/// Risk-score probe (component H): best-effort, cached headless-browser
/// scrape. A cache hit short-circuits all network and browser work.
pub struct RiskScoreProbe {
    cache: Arc<dyn KvStore>,
}

impl RiskScoreProbe {
    pub fn new(cache: Arc<dyn KvStore>) -> Self {
        Self { cache }
    }

    pub async fn lookup(&self, ip: &str, local_proxy_port: Option<u16>) -> anyhow::Result<IpRiskScore> {
        if let Some(cached) = self.cache.get(ip).await? {
            if let Ok(score) = serde_json::from_str::<IpRiskScore>(&cached) {
                return Ok(score);
            }
        }

        let score = scrape_risk_score(ip, local_proxy_port).await?;
        let encoded = serde_json::to_string(&score)?;
        if let Err(e) = self.cache.put(&score.ip, &encoded).await {
            warn!(target: "pool::health", ip, error = ?e, "failed to cache risk score");
        }
        Ok(score)
    }
}

async fn scrape_risk_score(ip: &str, local_proxy_port: Option<u16>) -> anyhow::Result<IpRiskScore> {
    let url = if ip.is_empty() {
        RISK_PAGE_ROOT.to_string()
    } else {
        format!("{RISK_PAGE_PREFIX}{ip}")
    };

    let mut builder = BrowserConfig::builder()
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--no-first-run");
    if let Some(port) = local_proxy_port {
        builder = builder.arg(format!("--proxy-server=http://127.0.0.1:{port}"));
    }
    let config = builder.build().map_err(|e| anyhow::anyhow!(e))?;

    let (mut browser, mut handler) = Browser::launch(config).await?;
    let handler_task = tokio::spawn(async move {
        while let Some(event) = handler.next().await {
            if let Err(e) = event {
                warn!(target: "pool::health", error = ?e, "CDP handler error during risk-score scrape");
            }
        }
    });

    let scrape_result: anyhow::Result<String> = async {
        let page = browser.new_page(&url).await?;
        tokio::time::sleep(Duration::from_millis(1500)).await;
        let content = page.content().await?;
        Ok(content)
    }
    .await;

    if let Err(e) = browser.close().await {
        warn!(target: "pool::health", error = ?e, "risk-score browser close failed (non-fatal)");
    }
    handler_task.abort();

    let html = scrape_result?;
    parse_risk_page(&html)
}

fn parse_risk_page(html: &str) -> anyhow::Result<IpRiskScore> {
    let doc = Html::parse_document(html);

    let text_of = |selector: &str| -> String {
        Selector::parse(selector)
            .ok()
            .and_then(|sel| doc.select(&sel).next())
            .map(|el| el.text().collect::<String>().trim().to_string())
            .unwrap_or_default()
    };

    let ip = text_of("div.line.ip > div.content")
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_string();
    if ip.is_empty() {
        anyhow::bail!("risk-score page did not contain an IP element");
    }

    Ok(IpRiskScore {
        ip,
        location: text_of("#check div.line.loc > div.content"),
        ip_type: text_of("#check div.line.line-iptype > div.content"),
        native_ip: text_of("#check div.line.line-nativeip > div.content > span"),
        risk_score: text_of("span.value"),
    })
}
