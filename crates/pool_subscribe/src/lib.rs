use std::sync::Arc;

use pool_core::ProxyConfig;
use pool_registry::{AddCounters, AddRequest, Registry};
use rand::seq::SliceRandom;
use tracing::{error, info, warn};

const MAX_FETCHER_ATTEMPTS: usize = 5;

/// A subscription add request, as received from the control API.
#[derive(Debug, Clone, Default)]
pub struct IngestRequest {
    pub sub_url: String,
    pub sub_name: String,
    pub force_update: bool,
}

/// Fetches a YAML subscription document (optionally through a healthy pool
/// member), adds every listed proxy, and recurses into nested providers
/// (component F).
pub async fn ingest(registry: &Registry, req: IngestRequest) -> anyhow::Result<AddCounters> {
    let body = fetch_subscription(registry, &req.sub_url).await?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&body)?;

    let mut counters = AddCounters::default();

    let proxy_entries = doc
        .get("proxies")
        .and_then(|v| v.as_sequence())
        .cloned()
        .unwrap_or_default();

    let mut tasks = Vec::with_capacity(proxy_entries.len());
    for entry in proxy_entries {
        let config: ProxyConfig = match serde_json::to_value(entry)
            .ok()
            .and_then(|v| v.as_object().cloned())
        {
            Some(cfg) => cfg,
            None => continue,
        };

        let sub_name = req.sub_name.clone();
        let force_update = req.force_update;
        tasks.push(async move {
            let add_req = AddRequest {
                link: None,
                config: Some(config.clone()),
                sub_name,
                force_update,
            };
            registry.add(add_req).await
        });
    }

    for result in futures::future::join_all(tasks).await {
        match result {
            Ok(c) => counters.merge(c),
            Err(e) => {
                counters.failure += 1;
                error!(target: "pool::subscribe", error = ?e, "add failed for a subscription proxy");
            }
        }
    }

    let providers = doc
        .get("proxy-providers")
        .and_then(|v| v.as_mapping())
        .cloned()
        .unwrap_or_default();

    for (name, entry) in providers {
        let Some(name) = name.as_str() else { continue };
        let Some(url) = entry.get("url").and_then(|v| v.as_str()) else {
            continue;
        };

        let nested = IngestRequest {
            sub_url: url.to_string(),
            sub_name: name.to_string(),
            force_update: req.force_update,
        };

        match Box::pin(ingest(registry, nested)).await {
            Ok(c) => counters.merge(c),
            Err(e) => {
                warn!(target: "pool::subscribe", provider = %name, error = ?e, "failed to ingest provider");
            }
        }
    }

    Ok(counters)
}

/// Tries up to five random active proxies as the fetcher before falling back
/// to a direct (unproxied) request.
async fn fetch_subscription(registry: &Registry, url: &str) -> anyhow::Result<String> {
    let active = registry.active_outbounds();
    let mut candidates: Vec<_> = active.iter().collect();
    candidates.shuffle(&mut rand::thread_rng());

    let mut chosen: Option<Arc<pool_outbound::Outbound>> = None;
    for outbound in candidates.into_iter().take(MAX_FETCHER_ATTEMPTS) {
        if outbound.alive_for_test_url(url).await {
            chosen = Some(outbound.clone());
            break;
        }
    }

    let client_builder = reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .user_agent("clash.meta");

    let client = if let Some(outbound) = &chosen {
        info!(target: "pool::subscribe", outbound = outbound.name(), "fetching subscription through pool member");
        client_builder.proxy(reqwest::Proxy::all(pool_outbound::proxy_url(outbound))?)
    } else {
        client_builder
    }
    .build()?;

    let resp = client.get(url).send().await?.error_for_status()?;
    Ok(resp.text().await?)
}
