use std::sync::Arc;

use bytes::Bytes;
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response};
use pool_core::{PoolError, ProxyConfig, ProxyDescriptor};
use pool_registry::{AddRequest, Registry};
use pool_subscribe::IngestRequest;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::auth::is_authorized;

pub struct AppState {
    pub registry: Arc<Registry>,
    pub secret: String,
}

type HttpResponse = Response<Full<Bytes>>;

/// Top-level request dispatcher: checks auth, then routes by
/// `(method, path)`. The control surface is intentionally thin plumbing over
/// the registry/ingester; there is no framework routing layer.
pub async fn handle(state: Arc<AppState>, req: Request<Incoming>) -> Result<HttpResponse, hyper::Error> {
    let (parts, body) = req.into_parts();

    if parts.uri.path() != "/" && !is_authorized(&parts.headers, &parts.uri, &state.secret) {
        return Ok(json_response(StatusCode::UNAUTHORIZED, &ErrorBody { error: "unauthorized".into() }));
    }

    let body_bytes = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!(target: "pool::http", error = ?e, "failed to read request body");
            return Ok(json_response(StatusCode::BAD_REQUEST, &ErrorBody { error: "bad request body".into() }));
        }
    };

    let response = match (parts.method.clone(), parts.uri.path()) {
        (Method::GET, "/") => text_response(StatusCode::OK, "ok\n"),
        (Method::GET, "/get") => handle_get(&state).await,
        (Method::GET, "/all") => handle_all(&state, parts.uri.query().unwrap_or("")).await,
        (Method::POST, "/add") => handle_add(&state, &body_bytes).await,
        (Method::POST, "/delete") => handle_delete(&state, &body_bytes).await,
        (Method::GET, "/port_map") => handle_port_map(&state),
        _ => text_response(StatusCode::NOT_FOUND, "not found\n"),
    };

    Ok(response)
}

async fn handle_get(state: &AppState) -> HttpResponse {
    match state.registry.get_random().await {
        Ok(Some(descriptor)) => json_response(StatusCode::OK, &ProxyResp::from_descriptor(&descriptor, true)),
        Ok(None) => json_response(StatusCode::NOT_FOUND, &ErrorBody { error: "pool is empty".into() }),
        Err(e) => pool_error_response(e),
    }
}

#[derive(Debug, Default)]
struct AllQuery {
    show_config: bool,
    sort: String,
}

/// Parses `show_config`/`sort` directly from the raw query pairs. `show_config`
/// is a bool flag, not JSON, so it is matched against `"true"` literally rather
/// than routed through a JSON deserializer.
fn parse_all_query(query: &str) -> AllQuery {
    let pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    let show_config = pairs.iter().any(|(k, v)| k == "show_config" && v == "true");
    let sort = pairs
        .iter()
        .find(|(k, _)| k == "sort")
        .map(|(_, v)| v.clone())
        .unwrap_or_default();

    AllQuery { show_config, sort }
}

async fn handle_all(state: &AppState, query: &str) -> HttpResponse {
    let q = parse_all_query(query);

    let mut descriptors = match state.registry.all().await {
        Ok(d) => d,
        Err(e) => return pool_error_response(e),
    };

    sort_descriptors(&mut descriptors, &q.sort);

    let resp: Vec<ProxyResp> = descriptors
        .iter()
        .map(|d| ProxyResp::from_descriptor(d, q.show_config))
        .collect();
    json_response(StatusCode::OK, &resp)
}

/// Sorts by the requested key; unrecognized keys leave registry order
/// (insertion order from the backing store) untouched. Empty risk-score and
/// zero delay sort last, matching the spec's `/all` contract.
fn sort_descriptors(descriptors: &mut [ProxyDescriptor], sort: &str) {
    match sort {
        "delay" => descriptors.sort_by_key(|d| if d.delay == 0 { u32::MAX } else { d.delay }),
        "risk_score" => descriptors.sort_by(|a, b| {
            let ka = parse_leading_number(&a.ip_risk_score);
            let kb = parse_leading_number(&b.ip_risk_score);
            match (ka, kb) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            }
        }),
        "time" => descriptors.sort_by_key(|d| d.add_time),
        _ => {}
    }
}

fn parse_leading_number(s: &str) -> Option<f64> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit() || *c == '.').collect();
    if digits.is_empty() {
        None
    } else {
        digits.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
struct AddProxyReq {
    link: Option<String>,
    config: Option<ProxyConfig>,
    sub: Option<String>,
    #[serde(default)]
    sub_name: String,
    #[serde(default)]
    update: bool,
}

async fn handle_add(state: &AppState, body: &[u8]) -> HttpResponse {
    let req: AddProxyReq = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorBody { error: format!("invalid request body: {e}") },
            )
        }
    };

    if let Some(sub_url) = req.sub.filter(|s| !s.is_empty()) {
        let ingest_req = IngestRequest {
            sub_url,
            sub_name: req.sub_name,
            force_update: req.update,
        };
        return match pool_subscribe::ingest(&state.registry, ingest_req).await {
            Ok(counters) => json_response(StatusCode::OK, &counters),
            Err(e) => {
                warn!(target: "pool::http", error = ?e, "subscription ingestion failed");
                json_response(StatusCode::BAD_GATEWAY, &ErrorBody { error: e.to_string() })
            }
        };
    }

    let add_req = AddRequest {
        link: req.link,
        config: req.config,
        sub_name: req.sub_name,
        force_update: req.update,
    };

    match state.registry.add(add_req).await {
        Ok(counters) => json_response(StatusCode::OK, &counters),
        Err(e) => pool_error_response(e),
    }
}

#[derive(Debug, Deserialize)]
struct DeleteReq {
    name: String,
}

async fn handle_delete(state: &AppState, body: &[u8]) -> HttpResponse {
    let req: DeleteReq = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => {
            return json_response(
                StatusCode::BAD_REQUEST,
                &ErrorBody { error: format!("invalid request body: {e}") },
            )
        }
    };

    match state.registry.delete_by_name(&req.name).await {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({ "deleted": req.name })),
        Err(e) => pool_error_response(e),
    }
}

fn handle_port_map(state: &AppState) -> HttpResponse {
    let entries: Vec<serde_json::Value> = state
        .registry
        .local_port_map()
        .into_iter()
        .map(|(port, name)| {
            let mut entry = serde_json::Map::new();
            entry.insert(port.to_string(), serde_json::Value::String(name));
            serde_json::Value::Object(entry)
        })
        .collect();
    json_response(StatusCode::OK, &entries)
}

#[derive(Serialize)]
struct ProxyResp {
    name: String,
    local_port: u16,
    sub_name: String,
    add_time: i64,
    last_check_time: i64,
    delay: u32,
    success_count: u32,
    fail_count: u32,
    outbound_ip: String,
    region: String,
    ip_type: String,
    ip_risk_score: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<ProxyConfig>,
}

impl ProxyResp {
    fn from_descriptor(d: &ProxyDescriptor, show_config: bool) -> Self {
        Self {
            name: d.name.clone(),
            local_port: d.local_port,
            sub_name: d.sub_name.clone(),
            add_time: d.add_time,
            last_check_time: d.last_check_time,
            delay: d.delay,
            success_count: d.success_count,
            fail_count: d.fail_count,
            outbound_ip: d.outbound_ip.clone(),
            region: d.region.clone(),
            ip_type: d.ip_type.clone(),
            ip_risk_score: d.ip_risk_score.clone(),
            config: show_config.then(|| d.config.clone()),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn pool_error_response(err: PoolError) -> HttpResponse {
    let status = match err {
        PoolError::InvalidLink | PoolError::InvalidPort | PoolError::BadRequest(_) | PoolError::ParseProxy(_) => {
            StatusCode::BAD_REQUEST
        }
        PoolError::NotFound => StatusCode::NOT_FOUND,
        PoolError::Unauthorized => StatusCode::UNAUTHORIZED,
        PoolError::ProbeFailed(_) => StatusCode::BAD_GATEWAY,
        PoolError::StoreError(_) | PoolError::ListenerInstallFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    json_response(status, &ErrorBody { error: err.to_string() })
}

fn json_response<T: Serialize>(status: StatusCode, body: &T) -> HttpResponse {
    let bytes = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Full::new(Bytes::from(bytes)))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from_static(b"{}")))
                .expect("building fallback response")
        })
}

fn text_response(status: StatusCode, body: &'static str) -> HttpResponse {
    Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap_or_else(|_| {
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(Full::new(Bytes::from_static(b"error")))
                .expect("building fallback response")
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sort_descriptors_puts_zero_delay_last() {
        let mut descriptors = vec![
            descriptor_with("a", 0),
            descriptor_with("b", 50),
            descriptor_with("c", 10),
        ];
        sort_descriptors(&mut descriptors, "delay");
        let names: Vec<&str> = descriptors.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    fn descriptor_with(name: &str, delay: u32) -> ProxyDescriptor {
        ProxyDescriptor {
            config: ProxyConfig::new(),
            name: name.to_string(),
            local_port: 40001,
            sub_name: String::new(),
            add_time: 0,
            last_check_time: 0,
            delay,
            success_count: 0,
            fail_count: 0,
            outbound_ip: String::new(),
            region: String::new(),
            ip_type: String::new(),
            ip_risk_score: String::new(),
        }
    }
}
