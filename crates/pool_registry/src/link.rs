use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use pool_core::{PoolError, ProxyConfig};
use serde_json::{json, Value};

/// Decodes a single V2Ray-style share link (`vmess://`, `trojan://`, ...)
/// into a proxy config map.
///
/// The upstream converter this mirrors expects a base64-encoded blob of
/// newline-separated links (the shape a subscription body comes in as), not
/// a bare link — so the raw link text is base64-re-encoded, then decoded
/// back, before being handed to the per-scheme parser below. This matches
/// the source's actual call and keeps link and subscription parsing sharing
/// one entry point.
pub fn decode_link(link: &str) -> Result<ProxyConfig, PoolError> {
    let reencoded = STANDARD.encode(link.trim());
    let raw = STANDARD
        .decode(reencoded)
        .map_err(|_| PoolError::InvalidLink)?;
    let line = String::from_utf8(raw).map_err(|_| PoolError::InvalidLink)?;

    parse_one_link(line.trim())
}

fn parse_one_link(link: &str) -> Result<ProxyConfig, PoolError> {
    if let Some(rest) = link.strip_prefix("vmess://") {
        return parse_vmess(rest);
    }
    if let Some(rest) = link.strip_prefix("trojan://") {
        return parse_userinfo_scheme(rest, "trojan");
    }
    if let Some(rest) = link.strip_prefix("ss://") {
        return parse_userinfo_scheme(rest, "ss");
    }
    Err(PoolError::InvalidLink)
}

fn parse_vmess(body: &str) -> Result<ProxyConfig, PoolError> {
    let decoded = STANDARD
        .decode(body.trim())
        .map_err(|_| PoolError::InvalidLink)?;
    let value: Value = serde_json::from_slice(&decoded).map_err(|_| PoolError::InvalidLink)?;

    let server = value
        .get("add")
        .and_then(Value::as_str)
        .ok_or(PoolError::InvalidLink)?;
    let port = value.get("port").cloned().ok_or(PoolError::InvalidLink)?;

    let mut cfg = ProxyConfig::new();
    cfg.insert("type".into(), json!("vmess"));
    cfg.insert("server".into(), json!(server));
    cfg.insert("port".into(), port);
    if let Some(uuid) = value.get("id") {
        cfg.insert("uuid".into(), uuid.clone());
    }
    Ok(cfg)
}

/// Parses `user@host:port[?params]` style links shared by `trojan://` and
/// `ss://` (base64 userinfo for `ss://` is not decoded further here — only
/// the fields the registry's contract needs, `server`/`port`, are required).
fn parse_userinfo_scheme(body: &str, scheme: &str) -> Result<ProxyConfig, PoolError> {
    let body = body.split(['#', '?']).next().unwrap_or(body);
    let (userinfo, hostport) = body.rsplit_once('@').ok_or(PoolError::InvalidLink)?;
    let (host, port) = hostport.rsplit_once(':').ok_or(PoolError::InvalidLink)?;
    let port: u16 = port.parse().map_err(|_| PoolError::InvalidLink)?;

    let mut cfg = ProxyConfig::new();
    cfg.insert("type".into(), json!(scheme));
    cfg.insert("server".into(), json!(host));
    cfg.insert("port".into(), json!(port));
    cfg.insert("password".into(), json!(userinfo));
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trojan_link() {
        let cfg = decode_link("trojan://secret@1.1.1.1:443?sni=example.com#name").unwrap();
        assert_eq!(cfg.get("server").unwrap(), "1.1.1.1");
        assert_eq!(cfg.get("port").unwrap(), 443);
        assert_eq!(cfg.get("password").unwrap(), "secret");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(matches!(
            decode_link("wireguard://foo"),
            Err(PoolError::InvalidLink)
        ));
    }
}
