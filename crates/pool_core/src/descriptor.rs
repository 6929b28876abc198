use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::PoolError;

/// The opaque, outbound-adapter-defined key/value mapping carried by every
/// proxy descriptor. Only `server`, `port` and `name` are ever read by the
/// core; everything else is passed through untouched.
pub type ProxyConfig = Map<String, Value>;

/// A persisted proxy: its outbound config plus everything the registry and
/// health checker track about it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyDescriptor {
    pub config: ProxyConfig,
    pub name: String,
    pub local_port: u16,
    #[serde(default)]
    pub sub_name: String,
    pub add_time: i64,
    #[serde(default)]
    pub last_check_time: i64,
    #[serde(default)]
    pub delay: u32,
    #[serde(default)]
    pub success_count: u32,
    #[serde(default)]
    pub fail_count: u32,
    #[serde(default)]
    pub outbound_ip: String,
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub ip_type: String,
    #[serde(default)]
    pub ip_risk_score: String,
}

impl ProxyDescriptor {
    /// Canonical registry key for a `server:port` pair.
    pub fn registry_key(server: &str, port: u16) -> String {
        format!("{server}:{port}")
    }

    pub fn server(&self) -> Option<&str> {
        self.config.get("server").and_then(Value::as_str)
    }

    pub fn port(&self) -> Result<u16, PoolError> {
        coerce_port(&self.config)
    }
}

/// Reads `config["port"]`, coercing a string representation to an integer.
/// Mirrors the core's documented contract: the source may hand back port as
/// either a JSON number or a numeric string.
pub fn coerce_port(config: &ProxyConfig) -> Result<u16, PoolError> {
    match config.get("port") {
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|v| u16::try_from(v).ok())
            .ok_or(PoolError::InvalidPort),
        Some(Value::String(s)) => s.parse::<u16>().map_err(|_| PoolError::InvalidPort),
        _ => Err(PoolError::InvalidPort),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_string_port() {
        let mut cfg = ProxyConfig::new();
        cfg.insert("port".into(), json!("8443"));
        assert_eq!(coerce_port(&cfg).unwrap(), 8443);
    }

    #[test]
    fn coerces_numeric_port() {
        let mut cfg = ProxyConfig::new();
        cfg.insert("port".into(), json!(8443));
        assert_eq!(coerce_port(&cfg).unwrap(), 8443);
    }

    #[test]
    fn rejects_missing_port() {
        let cfg = ProxyConfig::new();
        assert!(matches!(coerce_port(&cfg), Err(PoolError::InvalidPort)));
    }

    #[test]
    fn registry_key_matches_contract() {
        assert_eq!(ProxyDescriptor::registry_key("1.1.1.1", 443), "1.1.1.1:443");
    }
}
