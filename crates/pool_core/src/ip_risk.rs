use serde::{Deserialize, Serialize};

/// Cached egress-IP reputation lookup, one entry per observed IP.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IpRiskScore {
    pub ip: String,
    pub location: String,
    pub ip_type: String,
    pub native_ip: String,
    pub risk_score: String,
}
