mod descriptor;
mod error;
mod ip_risk;

pub use descriptor::{coerce_port, ProxyConfig, ProxyDescriptor};
pub use error::PoolError;
pub use ip_risk::IpRiskScore;
