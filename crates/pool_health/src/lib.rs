mod probes;
mod scheduler;

pub use probes::{egress_ip, RiskScoreProbe};
pub use scheduler::HealthScheduler;
