use pool_core::ProxyConfig;

/// Request accepted by [`crate::Registry::add`]. Exactly one of `link` or
/// `config` is expected to be set by callers; `link` takes precedence.
#[derive(Debug, Default, Clone)]
pub struct AddRequest {
    pub link: Option<String>,
    pub config: Option<ProxyConfig>,
    pub sub_name: String,
    pub force_update: bool,
}

/// Per-request outcome counters, shared and accumulated across a whole
/// subscription ingestion fan-out.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct AddCounters {
    pub success: u32,
    pub failure: u32,
    pub exist: u32,
}

impl AddCounters {
    pub fn merge(&mut self, other: AddCounters) {
        self.success += other.success;
        self.failure += other.failure;
        self.exist += other.exist;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AddOutcome {
    Success,
    Exist,
}
