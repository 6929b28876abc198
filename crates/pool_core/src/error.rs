use thiserror::Error;

/// Error kinds shared across the registry/store/HTTP boundary.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("invalid proxy link")]
    InvalidLink,

    #[error("invalid or missing port")]
    InvalidPort,

    #[error("failed to parse proxy descriptor: {0}")]
    ParseProxy(String),

    #[error("probe failed: {0}")]
    ProbeFailed(#[from] anyhow::Error),

    #[error("store error: {0}")]
    StoreError(String),

    #[error("failed to install listener set: {0}")]
    ListenerInstallFailed(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found")]
    NotFound,
}
