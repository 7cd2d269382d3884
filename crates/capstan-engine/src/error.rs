//! Engine error taxonomy.
//!
//! Discovery and persistence failures are recovered locally (logged, next
//! poll retries); validation and pipeline failures surface through the
//! `IngestResponse` contract. Nothing here escalates to a process crash.

use capstan_core::ValidationError;
use capstan_store::StoreError;

use crate::discover::DiscoveryError;
use crate::policy::PolicyError;

/// Errors produced by the ingestion engine.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("sandbox pool busy: all {max_active} slots in use")]
    PoolBusy { max_active: usize },

    #[error("pipeline error: {0}")]
    Pipeline(String),

    #[error("sandbox timed out: {0}")]
    SandboxTimeout(String),

    #[error("sandbox not found: {0}")]
    SandboxNotFound(String),

    #[error("source not found: {0}")]
    SourceNotFound(String),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations.
pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_busy_display_names_bound() {
        let err = EngineError::PoolBusy { max_active: 4 };
        assert!(err.to_string().contains('4'));
    }
}
