//! Domain-level error taxonomy for Capstan.

use crate::validate::ValidationError;

/// Capstan domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CapstanError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Capstan domain operations.
pub type Result<T> = std::result::Result<T, CapstanError>;
