//! Error types for capstan-store.

use thiserror::Error;

/// Errors that can occur in the persistence layer.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Database connection error
    #[error("store connection failed: {0}")]
    Connection(String),

    /// Database query error
    #[error("store query failed: {0}")]
    Query(String),

    /// Serialization error
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// Source not found
    #[error("source not found: {0}")]
    SourceNotFound(String),

    /// Sandbox results not found (or expired past TTL)
    #[error("sandbox results not found: {0}")]
    ResultsNotFound(String),
}

impl From<surrealdb::Error> for StoreError {
    fn from(err: surrealdb::Error) -> Self {
        StoreError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}
