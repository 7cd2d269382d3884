//! Storage trait definitions for the ingestion engine.
//!
//! Two contracts cover everything the engine persists:
//! - `SourceStore`: registered capability sources, keyed `source:<id>`
//! - `ResultStore`: sandbox results, keyed `sandbox_results:<id>`, bounded TTL
//!
//! All traits are async and backend-agnostic. In-memory fakes are provided
//! for testing via the `memory` module. Writes are at-least-once: the engine
//! logs (and does not retry) a failed result write.

use async_trait::async_trait;

use capstan_core::{CapabilitySource, SandboxResults};

use crate::error::StoreError;

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// TTL applied to persisted sandbox results (24 hours).
pub const RESULT_TTL_SECS: u64 = 24 * 60 * 60;

/// Durable registry of capability sources.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Insert or replace a source under `source:<id>`.
    async fn put_source(&self, source: &CapabilitySource) -> StoreResult<()>;

    /// Fetch a source by ID. Returns `StoreError::SourceNotFound` if absent.
    async fn get_source(&self, id: &str) -> StoreResult<CapabilitySource>;

    /// Delete a source by ID. No-op if absent.
    async fn delete_source(&self, id: &str) -> StoreResult<()>;

    /// List all persisted sources.
    async fn list_sources(&self) -> StoreResult<Vec<CapabilitySource>>;
}

/// Durable store of sandbox results with a bounded TTL.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Persist results under `sandbox_results:<sandbox_id>`.
    ///
    /// Results are written exactly once per instance by the engine; a
    /// repeated write for the same ID replaces the row (at-least-once
    /// semantics at the store boundary).
    async fn put_results(&self, sandbox_id: &str, results: &SandboxResults) -> StoreResult<()>;

    /// Fetch results by sandbox ID. Expired rows read as absent.
    async fn get_results(&self, sandbox_id: &str) -> StoreResult<SandboxResults>;

    /// Delete results by sandbox ID. No-op if absent.
    async fn delete_results(&self, sandbox_id: &str) -> StoreResult<()>;

    /// Remove rows past their TTL; returns the number purged.
    async fn purge_expired(&self) -> StoreResult<usize>;
}

/// Storage key for a source row.
pub fn source_key(id: &str) -> String {
    format!("source:{id}")
}

/// Storage key for a sandbox results row.
pub fn results_key(sandbox_id: &str) -> String {
    format!("sandbox_results:{sandbox_id}")
}
