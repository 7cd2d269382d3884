//! Capstan-Store: Persistence Boundary for the Ingestion Engine
//!
//! The engine treats persistence as an external KV collaborator. This crate
//! provides:
//!
//! - `SourceStore` / `ResultStore`: async trait contracts
//! - `MemorySourceStore` / `MemoryResultStore`: in-memory fakes for testing
//! - `SurrealStore`: SurrealDB-backed implementation with TTL expiry on
//!   sandbox results
//!
//! Keys follow the wire contract: `source:<sourceID>` and
//! `sandbox_results:<sandboxID>` (JSON values, 24h result TTL).

mod error;
pub mod memory;
pub mod surreal;
pub mod traits;

pub use error::StoreError;
pub use memory::{MemoryResultStore, MemorySourceStore};
pub use surreal::SurrealStore;
pub use traits::{ResultStore, SourceStore, StoreResult, RESULT_TTL_SECS};

/// Result type for capstan-store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
