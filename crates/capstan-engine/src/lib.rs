//! Capstan Engine - Capability Ingestion & Sandboxed Validation
//!
//! Provides the ingestion coordinator and everything it owns:
//! - Source adapters behind a single `Discoverer` dispatch
//! - Admission-controlled sandbox pool (hard `max_active` bound)
//! - Four-stage pipeline runner (SBOM, tiered tests, risk, performance)
//! - Per-source watchers and the expiry reaper on shared scheduled-task
//!   plumbing
//! - Policy court client for the constitutional test tier

pub mod backend;
pub mod config;
pub mod discover;
pub mod error;
pub mod ingest;
pub mod pipeline;
pub mod policy;
pub mod pool;
pub mod reaper;
pub mod sched;
pub mod watcher;

// Re-export key types
pub use backend::{ProcessBackend, SandboxBackend, StaticBackend, TestOutcome};
pub use config::EngineConfig;
pub use discover::{DiscoveryDispatcher, DiscoveryError, Discoverer};
pub use error::{EngineError, EngineResult};
pub use ingest::{CapabilityIngestor, IngestResponse};
pub use pipeline::PipelineRunner;
pub use policy::{CourtVerdict, HttpPolicyCourt, NullCourt, PolicyCourt, PolicyError, StaticCourt};
pub use pool::{SandboxInstance, SandboxPool};
pub use reaper::ExpiryReaper;
pub use sched::ScheduledTask;
pub use watcher::SourceWatcher;
