//! Capstan Core - Capability Ingestion Domain Model
//!
//! Provides the shared vocabulary of the ingestion engine:
//! - Capability sources and signed capability packs
//! - Sandbox instance status and results
//! - Pack validation (structural + signature gate)
//! - SBOM generation and declared-risk analysis
//! - Tracing initialisation for binaries

pub mod domain;
pub mod risk;
pub mod sbom;
pub mod telemetry;
pub mod validate;

// Re-export key types
pub use domain::error::{CapstanError, Result};
pub use domain::pack::{
    CapabilityPack, PackMetadata, PackSignature, PackSpec, TestSuites, CAPABILITY_KIND,
};
pub use domain::sandbox::{
    PerformanceSample, SandboxResults, SandboxStatus, TestRecord, TierResult,
};
pub use domain::source::{CapabilitySource, SourceStatus, SourceType};
pub use risk::{analyze_risks, RiskLevel, RiskReport};
pub use sbom::{generate_sbom, Sbom, SbomComponent};
pub use telemetry::init_tracing;
pub use validate::{PackValidator, ValidationError};
