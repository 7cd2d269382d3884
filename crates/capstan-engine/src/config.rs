//! Engine configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Tunables for the ingestion engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Hard bound on concurrently active sandbox instances.
    pub max_active: usize,

    /// Interval between source watcher polls.
    pub poll_interval: Duration,

    /// Wall-clock budget per sandbox; enforced by the expiry reaper and used
    /// as the per-test deadline in the pipeline.
    pub default_timeout: Duration,

    /// Interval between expiry reaper sweeps.
    pub reaper_interval: Duration,

    /// How long a synchronous ingestion waits for a pool slot before it is
    /// rejected. Background (watcher-driven) ingestion never waits.
    pub admission_wait: Duration,

    /// When the policy court is unreachable: proceed with a warning (`true`,
    /// the inherited fail-open behaviour) or fail the constitutional tier
    /// (`false`).
    pub policy_fail_open: bool,

    /// Issuer allowlist for the validation gate; empty accepts any issuer.
    pub trusted_issuers: Vec<String>,

    /// Root directory under which per-instance work directories are created.
    pub work_root: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_active: 4,
            poll_interval: Duration::from_secs(300),
            default_timeout: Duration::from_secs(3600),
            reaper_interval: Duration::from_secs(300),
            admission_wait: Duration::from_secs(30),
            policy_fail_open: true,
            trusted_issuers: Vec::new(),
            work_root: std::env::temp_dir().join("capstan"),
        }
    }
}
