//! Sandbox execution status and results.
//!
//! A sandbox instance is one bounded execution attempt of one pack. Its
//! status moves `created -> running -> {completed | failed | timeout}`;
//! the three terminal states are cleanup-eligible and final.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::risk::RiskReport;
use crate::sbom::Sbom;

/// Lifecycle status of a sandbox instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    /// Admitted, pipeline not yet started.
    Created,
    /// Pipeline executing.
    Running,
    /// Pipeline finished (regardless of test success).
    Completed,
    /// Pipeline raised an unrecoverable error before producing results.
    Failed,
    /// Forced terminal state set by the expiry reaper.
    Timeout,
}

impl SandboxStatus {
    /// Whether the instance is eligible for cleanup.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Timeout)
    }
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Outcome of one declared test identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TestRecord {
    pub id: String,
    pub passed: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Aggregated result of one test tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TierResult {
    /// AND over the tier's individual tests (and the court verdict for the
    /// constitutional tier).
    pub passed: bool,

    /// Number of tests run in this tier.
    pub count: usize,

    pub tests: Vec<TestRecord>,

    /// Policy court verdict, recorded only for the constitutional tier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verdict: Option<serde_json::Value>,
}

impl TierResult {
    /// Build a tier result from individual test records.
    pub fn from_tests(tests: Vec<TestRecord>) -> Self {
        Self {
            passed: tests.iter().all(|t| t.passed),
            count: tests.len(),
            tests,
            verdict: None,
        }
    }
}

/// Best-effort runtime performance sample of the sandboxed execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSample {
    pub cpu_percent: f64,
    pub memory_mb: f64,
    pub disk_mb: f64,
    pub network_kb: f64,
    pub latency_ms: f64,
    pub throughput_rps: f64,
    pub error_rate: f64,
}

/// Output of one complete pipeline run. Written exactly once per instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SandboxResults {
    /// Logical AND across all declared, non-empty test tiers that ran.
    pub success: bool,

    /// Bill of materials; `None` when generation soft-failed.
    pub sbom: Option<Sbom>,

    /// Per-tier results keyed by tier name.
    pub test_results: BTreeMap<String, TierResult>,

    pub risk: Option<RiskReport>,

    pub performance: Option<PerformanceSample>,

    #[serde(default)]
    pub artifacts: Vec<String>,

    #[serde(default)]
    pub logs: Vec<String>,

    pub duration_ms: u64,

    pub exit_code: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SandboxResults {
    /// Empty results shell, filled in stage by stage.
    pub fn empty() -> Self {
        Self {
            success: false,
            sbom: None,
            test_results: BTreeMap::new(),
            risk: None,
            performance: None,
            artifacts: Vec::new(),
            logs: Vec::new(),
            duration_ms: 0,
            exit_code: 0,
            error_message: None,
        }
    }

    /// Number of tests run across all tiers.
    pub fn total_tests(&self) -> usize {
        self.test_results.values().map(|t| t.count).sum()
    }
}
