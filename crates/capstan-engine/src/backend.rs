//! Isolation backend contract and implementations.
//!
//! The engine defines the lifecycle contract an isolation backend must
//! satisfy, not the isolation technology itself. Implement this trait to add
//! new backends (container, VM, namespace); `ProcessBackend` is the default
//! process-based one, and `StaticBackend` is a deterministic stub for tests
//! and dry runs.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use capstan_core::CapabilityPack;

use crate::error::{EngineError, EngineResult};

/// Outcome of one declared test run inside the sandbox.
#[derive(Debug, Clone)]
pub struct TestOutcome {
    pub passed: bool,
    pub detail: Option<String>,
}

/// Extension point for sandbox isolation backends.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Backend name for logging and the instance's `isolation` field.
    fn name(&self) -> &'static str;

    /// Run one declared test identifier inside the instance work directory.
    ///
    /// A failing test returns `Ok` with `passed = false`; `Err` means the
    /// backend itself broke and aborts the pipeline.
    async fn run_test(
        &self,
        pack: &CapabilityPack,
        work_dir: &Path,
        tier: &str,
        test_id: &str,
        deadline: Duration,
    ) -> EngineResult<TestOutcome>;
}

// ---------------------------------------------------------------------------
// ProcessBackend
// ---------------------------------------------------------------------------

/// Executes each test identifier as a shell command inside the work dir.
///
/// The deadline is enforced with `tokio::time::timeout`; a test that
/// overruns it is reported as failed, not as a backend error, and its
/// process is killed (`kill_on_drop`) so nothing outlives the deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessBackend;

#[async_trait]
impl SandboxBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    async fn run_test(
        &self,
        _pack: &CapabilityPack,
        work_dir: &Path,
        _tier: &str,
        test_id: &str,
        deadline: Duration,
    ) -> EngineResult<TestOutcome> {
        let child = Command::new("sh")
            .arg("-c")
            .arg(test_id)
            .current_dir(work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Pipeline(format!("failed to spawn test {test_id:?}: {e}")))?;

        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(result) => {
                result.map_err(|e| EngineError::Pipeline(format!("test {test_id:?} wait: {e}")))?
            }
            Err(_) => {
                return Ok(TestOutcome {
                    passed: false,
                    detail: Some(format!("timed out after {}s", deadline.as_secs())),
                });
            }
        };

        let passed = output.status.success();
        let detail = if passed {
            None
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Some(format!(
                "exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr.trim()
            ))
        };

        Ok(TestOutcome { passed, detail })
    }
}

// ---------------------------------------------------------------------------
// StaticBackend
// ---------------------------------------------------------------------------

/// Deterministic backend for tests and dry runs.
///
/// Test identifiers drive the outcome:
/// - ids containing `"fail"` fail;
/// - `"sleep:<millis>"` sleeps before passing (simulates a slow or hung
///   sandbox for admission and reaper tests);
/// - everything else passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticBackend;

#[async_trait]
impl SandboxBackend for StaticBackend {
    fn name(&self) -> &'static str {
        "static"
    }

    async fn run_test(
        &self,
        _pack: &CapabilityPack,
        _work_dir: &Path,
        _tier: &str,
        test_id: &str,
        _deadline: Duration,
    ) -> EngineResult<TestOutcome> {
        if let Some(millis) = test_id.strip_prefix("sleep:") {
            let millis: u64 = millis.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }

        if test_id.contains("fail") {
            return Ok(TestOutcome {
                passed: false,
                detail: Some("static backend: declared failing".to_string()),
            });
        }
        Ok(TestOutcome {
            passed: true,
            detail: None,
        })
    }
}
