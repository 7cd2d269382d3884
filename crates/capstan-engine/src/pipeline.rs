//! Sandbox pipeline runner.
//!
//! Executes the four ordered stages against an instance's pack:
//! SBOM generation, tiered test execution, risk analysis, performance
//! collection. SBOM and performance failures are soft (logged, section
//! omitted); the test stage drives `results.success`; an unrecoverable
//! backend error aborts the pipeline and marks the instance `failed`.
//! The runner has no internal timeout — the expiry reaper bounds instance
//! lifetime from outside.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{debug, info, warn};

use capstan_core::{
    analyze_risks, generate_sbom, PerformanceSample, SandboxResults, SandboxStatus, TestRecord,
    TierResult,
};

use crate::backend::SandboxBackend;
use crate::policy::PolicyCourt;
use crate::pool::SandboxInstance;

/// Executes the validation pipeline inside admitted sandbox instances.
pub struct PipelineRunner {
    backend: Arc<dyn SandboxBackend>,
    court: Arc<dyn PolicyCourt>,
    fail_open: bool,
    test_deadline: Duration,
}

impl PipelineRunner {
    pub fn new(
        backend: Arc<dyn SandboxBackend>,
        court: Arc<dyn PolicyCourt>,
        fail_open: bool,
        test_deadline: Duration,
    ) -> Self {
        Self {
            backend,
            court,
            fail_open,
            test_deadline,
        }
    }

    /// Run all stages and record results on the instance.
    ///
    /// Always returns the produced results; the instance's terminal status
    /// (`completed`, `failed`, or reaper-forced `timeout`) tells the caller
    /// how the run ended.
    pub async fn execute(&self, instance: &Arc<SandboxInstance>) -> SandboxResults {
        let start = Instant::now();
        let mut results = SandboxResults::empty();

        if !instance.begin_running() {
            results.exit_code = -1;
            results.error_message =
                Some("sandbox was terminated before the pipeline started".to_string());
            return results;
        }
        info!(
            sandbox_id = %instance.id,
            capability_id = %instance.capability.metadata.id,
            "pipeline started"
        );
        let pack = &instance.capability;

        // Stage 1: SBOM generation (soft-fail)
        match generate_sbom(pack) {
            Ok(sbom) => {
                instance.append_log(format!("sbom: {} components", sbom.components.len()));
                results.sbom = Some(sbom);
            }
            Err(e) => {
                warn!(sandbox_id = %instance.id, error = %e, "sbom generation failed");
                instance.append_log(format!("sbom generation failed: {e}"));
            }
        }

        // Stage 2: tiered test execution (drives success)
        for (tier, declared) in pack.spec.tests.execution_tiers() {
            if declared.is_empty() {
                debug!(sandbox_id = %instance.id, tier, "no tests declared, tier skipped");
                continue;
            }

            let mut records = Vec::with_capacity(declared.len());
            for test_id in declared {
                let outcome = match self
                    .backend
                    .run_test(pack, &instance.work_dir, tier, test_id, self.test_deadline)
                    .await
                {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        return self.abort(
                            instance,
                            results,
                            start,
                            format!("test stage error in tier {tier:?}: {e}"),
                        );
                    }
                };
                records.push(TestRecord {
                    id: test_id.clone(),
                    passed: outcome.passed,
                    detail: outcome.detail,
                });
            }

            let mut tier_result = TierResult::from_tests(records);

            // The constitutional tier additionally consults the policy court.
            if tier == "constitutional" {
                match self.court.validate_capability(pack).await {
                    Ok(verdict) => {
                        tier_result.passed &= verdict.passed;
                        tier_result.verdict = serde_json::to_value(&verdict).ok();
                    }
                    Err(e) if self.fail_open => {
                        warn!(
                            sandbox_id = %instance.id,
                            error = %e,
                            "policy court unavailable, proceeding fail-open"
                        );
                        tier_result.verdict =
                            Some(json!({ "fail_open": true, "error": e.to_string() }));
                    }
                    Err(e) => {
                        warn!(
                            sandbox_id = %instance.id,
                            error = %e,
                            "policy court unavailable, failing constitutional tier (fail-closed)"
                        );
                        tier_result.passed = false;
                        tier_result.verdict =
                            Some(json!({ "fail_open": false, "error": e.to_string() }));
                    }
                }
            }

            instance.append_log(format!(
                "tier {tier}: {}/{} passed",
                tier_result.tests.iter().filter(|t| t.passed).count(),
                tier_result.count
            ));
            results.test_results.insert(tier.to_string(), tier_result);
        }
        results.success = results.test_results.values().all(|t| t.passed);

        // Stage 3: risk analysis
        let risk = analyze_risks(pack);
        instance.append_log(format!("risk: overall {}", risk.overall));
        results.risk = Some(risk);

        // Stage 4: performance collection (best-effort)
        results.performance = collect_performance(&instance.work_dir, &results, start.elapsed());
        if results.performance.is_none() {
            warn!(sandbox_id = %instance.id, "performance collection failed");
        }

        results.duration_ms = start.elapsed().as_millis() as u64;
        results.exit_code = if results.success { 0 } else { 1 };
        results.logs = instance.drain_logs();

        if instance.finish(SandboxStatus::Completed, Some(results.clone())) {
            info!(
                sandbox_id = %instance.id,
                success = results.success,
                duration_ms = results.duration_ms,
                "pipeline completed"
            );
        } else {
            // Reaper won the race; its terminal state stands.
            warn!(sandbox_id = %instance.id, "instance already terminal, results discarded");
            results.error_message = Some(format!(
                "sandbox reached terminal state {} during execution",
                instance.status()
            ));
        }
        results
    }

    fn abort(
        &self,
        instance: &Arc<SandboxInstance>,
        mut results: SandboxResults,
        start: Instant,
        message: String,
    ) -> SandboxResults {
        warn!(sandbox_id = %instance.id, error = %message, "pipeline aborted");
        instance.append_log(format!("pipeline aborted: {message}"));
        results.success = false;
        results.exit_code = -1;
        results.duration_ms = start.elapsed().as_millis() as u64;
        results.error_message = Some(message);
        results.logs = instance.drain_logs();
        instance.finish(SandboxStatus::Failed, Some(results.clone()));
        results
    }
}

/// Sample the sandboxed execution after the fact.
///
/// Disk is measured from the work directory; latency, throughput, and error
/// rate are derived from the test stage. CPU, memory, and network are not
/// sampled by the process backend and read as zero.
fn collect_performance(
    work_dir: &Path,
    results: &SandboxResults,
    elapsed: Duration,
) -> Option<PerformanceSample> {
    let disk_bytes = dir_size_bytes(work_dir).ok()?;
    let total = results.total_tests();
    let failed: usize = results
        .test_results
        .values()
        .map(|t| t.tests.iter().filter(|r| !r.passed).count())
        .sum();
    let secs = elapsed.as_secs_f64().max(1e-6);

    Some(PerformanceSample {
        cpu_percent: 0.0,
        memory_mb: 0.0,
        disk_mb: disk_bytes as f64 / (1024.0 * 1024.0),
        network_kb: 0.0,
        latency_ms: if total > 0 {
            elapsed.as_millis() as f64 / total as f64
        } else {
            0.0
        },
        throughput_rps: total as f64 / secs,
        error_rate: if total > 0 {
            failed as f64 / total as f64
        } else {
            0.0
        },
    })
}

fn dir_size_bytes(dir: &Path) -> std::io::Result<u64> {
    let mut total = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            total += dir_size_bytes(&entry.path())?;
        } else {
            total += meta.len();
        }
    }
    Ok(total)
}
