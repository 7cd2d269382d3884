//! Expiry reaper for overdue sandbox instances.
//!
//! The pipeline has no internal timeout; this periodic sweep bounds instance
//! lifetime from outside. Any non-terminal instance older than the timeout
//! is forced to `timeout` and cleaned up, returning its admission slot. A
//! pipeline still running for a reaped instance finds `finish` refusing its
//! results and discards them.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use capstan_core::SandboxStatus;

use crate::pool::SandboxPool;
use crate::sched::ScheduledTask;

/// Background sweep marking overdue instances as timed out.
pub struct ExpiryReaper {
    task: ScheduledTask,
}

impl ExpiryReaper {
    /// Spawn a reaper sweeping `pool` every `interval` for instances older
    /// than `timeout`.
    pub fn spawn(pool: Arc<SandboxPool>, timeout: Duration, interval: Duration) -> Self {
        info!(
            timeout_secs = timeout.as_secs(),
            interval_secs = interval.as_secs(),
            "expiry reaper started"
        );
        let task = ScheduledTask::spawn("reaper", interval, move || {
            let pool = pool.clone();
            async move {
                sweep(&pool, timeout).await;
            }
        });
        Self { task }
    }

    pub fn stop(&self) {
        self.task.stop();
    }

    pub async fn shutdown(self) {
        self.task.shutdown().await;
    }
}

/// One reaper pass. Returns the number of instances reaped.
pub async fn sweep(pool: &SandboxPool, timeout: Duration) -> usize {
    let timeout = chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::MAX);
    let mut reaped = 0;
    for instance in pool.list().await {
        if instance.status().is_terminal() || instance.age() <= timeout {
            continue;
        }
        warn!(
            sandbox_id = %instance.id,
            capability_id = %instance.capability.metadata.id,
            age_secs = instance.age().num_seconds(),
            "sandbox exceeded timeout, reaping"
        );
        // A concurrent pipeline completion may win; its terminal state stands.
        if instance.finish(SandboxStatus::Timeout, None) {
            reaped += 1;
        }
        pool.cleanup(&instance.id).await;
    }
    reaped
}
