//! Per-source polling watcher.
//!
//! One watcher per active source, spawned when the source is registered (or
//! at engine start for persisted sources) and stopped when the source is
//! removed. Each cycle the watcher discovers manifests, skips packs whose
//! signature digest was already processed, and hands new ones to the
//! ingestion path.

use std::future::Future;
use std::time::Duration;

use tracing::info;

use crate::sched::ScheduledTask;

/// Background watcher polling one capability source.
pub struct SourceWatcher {
    source_id: String,
    task: ScheduledTask,
}

impl SourceWatcher {
    /// Spawn a watcher that invokes `poll` every `poll_interval`.
    pub fn spawn<F, Fut>(source_id: impl Into<String>, poll_interval: Duration, poll: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let source_id = source_id.into();
        info!(
            source_id = %source_id,
            interval_secs = poll_interval.as_secs(),
            "source watcher started"
        );
        let task = ScheduledTask::spawn(format!("watch:{source_id}"), poll_interval, poll);
        Self { source_id, task }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn stop(&self) {
        self.task.stop();
    }

    pub async fn shutdown(self) {
        info!(source_id = %self.source_id, "source watcher stopping");
        self.task.shutdown().await;
    }
}
