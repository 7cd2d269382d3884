//! Periodic background task plumbing.
//!
//! Source watchers and the expiry reaper both run as interval loops with a
//! cooperative stop signal. `ScheduledTask` wraps the spawn/stop/join
//! handshake so callers only provide the per-tick closure.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A named interval loop with a stop channel.
pub struct ScheduledTask {
    name: String,
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn a loop that runs `tick` every `every` until stopped.
    ///
    /// The first tick fires after one full interval, not immediately.
    pub fn spawn<F, Fut>(name: impl Into<String>, every: Duration, tick: F) -> Self
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let name = name.into();
        let (stop, mut stop_rx) = watch::channel(false);
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // Consume the immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tick().await;
                    }
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            debug!(task = %task_name, "scheduled task stopping");
                            break;
                        }
                    }
                }
            }
        });

        Self { name, stop, handle }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Signal the loop to stop without waiting for it to exit.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Stop the loop and wait for the task to finish.
    pub async fn shutdown(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.handle.await {
            if !e.is_cancelled() {
                warn!(task = %self.name, error = %e, "scheduled task join failed");
            }
        }
    }
}
