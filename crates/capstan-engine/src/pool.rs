//! Admission-controlled sandbox pool.
//!
//! The pool owns every `SandboxInstance` from admission to cleanup and
//! enforces the engine's central invariant: the number of concurrently
//! active instances never exceeds `max_active`. Admission acquires an owned
//! semaphore permit that is stored inside the instance and released only at
//! cleanup, so a slot cannot be reused until its work directory and map
//! entry are gone.
//!
//! Locking discipline: the active map has its own `RwLock`; per-instance
//! mutable state (status, logs, results) sits behind a per-instance lock so
//! concurrent pipelines and the reaper never contend across instances.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

use capstan_core::{CapabilityPack, SandboxResults, SandboxStatus};

use crate::error::{EngineError, EngineResult};

#[derive(Debug)]
struct InstanceState {
    status: SandboxStatus,
    end_time: Option<DateTime<Utc>>,
    logs: Vec<String>,
    results: Option<SandboxResults>,
    permit: Option<OwnedSemaphorePermit>,
}

/// One bounded execution attempt of one capability pack.
///
/// Status transitions: `created -> running -> {completed | failed}` via the
/// pipeline, or `-> timeout` forced by the reaper. Terminal states are
/// final; a finish attempt against an already-terminal instance is refused
/// and its results are discarded by the caller.
#[derive(Debug)]
pub struct SandboxInstance {
    pub id: String,
    pub isolation: String,
    pub capability: CapabilityPack,
    pub work_dir: PathBuf,
    pub started_at: DateTime<Utc>,
    state: Mutex<InstanceState>,
}

impl SandboxInstance {
    /// Current lifecycle status.
    pub fn status(&self) -> SandboxStatus {
        self.state.lock().unwrap().status
    }

    /// End time, set when the instance reached a terminal state.
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.state.lock().unwrap().end_time
    }

    /// Wall-clock age since admission.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.started_at
    }

    /// Append a log line to the instance's append-only log.
    pub fn append_log(&self, line: impl Into<String>) {
        self.state.lock().unwrap().logs.push(line.into());
    }

    /// Take the accumulated log lines (folded into results at completion).
    pub fn drain_logs(&self) -> Vec<String> {
        std::mem::take(&mut self.state.lock().unwrap().logs)
    }

    /// Copy of the recorded results, if the pipeline finished.
    pub fn results(&self) -> Option<SandboxResults> {
        self.state.lock().unwrap().results.clone()
    }

    /// Transition `created -> running`.
    ///
    /// Returns `false` when the instance was already forced terminal (reaped
    /// before the pipeline started); the pipeline must not run in that case.
    pub(crate) fn begin_running(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.status != SandboxStatus::Created {
            return false;
        }
        state.status = SandboxStatus::Running;
        true
    }

    /// Transition to a terminal state, recording results exactly once.
    ///
    /// Returns `false` when the instance is already terminal; the caller's
    /// results (if any) are then discarded.
    pub(crate) fn finish(&self, status: SandboxStatus, results: Option<SandboxResults>) -> bool {
        debug_assert!(status.is_terminal());
        let mut state = self.state.lock().unwrap();
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        state.end_time = Some(Utc::now());
        state.results = results;
        true
    }

    fn release_permit(&self) {
        self.state.lock().unwrap().permit.take();
    }
}

/// Manager of concurrently active sandbox instances.
pub struct SandboxPool {
    max_active: usize,
    slots: Arc<Semaphore>,
    active: RwLock<HashMap<String, Arc<SandboxInstance>>>,
    work_root: PathBuf,
}

impl SandboxPool {
    /// Create a pool with a hard `max_active` admission bound.
    pub fn new(max_active: usize, work_root: PathBuf) -> Self {
        Self {
            max_active,
            slots: Arc::new(Semaphore::new(max_active)),
            active: RwLock::new(HashMap::new()),
            work_root,
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    pub fn work_root(&self) -> &PathBuf {
        &self.work_root
    }

    /// Admit a validated pack, creating its instance and work directory.
    ///
    /// `wait` bounds how long admission may block for a free slot; `None`
    /// rejects immediately when the pool is full (the background discovery
    /// path, which retries on the next poll).
    pub async fn admit(
        &self,
        pack: CapabilityPack,
        isolation: &str,
        wait: Option<Duration>,
    ) -> EngineResult<Arc<SandboxInstance>> {
        let permit = match wait {
            Some(deadline) => {
                tokio::time::timeout(deadline, Arc::clone(&self.slots).acquire_owned())
                    .await
                    .map_err(|_| EngineError::PoolBusy {
                        max_active: self.max_active,
                    })?
                    .map_err(|_| EngineError::PoolBusy {
                        max_active: self.max_active,
                    })?
            }
            None => Arc::clone(&self.slots)
                .try_acquire_owned()
                .map_err(|_| EngineError::PoolBusy {
                    max_active: self.max_active,
                })?,
        };

        let id = Uuid::new_v4().to_string();
        let work_dir = self.work_root.join(&id);
        tokio::fs::create_dir_all(&work_dir).await?;

        let instance = Arc::new(SandboxInstance {
            id: id.clone(),
            isolation: isolation.to_string(),
            capability: pack,
            work_dir,
            started_at: Utc::now(),
            state: Mutex::new(InstanceState {
                status: SandboxStatus::Created,
                end_time: None,
                logs: Vec::new(),
                results: None,
                permit: Some(permit),
            }),
        });

        let mut active = self.active.write().await;
        active.insert(id.clone(), Arc::clone(&instance));
        info!(
            sandbox_id = %id,
            capability_id = %instance.capability.metadata.id,
            active = active.len(),
            "sandbox admitted"
        );
        Ok(instance)
    }

    /// Look up an active instance by ID.
    pub async fn get(&self, id: &str) -> Option<Arc<SandboxInstance>> {
        self.active.read().await.get(id).cloned()
    }

    /// Snapshot of all active instances.
    pub async fn list(&self) -> Vec<Arc<SandboxInstance>> {
        self.active.read().await.values().cloned().collect()
    }

    /// Number of instances between admission and cleanup.
    pub async fn active_count(&self) -> usize {
        self.active.read().await.len()
    }

    /// Remove an instance: delete the map entry, remove the work directory,
    /// and release the admission slot. Idempotent.
    pub async fn cleanup(&self, id: &str) {
        let instance = self.active.write().await.remove(id);
        let Some(instance) = instance else {
            return;
        };

        if let Err(e) = tokio::fs::remove_dir_all(&instance.work_dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(sandbox_id = %id, error = %e, "failed to remove sandbox work dir");
            }
        }
        instance.release_permit();
        info!(sandbox_id = %id, status = %instance.status(), "sandbox cleaned up");
    }

    /// Force-clean every instance (engine shutdown path).
    ///
    /// Non-terminal instances are forced to `timeout` first so no instance
    /// ever leaves the pool without a terminal state.
    pub async fn drain(&self) {
        let instances = self.list().await;
        for instance in instances {
            if instance.finish(SandboxStatus::Timeout, None) {
                warn!(sandbox_id = %instance.id, "force-terminating sandbox on shutdown");
            }
            self.cleanup(&instance.id).await;
        }
    }
}
