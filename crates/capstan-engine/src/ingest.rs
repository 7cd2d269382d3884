//! Top-level ingestion coordinator.
//!
//! `CapabilityIngestor` owns the pool, the pipeline, the discovery dispatch,
//! per-source watchers, the expiry reaper, and a results-TTL purge task. Two
//! paths feed the pipeline:
//! - synchronous `ingest_capability` calls, which wait a bounded time for an
//!   admission slot;
//! - background watcher cycles, which never wait (a busy pool defers the
//!   pack to the next poll) and skip manifests whose signature digest was
//!   already processed.
//!
//! Source registrations survive restarts through the `SourceStore`; results
//! are written once per finished instance and expire from the `ResultStore`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use capstan_core::{
    CapabilityPack, CapabilitySource, PackValidator, SandboxResults, SandboxStatus,
};
use capstan_store::{ResultStore, SourceStore, StoreError};

use crate::backend::SandboxBackend;
use crate::config::EngineConfig;
use crate::discover::DiscoveryDispatcher;
use crate::error::{EngineError, EngineResult};
use crate::pipeline::PipelineRunner;
use crate::policy::PolicyCourt;
use crate::pool::{SandboxInstance, SandboxPool};
use crate::reaper::ExpiryReaper;
use crate::sched::ScheduledTask;
use crate::watcher::SourceWatcher;

/// Outcome of one ingestion attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    /// True only when the instance completed and every executed tier passed.
    pub success: bool,

    pub sandbox_id: Option<String>,

    /// Full results for completed and failed runs; absent for timed-out
    /// instances, which persist nothing.
    pub results: Option<SandboxResults>,

    pub duration_ms: u64,

    pub error_message: Option<String>,
}

struct IngestorInner {
    config: EngineConfig,
    pool: Arc<SandboxPool>,
    validator: PackValidator,
    dispatcher: DiscoveryDispatcher,
    pipeline: PipelineRunner,
    isolation: &'static str,
    source_store: Arc<dyn SourceStore>,
    result_store: Arc<dyn ResultStore>,

    /// `source_id:pack_id` -> signature digest of the last processed
    /// manifest. Watcher cycles skip unchanged manifests.
    seen: RwLock<HashMap<String, String>>,
}

impl IngestorInner {
    /// Validate, admit, execute, persist, clean up. The shared tail of both
    /// ingestion paths.
    async fn run_pack(
        &self,
        pack: CapabilityPack,
        wait: Option<Duration>,
    ) -> EngineResult<IngestResponse> {
        let start = Instant::now();
        self.validator.validate(&pack)?;

        let instance = self.pool.admit(pack, self.isolation, wait).await?;
        let sandbox_id = instance.id.clone();
        let results = self.pipeline.execute(&instance).await;
        let status = instance.status();

        let response = match status {
            SandboxStatus::Completed | SandboxStatus::Failed => {
                // Write failures are logged, not retried; the sandbox outcome
                // stands regardless.
                if let Err(e) = self.result_store.put_results(&sandbox_id, &results).await {
                    warn!(sandbox_id = %sandbox_id, error = %e, "failed to persist sandbox results");
                }
                IngestResponse {
                    success: status == SandboxStatus::Completed && results.success,
                    sandbox_id: Some(sandbox_id.clone()),
                    error_message: results.error_message.clone(),
                    results: Some(results),
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            }
            // Reaped mid-run; nothing is persisted for timed-out instances.
            _ => IngestResponse {
                success: false,
                sandbox_id: Some(sandbox_id.clone()),
                results: None,
                duration_ms: start.elapsed().as_millis() as u64,
                error_message: Some(format!("sandbox {sandbox_id} timed out")),
            },
        };

        self.pool.cleanup(&sandbox_id).await;
        Ok(response)
    }

    /// One watcher cycle for one source.
    async fn poll_source(&self, source_id: &str) {
        let source = match self.source_store.get_source(source_id).await {
            Ok(source) => source,
            Err(e) => {
                warn!(source_id = %source_id, error = %e, "watcher failed to load source");
                return;
            }
        };
        if !source.is_active() {
            debug!(source_id = %source_id, "source disabled, poll skipped");
            return;
        }

        for pack_id in &source.filters {
            let pack = match self.dispatcher.discover(&source, pack_id).await {
                Ok(pack) => pack,
                Err(e) => {
                    warn!(source_id = %source_id, pack_id = %pack_id, error = %e, "discovery failed");
                    continue;
                }
            };

            let key = format!("{}:{pack_id}", source.id);
            let digest = pack.signature.sha256.clone();
            if self.seen.read().await.get(&key) == Some(&digest) {
                debug!(source_id = %source_id, pack_id = %pack_id, "manifest unchanged, skipped");
                continue;
            }

            match self.run_pack(pack, None).await {
                Ok(response) => {
                    self.seen.write().await.insert(key, digest);
                    info!(
                        source_id = %source_id,
                        pack_id = %pack_id,
                        success = response.success,
                        sandbox_id = response.sandbox_id.as_deref().unwrap_or(""),
                        "background ingestion finished"
                    );
                }
                Err(EngineError::PoolBusy { .. }) => {
                    debug!(source_id = %source_id, pack_id = %pack_id, "pool busy, deferred to next poll");
                }
                Err(e) => {
                    // The manifest will not change on its own; remember the
                    // digest so the rejection is not re-derived every poll.
                    self.seen.write().await.insert(key, digest);
                    warn!(source_id = %source_id, pack_id = %pack_id, error = %e, "background ingestion rejected");
                }
            }
        }

        let mut source = source;
        source.mark_synced(chrono::Utc::now());
        if let Err(e) = self.source_store.put_source(&source).await {
            warn!(source_id = %source_id, error = %e, "failed to record sync time");
        }
    }
}

/// Coordinator of capability ingestion and sandboxed validation.
pub struct CapabilityIngestor {
    inner: Arc<IngestorInner>,
    watchers: Mutex<HashMap<String, SourceWatcher>>,
    reaper: Mutex<Option<ExpiryReaper>>,
    purge_task: Mutex<Option<ScheduledTask>>,
    running: AtomicBool,
}

impl CapabilityIngestor {
    pub fn new(
        config: EngineConfig,
        source_store: Arc<dyn SourceStore>,
        result_store: Arc<dyn ResultStore>,
        backend: Arc<dyn SandboxBackend>,
        court: Arc<dyn PolicyCourt>,
    ) -> Self {
        let pool = Arc::new(SandboxPool::new(
            config.max_active,
            config.work_root.clone(),
        ));
        let isolation = backend.name();
        let pipeline = PipelineRunner::new(
            backend,
            court,
            config.policy_fail_open,
            config.default_timeout,
        );
        let validator = PackValidator::new(config.trusted_issuers.clone());

        Self {
            inner: Arc::new(IngestorInner {
                config,
                pool,
                validator,
                dispatcher: DiscoveryDispatcher::new(),
                pipeline,
                isolation,
                source_store,
                result_store,
                seen: RwLock::new(HashMap::new()),
            }),
            watchers: Mutex::new(HashMap::new()),
            reaper: Mutex::new(None),
            purge_task: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start background machinery: watchers for persisted sources, the
    /// expiry reaper, and the results-TTL purge sweep. Idempotent.
    pub async fn start(&self) -> EngineResult<()> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let sources = self.inner.source_store.list_sources().await?;
        info!(sources = sources.len(), "ingestion engine starting");
        for source in sources {
            if source.is_active() {
                self.spawn_watcher(&source.id).await;
            }
        }

        let mut reaper = self.reaper.lock().await;
        *reaper = Some(ExpiryReaper::spawn(
            Arc::clone(&self.inner.pool),
            self.inner.config.default_timeout,
            self.inner.config.reaper_interval,
        ));

        let store = Arc::clone(&self.inner.result_store);
        let mut purge_task = self.purge_task.lock().await;
        *purge_task = Some(ScheduledTask::spawn(
            "results-purge",
            self.inner.config.reaper_interval,
            move || {
                let store = Arc::clone(&store);
                async move {
                    match store.purge_expired().await {
                        Ok(0) => {}
                        Ok(purged) => info!(purged, "expired sandbox results purged"),
                        Err(e) => warn!(error = %e, "results purge failed"),
                    }
                }
            },
        ));
        Ok(())
    }

    /// Stop watchers, the reaper, and the purge task, then drain the pool.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        info!("ingestion engine stopping");

        let watchers = std::mem::take(&mut *self.watchers.lock().await);
        for (_, watcher) in watchers {
            watcher.shutdown().await;
        }
        if let Some(reaper) = self.reaper.lock().await.take() {
            reaper.shutdown().await;
        }
        if let Some(task) = self.purge_task.lock().await.take() {
            task.shutdown().await;
        }
        self.inner.pool.drain().await;
    }

    async fn spawn_watcher(&self, source_id: &str) {
        let inner = Arc::clone(&self.inner);
        let id = source_id.to_string();
        let watcher = SourceWatcher::spawn(
            source_id,
            self.inner.config.poll_interval,
            move || {
                let inner = Arc::clone(&inner);
                let id = id.clone();
                async move {
                    inner.poll_source(&id).await;
                }
            },
        );
        self.watchers
            .lock()
            .await
            .insert(source_id.to_string(), watcher);
    }

    // -----------------------------------------------------------------------
    // Source registry
    // -----------------------------------------------------------------------

    /// Register (or replace) a capability source and start watching it.
    pub async fn add_source(&self, source: CapabilitySource) -> EngineResult<String> {
        let id = source.id.clone();
        self.inner.source_store.put_source(&source).await?;
        info!(source_id = %id, source_type = %source.source_type, url = %source.url, "source registered");

        if self.running.load(Ordering::SeqCst) && source.is_active() {
            // Replace any existing watcher for this ID
            if let Some(old) = self.watchers.lock().await.remove(&id) {
                old.shutdown().await;
            }
            self.spawn_watcher(&id).await;
        }
        Ok(id)
    }

    /// Remove a source: stop its watcher, delete the persisted row, and
    /// forget its processed-manifest digests.
    pub async fn remove_source(&self, id: &str) -> EngineResult<()> {
        if let Some(watcher) = self.watchers.lock().await.remove(id) {
            watcher.shutdown().await;
        }
        self.inner.source_store.delete_source(id).await?;

        let prefix = format!("{id}:");
        self.inner
            .seen
            .write()
            .await
            .retain(|key, _| !key.starts_with(&prefix));

        info!(source_id = %id, "source removed");
        Ok(())
    }

    pub async fn get_source(&self, id: &str) -> EngineResult<CapabilitySource> {
        self.inner
            .source_store
            .get_source(id)
            .await
            .map_err(|e| match e {
                StoreError::SourceNotFound(_) => EngineError::SourceNotFound(id.to_string()),
                other => other.into(),
            })
    }

    pub async fn list_sources(&self) -> EngineResult<Vec<CapabilitySource>> {
        Ok(self.inner.source_store.list_sources().await?)
    }

    // -----------------------------------------------------------------------
    // Ingestion
    // -----------------------------------------------------------------------

    /// Synchronous ingestion: discover `pack_id` from `source_id`, validate,
    /// execute in a sandbox, and persist the results.
    ///
    /// Waits up to `admission_wait` for a pool slot. Validation rejections
    /// and a full pool surface as errors before any sandbox exists.
    pub async fn ingest_capability(
        &self,
        source_id: &str,
        pack_id: &str,
    ) -> EngineResult<IngestResponse> {
        let source = self.get_source(source_id).await?;
        let pack = self.inner.dispatcher.discover(&source, pack_id).await?;
        self.inner
            .run_pack(pack, Some(self.inner.config.admission_wait))
            .await
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Snapshot of instances currently between admission and cleanup.
    pub async fn list_sandboxes(&self) -> Vec<Arc<SandboxInstance>> {
        self.inner.pool.list().await
    }

    pub async fn get_sandbox_status(&self, sandbox_id: &str) -> EngineResult<SandboxStatus> {
        self.inner
            .pool
            .get(sandbox_id)
            .await
            .map(|instance| instance.status())
            .ok_or_else(|| EngineError::SandboxNotFound(sandbox_id.to_string()))
    }

    /// Persisted results for a finished sandbox (absent once expired).
    pub async fn get_results(&self, sandbox_id: &str) -> EngineResult<SandboxResults> {
        Ok(self.inner.result_store.get_results(sandbox_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    use capstan_core::{SourceType, TestSuites};
    use capstan_store::{MemoryResultStore, MemorySourceStore};

    use crate::backend::StaticBackend;
    use crate::policy::StaticCourt;

    fn signed_pack(id: &str) -> CapabilityPack {
        let mut pack: CapabilityPack = serde_json::from_value(serde_json::json!({
            "kind": "Capability",
            "metadata": { "id": id, "issuer": "acme" },
            "spec": { "purpose": "ingest fixture" },
            "signature": {}
        }))
        .unwrap();
        pack.spec.tests = TestSuites {
            unit: vec!["t1".to_string()],
            ..Default::default()
        };
        pack.self_sign("acme").unwrap();
        pack
    }

    fn write_pack(root: &Path, pack_id: &str, pack: &CapabilityPack) {
        let dir = root.join(pack_id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("capability.yaml"),
            serde_yaml::to_string(pack).unwrap(),
        )
        .unwrap();
    }

    fn test_ingestor(work_root: &Path) -> CapabilityIngestor {
        CapabilityIngestor::new(
            EngineConfig {
                work_root: work_root.to_path_buf(),
                ..EngineConfig::default()
            },
            Arc::new(MemorySourceStore::new()),
            Arc::new(MemoryResultStore::new()),
            Arc::new(StaticBackend),
            Arc::new(StaticCourt { pass: true }),
        )
    }

    #[tokio::test]
    async fn test_poll_marks_manifest_seen() {
        let source_dir = tempfile::tempdir().unwrap();
        let work_root = tempfile::tempdir().unwrap();
        write_pack(source_dir.path(), "cap-a", &signed_pack("cap-a"));

        let ingestor = test_ingestor(work_root.path());
        let source = CapabilitySource::new(
            SourceType::Filesystem,
            source_dir.path().to_string_lossy().to_string(),
        )
        .with_filters(vec!["cap-a".to_string()]);
        let source_id = ingestor.add_source(source).await.unwrap();

        ingestor.inner.poll_source(&source_id).await;
        assert_eq!(ingestor.inner.seen.read().await.len(), 1);

        // Unchanged manifest: the second cycle skips it, the digest stays
        ingestor.inner.poll_source(&source_id).await;
        assert_eq!(ingestor.inner.seen.read().await.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_source_evicts_seen_digests() {
        let source_dir = tempfile::tempdir().unwrap();
        let work_root = tempfile::tempdir().unwrap();
        write_pack(source_dir.path(), "cap-a", &signed_pack("cap-a"));
        write_pack(source_dir.path(), "cap-b", &signed_pack("cap-b"));

        let ingestor = test_ingestor(work_root.path());
        let source = CapabilitySource::new(
            SourceType::Filesystem,
            source_dir.path().to_string_lossy().to_string(),
        )
        .with_filters(vec!["cap-a".to_string(), "cap-b".to_string()]);
        let source_id = ingestor.add_source(source).await.unwrap();

        ingestor.inner.poll_source(&source_id).await;
        assert_eq!(ingestor.inner.seen.read().await.len(), 2);

        ingestor.remove_source(&source_id).await.unwrap();
        assert!(ingestor.inner.seen.read().await.is_empty());

        // Re-registering the same source starts from a clean slate
        let again = CapabilitySource::new(
            SourceType::Filesystem,
            source_dir.path().to_string_lossy().to_string(),
        )
        .with_filters(vec!["cap-a".to_string()]);
        let again_id = ingestor.add_source(again).await.unwrap();
        ingestor.inner.poll_source(&again_id).await;
        assert_eq!(ingestor.inner.seen.read().await.len(), 1);
    }
}
