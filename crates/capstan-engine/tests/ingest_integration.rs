//! End-to-end ingestion scenarios against in-memory stores and the
//! deterministic static backend.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use capstan_core::{CapabilityPack, CapabilitySource, SourceType, TestSuites, CAPABILITY_KIND};
use capstan_engine::{
    CapabilityIngestor, EngineConfig, EngineError, StaticBackend, StaticCourt,
};
use capstan_store::{MemoryResultStore, MemorySourceStore, ResultStore, SourceStore};

fn signed_pack(id: &str, tests: TestSuites) -> CapabilityPack {
    let mut pack: CapabilityPack = serde_json::from_value(serde_json::json!({
        "kind": CAPABILITY_KIND,
        "api_version": "v1",
        "metadata": {
            "id": id,
            "version": "1.0.0",
            "issuer": "acme",
            "dependencies": ["libfoo@1.2"]
        },
        "spec": { "purpose": "integration fixture" },
        "signature": {}
    }))
    .unwrap();
    pack.spec.tests = tests;
    pack.self_sign("acme").unwrap();
    pack
}

fn write_pack(root: &Path, pack_id: &str, pack: &CapabilityPack) {
    let dir = root.join(pack_id);
    std::fs::create_dir_all(&dir).unwrap();
    let yaml = serde_yaml::to_string(pack).unwrap();
    std::fs::write(dir.join("capability.yaml"), yaml).unwrap();
}

struct Harness {
    ingestor: Arc<CapabilityIngestor>,
    result_store: Arc<MemoryResultStore>,
    source_store: Arc<MemorySourceStore>,
    source_dir: tempfile::TempDir,
    work_root: tempfile::TempDir,
}

impl Harness {
    fn new(tune: impl FnOnce(&mut EngineConfig)) -> Self {
        let source_dir = tempfile::tempdir().unwrap();
        let work_root = tempfile::tempdir().unwrap();

        let mut config = EngineConfig {
            work_root: work_root.path().to_path_buf(),
            admission_wait: Duration::from_millis(50),
            ..EngineConfig::default()
        };
        tune(&mut config);

        let source_store = Arc::new(MemorySourceStore::new());
        let result_store = Arc::new(MemoryResultStore::new());
        let ingestor = Arc::new(CapabilityIngestor::new(
            config,
            source_store.clone() as Arc<dyn SourceStore>,
            result_store.clone() as Arc<dyn ResultStore>,
            Arc::new(StaticBackend),
            Arc::new(StaticCourt { pass: true }),
        ));

        Self {
            ingestor,
            result_store,
            source_store,
            source_dir,
            work_root,
        }
    }

    async fn add_filesystem_source(&self, filters: &[&str]) -> String {
        let source = CapabilitySource::new(
            SourceType::Filesystem,
            self.source_dir.path().to_string_lossy().to_string(),
        )
        .with_filters(filters.iter().map(|s| s.to_string()).collect());
        self.ingestor.add_source(source).await.unwrap()
    }
}

#[tokio::test]
async fn test_happy_path_ingestion() {
    let h = Harness::new(|_| {});
    let pack = signed_pack(
        "cap-happy",
        TestSuites {
            unit: vec!["u1".to_string(), "u2".to_string()],
            constitutional: vec!["c1".to_string()],
            ..Default::default()
        },
    );
    write_pack(h.source_dir.path(), "cap-happy", &pack);
    let source_id = h.add_filesystem_source(&["cap-happy"]).await;

    let response = h
        .ingestor
        .ingest_capability(&source_id, "cap-happy")
        .await
        .unwrap();

    assert!(response.success);
    let sandbox_id = response.sandbox_id.unwrap();
    let results = response.results.unwrap();
    assert!(results.test_results["unit"].passed);
    assert!(results.test_results["constitutional"].passed);
    assert!(results.sbom.is_some());
    assert!(results.risk.is_some());

    // Results persisted, instance cleaned up
    let stored = h.result_store.get_results(&sandbox_id).await.unwrap();
    assert!(stored.success);
    assert!(h.ingestor.list_sandboxes().await.is_empty());
}

#[tokio::test]
async fn test_invalid_signature_rejected_before_sandbox() {
    let h = Harness::new(|_| {});
    // Signed, then tampered: recorded digest no longer matches content
    let mut pack = signed_pack("cap-bad", TestSuites::default());
    pack.spec.purpose = "tampered after signing".to_string();
    write_pack(h.source_dir.path(), "cap-bad", &pack);
    let source_id = h.add_filesystem_source(&["cap-bad"]).await;

    let err = h
        .ingestor
        .ingest_capability(&source_id, "cap-bad")
        .await
        .unwrap_err();

    assert!(matches!(err, EngineError::Validation(_)));
    assert!(err.to_string().to_lowercase().contains("digest"));
    // No sandbox was ever created
    assert!(h.ingestor.list_sandboxes().await.is_empty());
    assert!(!h.work_root.path().join("anything").exists());
}

#[tokio::test]
async fn test_missing_signature_fields_rejected() {
    let h = Harness::new(|_| {});
    let mut pack = signed_pack("cap-unsigned", TestSuites::default());
    pack.signature.issuer.clear();
    write_pack(h.source_dir.path(), "cap-unsigned", &pack);
    let source_id = h.add_filesystem_source(&["cap-unsigned"]).await;

    let err = h
        .ingestor
        .ingest_capability(&source_id, "cap-unsigned")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("signature"));
    assert!(h.ingestor.list_sandboxes().await.is_empty());
}

#[tokio::test]
async fn test_admission_bound_under_concurrency() {
    let h = Harness::new(|config| {
        config.max_active = 1;
        config.admission_wait = Duration::from_millis(50);
    });
    let slow = signed_pack(
        "cap-slow",
        TestSuites {
            unit: vec!["sleep:400".to_string()],
            ..Default::default()
        },
    );
    write_pack(h.source_dir.path(), "cap-slow", &slow);
    let fast = signed_pack(
        "cap-fast",
        TestSuites {
            unit: vec!["u1".to_string()],
            ..Default::default()
        },
    );
    write_pack(h.source_dir.path(), "cap-fast", &fast);
    let source_id = h.add_filesystem_source(&["cap-slow", "cap-fast"]).await;

    let first = {
        let ingestor = h.ingestor.clone();
        let source_id = source_id.clone();
        tokio::spawn(async move { ingestor.ingest_capability(&source_id, "cap-slow").await })
    };
    // Let the slow run take the only slot
    tokio::time::sleep(Duration::from_millis(100)).await;

    let second = h.ingestor.ingest_capability(&source_id, "cap-fast").await;
    assert!(matches!(
        second.unwrap_err(),
        EngineError::PoolBusy { max_active: 1 }
    ));

    let first = first.await.unwrap().unwrap();
    assert!(first.success);

    // Slot freed after cleanup
    let retry = h
        .ingestor
        .ingest_capability(&source_id, "cap-fast")
        .await
        .unwrap();
    assert!(retry.success);
}

#[tokio::test]
async fn test_reaper_times_out_hung_sandbox() {
    let h = Harness::new(|config| {
        config.max_active = 1;
        config.default_timeout = Duration::from_millis(50);
        config.reaper_interval = Duration::from_millis(10);
    });
    let hung = signed_pack(
        "cap-hung",
        TestSuites {
            unit: vec!["sleep:2000".to_string()],
            ..Default::default()
        },
    );
    write_pack(h.source_dir.path(), "cap-hung", &hung);
    let source_id = h.add_filesystem_source(&["cap-hung"]).await;

    h.ingestor.start().await.unwrap();
    let response = h
        .ingestor
        .ingest_capability(&source_id, "cap-hung")
        .await
        .unwrap();
    h.ingestor.stop().await;

    assert!(!response.success);
    let sandbox_id = response.sandbox_id.unwrap();
    assert!(response.error_message.unwrap().contains("timed out"));
    assert!(response.results.is_none());

    // Nothing persisted for a reaped instance; work dir is gone
    assert!(h.result_store.get_results(&sandbox_id).await.is_err());
    assert!(!h.work_root.path().join(&sandbox_id).exists());
    assert!(h.ingestor.list_sandboxes().await.is_empty());
}

#[tokio::test]
async fn test_watcher_polls_and_records_sync() {
    let h = Harness::new(|config| {
        config.poll_interval = Duration::from_millis(20);
    });
    let pack = signed_pack(
        "cap-watched",
        TestSuites {
            unit: vec!["u1".to_string()],
            ..Default::default()
        },
    );
    write_pack(h.source_dir.path(), "cap-watched", &pack);
    let source_id = h.add_filesystem_source(&["cap-watched"]).await;

    h.ingestor.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    h.ingestor.stop().await;

    let source = h.ingestor.get_source(&source_id).await.unwrap();
    assert!(source.last_sync.is_some());
    // The background run left no active instances behind
    assert!(h.ingestor.list_sandboxes().await.is_empty());
}

#[tokio::test]
async fn test_remove_source_stops_ingestion() {
    let h = Harness::new(|config| {
        config.poll_interval = Duration::from_millis(20);
    });
    let pack = signed_pack(
        "cap-removed",
        TestSuites {
            unit: vec!["u1".to_string()],
            ..Default::default()
        },
    );
    write_pack(h.source_dir.path(), "cap-removed", &pack);
    let source_id = h.add_filesystem_source(&["cap-removed"]).await;

    h.ingestor.start().await.unwrap();
    h.ingestor.remove_source(&source_id).await.unwrap();

    let err = h.ingestor.get_source(&source_id).await.unwrap_err();
    assert!(matches!(err, EngineError::SourceNotFound(_)));
    assert!(h.source_store.list_sources().await.unwrap().is_empty());

    // A changed manifest after removal is never picked up
    let changed = signed_pack(
        "cap-removed",
        TestSuites {
            unit: vec!["u2".to_string()],
            ..Default::default()
        },
    );
    write_pack(h.source_dir.path(), "cap-removed", &changed);
    tokio::time::sleep(Duration::from_millis(100)).await;
    h.ingestor.stop().await;
    assert!(h.ingestor.list_sandboxes().await.is_empty());
}

#[tokio::test]
async fn test_failing_tests_persist_failed_results() {
    let h = Harness::new(|_| {});
    let pack = signed_pack(
        "cap-flaky",
        TestSuites {
            unit: vec!["u1".to_string(), "u-fail".to_string()],
            ..Default::default()
        },
    );
    write_pack(h.source_dir.path(), "cap-flaky", &pack);
    let source_id = h.add_filesystem_source(&["cap-flaky"]).await;

    let response = h
        .ingestor
        .ingest_capability(&source_id, "cap-flaky")
        .await
        .unwrap();

    assert!(!response.success);
    let sandbox_id = response.sandbox_id.unwrap();
    let stored = h.result_store.get_results(&sandbox_id).await.unwrap();
    assert!(!stored.success);
    assert_eq!(stored.exit_code, 1);
    assert!(!stored.test_results["unit"].passed);
}

#[tokio::test]
async fn test_unknown_source_and_pack_are_typed_errors() {
    let h = Harness::new(|_| {});
    let err = h
        .ingestor
        .ingest_capability("no-such-source", "cap-x")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::SourceNotFound(_)));

    let source_id = h.add_filesystem_source(&[]).await;
    let err = h
        .ingestor
        .ingest_capability(&source_id, "cap-missing")
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Discovery(_)));
}
