//! Capstan daemon.
//!
//! Starts the ingestion engine against persisted sources and runs until
//! interrupted: watchers poll registered sources, discovered packs are
//! validated and executed in bounded sandboxes, results land in the store
//! with a bounded TTL.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, Level};

use capstan_core::init_tracing;
use capstan_engine::{
    CapabilityIngestor, EngineConfig, HttpPolicyCourt, NullCourt, PolicyCourt, ProcessBackend,
};
use capstan_store::{
    MemoryResultStore, MemorySourceStore, ResultStore, SourceStore, SurrealStore,
};

#[derive(Parser)]
#[command(name = "capstand")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Capability ingestion and sandboxed validation daemon", long_about = None)]
struct Args {
    /// Maximum concurrently active sandbox instances
    #[arg(long, env = "CAPSTAN_MAX_ACTIVE", default_value_t = 4)]
    max_active: usize,

    /// Seconds between source watcher polls
    #[arg(long, env = "CAPSTAN_POLL_INTERVAL", default_value_t = 300)]
    poll_interval_secs: u64,

    /// Wall-clock budget per sandbox, in seconds
    #[arg(long, env = "CAPSTAN_SANDBOX_TIMEOUT", default_value_t = 3600)]
    sandbox_timeout_secs: u64,

    /// Seconds between expiry reaper sweeps
    #[arg(long, env = "CAPSTAN_REAPER_INTERVAL", default_value_t = 300)]
    reaper_interval_secs: u64,

    /// Seconds a synchronous ingestion waits for a free sandbox slot
    #[arg(long, env = "CAPSTAN_ADMISSION_WAIT", default_value_t = 30)]
    admission_wait_secs: u64,

    /// Fail the constitutional tier when the policy court is unreachable
    /// (default is fail-open: proceed with a warning)
    #[arg(long, env = "CAPSTAN_FAIL_CLOSED")]
    fail_closed: bool,

    /// Trusted pack issuers, comma-separated (empty accepts any issuer)
    #[arg(long, env = "CAPSTAN_TRUSTED_ISSUERS", value_delimiter = ',')]
    trusted_issuers: Vec<String>,

    /// Policy court endpoint; omitted means no court is consulted
    #[arg(long, env = "CAPSTAN_POLICY_URL")]
    policy_url: Option<String>,

    /// Root directory for per-sandbox work directories
    #[arg(long, env = "CAPSTAN_WORK_ROOT")]
    work_root: Option<PathBuf>,

    /// Use in-memory stores instead of SurrealDB (state is lost on exit)
    #[arg(long)]
    memory_store: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn engine_config(&self) -> EngineConfig {
        let mut config = EngineConfig {
            max_active: self.max_active,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            default_timeout: Duration::from_secs(self.sandbox_timeout_secs),
            reaper_interval: Duration::from_secs(self.reaper_interval_secs),
            admission_wait: Duration::from_secs(self.admission_wait_secs),
            policy_fail_open: !self.fail_closed,
            trusted_issuers: self.trusted_issuers.clone(),
            ..EngineConfig::default()
        };
        if let Some(work_root) = &self.work_root {
            config.work_root = work_root.clone();
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(args.json, level);

    let (source_store, result_store): (Arc<dyn SourceStore>, Arc<dyn ResultStore>) =
        if args.memory_store {
            info!("using in-memory stores");
            (
                Arc::new(MemorySourceStore::new()),
                Arc::new(MemoryResultStore::new()),
            )
        } else {
            let store = Arc::new(
                SurrealStore::from_env()
                    .await
                    .context("failed to open the capstan store")?,
            );
            (store.clone(), store)
        };

    let court: Arc<dyn PolicyCourt> = match &args.policy_url {
        Some(url) => {
            info!(endpoint = %url, "policy court configured");
            Arc::new(HttpPolicyCourt::new(url.clone()))
        }
        None => Arc::new(NullCourt),
    };

    let ingestor = CapabilityIngestor::new(
        args.engine_config(),
        source_store,
        result_store,
        Arc::new(ProcessBackend),
        court,
    );

    ingestor.start().await.context("failed to start the ingestion engine")?;
    info!(
        max_active = args.max_active,
        fail_open = !args.fail_closed,
        "capstand running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for the shutdown signal")?;
    info!("shutdown signal received");
    ingestor.stop().await;
    Ok(())
}
