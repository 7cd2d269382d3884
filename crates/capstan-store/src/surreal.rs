//! SurrealDB-backed implementation of the storage traits.
//!
//! Rows carry the wire key (`source:<id>` / `sandbox_results:<id>`) alongside
//! the JSON body, converting to/from domain types at the boundary. Result
//! rows carry an `expires_at` and are purged lazily on read plus in bulk via
//! [`ResultStore::purge_expired`].

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use capstan_core::{CapabilitySource, SandboxResults};

use crate::error::StoreError;
use crate::traits::{results_key, source_key, ResultStore, SourceStore, StoreResult, RESULT_TTL_SECS};

/// SurrealDB-backed implementation of [`SourceStore`] and [`ResultStore`].
pub struct SurrealStore {
    db: Surreal<Any>,
    result_ttl: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct SourceRow {
    key: String,
    source_id: String,
    body: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize)]
struct ResultRow {
    key: String,
    sandbox_id: String,
    body: serde_json::Value,
    expires_at: DateTime<Utc>,
}

impl SurrealStore {
    /// Create an in-memory instance for testing.
    ///
    /// Connects to `mem://`, selects `capstan/main`, and initialises the
    /// schema.
    pub async fn in_memory() -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        db.use_ns("capstan")
            .use_db("main")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        init_schema(&db).await?;

        info!("SurrealStore connected (in-memory)");
        Ok(Self {
            db,
            result_ttl: Duration::seconds(RESULT_TTL_SECS as i64),
        })
    }

    /// Create from the environment.
    ///
    /// Connects to `SURREALDB_URL` if set; otherwise falls back to local
    /// persistence under `.capstan/db`.
    pub async fn from_env() -> crate::Result<Self> {
        let url = match std::env::var("SURREALDB_URL") {
            Ok(url) => url,
            Err(_) => {
                let path = ".capstan/db";
                std::fs::create_dir_all(path).map_err(|e| {
                    StoreError::Connection(format!(
                        "failed to create database directory {path}: {e}"
                    ))
                })?;
                let url = format!("surrealkv://{path}");
                info!("SURREALDB_URL not set, using local persistence: {url}");
                url
            }
        };

        let db = surrealdb::engine::any::connect(&url)
            .await
            .map_err(|e| StoreError::Connection(format!("failed to connect to {url}: {e}")))?;

        db.use_ns("capstan")
            .use_db("main")
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        init_schema(&db).await?;
        info!("SurrealStore connected ({url})");
        Ok(Self {
            db,
            result_ttl: Duration::seconds(RESULT_TTL_SECS as i64),
        })
    }

    /// Override the result TTL (tests exercising expiry).
    pub fn with_result_ttl(mut self, ttl: Duration) -> Self {
        self.result_ttl = ttl;
        self
    }
}

/// Initialise the `sources` and `sandbox_results` tables.
///
/// Safe to call multiple times (idempotent).
async fn init_schema(db: &Surreal<Any>) -> crate::Result<()> {
    debug!("initialising capstan schema");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS sources SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_source_id ON TABLE sources COLUMNS source_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS sandbox_results SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_sandbox_id ON TABLE sandbox_results COLUMNS sandbox_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_expires_at ON TABLE sandbox_results COLUMNS expires_at;
    "#;

    db.query(sql).await?;
    debug!("capstan schema ready");
    Ok(())
}

#[async_trait]
impl SourceStore for SurrealStore {
    async fn put_source(&self, source: &CapabilitySource) -> StoreResult<()> {
        let row = SourceRow {
            key: source_key(&source.id),
            source_id: source.id.clone(),
            body: serde_json::to_value(source)?,
        };
        self.db
            .query("DELETE FROM sources WHERE source_id = $sid; CREATE sources CONTENT $row;")
            .bind(("sid", source.id.clone()))
            .bind(("row", row))
            .await?;
        debug!(source_id = %source.id, "source persisted");
        Ok(())
    }

    async fn get_source(&self, id: &str) -> StoreResult<CapabilitySource> {
        let mut res = self
            .db
            .query("SELECT * FROM sources WHERE source_id = $sid")
            .bind(("sid", id.to_string()))
            .await?;
        let rows: Vec<SourceRow> = res.take(0)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::SourceNotFound(id.to_string()))?;
        Ok(serde_json::from_value(row.body)?)
    }

    async fn delete_source(&self, id: &str) -> StoreResult<()> {
        self.db
            .query("DELETE FROM sources WHERE source_id = $sid")
            .bind(("sid", id.to_string()))
            .await?;
        Ok(())
    }

    async fn list_sources(&self) -> StoreResult<Vec<CapabilitySource>> {
        let mut res = self.db.query("SELECT * FROM sources").await?;
        let rows: Vec<SourceRow> = res.take(0)?;
        let mut sources = rows
            .into_iter()
            .map(|r| serde_json::from_value(r.body).map_err(StoreError::from))
            .collect::<StoreResult<Vec<CapabilitySource>>>()?;
        sources.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(sources)
    }
}

#[async_trait]
impl ResultStore for SurrealStore {
    async fn put_results(&self, sandbox_id: &str, results: &SandboxResults) -> StoreResult<()> {
        let row = ResultRow {
            key: results_key(sandbox_id),
            sandbox_id: sandbox_id.to_string(),
            body: serde_json::to_value(results)?,
            expires_at: Utc::now() + self.result_ttl,
        };
        self.db
            .query(
                "DELETE FROM sandbox_results WHERE sandbox_id = $sid; \
                 CREATE sandbox_results CONTENT $row;",
            )
            .bind(("sid", sandbox_id.to_string()))
            .bind(("row", row))
            .await?;
        debug!(sandbox_id = %sandbox_id, "sandbox results persisted");
        Ok(())
    }

    async fn get_results(&self, sandbox_id: &str) -> StoreResult<SandboxResults> {
        let mut res = self
            .db
            .query("SELECT * FROM sandbox_results WHERE sandbox_id = $sid")
            .bind(("sid", sandbox_id.to_string()))
            .await?;
        let rows: Vec<ResultRow> = res.take(0)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::ResultsNotFound(sandbox_id.to_string()))?;

        if row.expires_at <= Utc::now() {
            // Lazy expiry on read.
            self.delete_results(sandbox_id).await?;
            return Err(StoreError::ResultsNotFound(sandbox_id.to_string()));
        }

        Ok(serde_json::from_value(row.body)?)
    }

    async fn delete_results(&self, sandbox_id: &str) -> StoreResult<()> {
        self.db
            .query("DELETE FROM sandbox_results WHERE sandbox_id = $sid")
            .bind(("sid", sandbox_id.to_string()))
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        let mut res = self
            .db
            .query("SELECT * FROM sandbox_results WHERE expires_at <= $now")
            .bind(("now", Utc::now()))
            .await?;
        let rows: Vec<ResultRow> = res.take(0)?;
        let count = rows.len();

        if count > 0 {
            self.db
                .query("DELETE FROM sandbox_results WHERE expires_at <= $now")
                .bind(("now", Utc::now()))
                .await?;
            info!(purged = count, "expired sandbox results purged");
        }
        Ok(count)
    }
}
