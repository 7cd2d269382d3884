//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemorySourceStore` and `MemoryResultStore` that satisfy the
//! trait contracts without any external dependencies. The result store
//! honours the TTL contract so expiry behaviour is testable.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use capstan_core::{CapabilitySource, SandboxResults};

use crate::error::StoreError;
use crate::traits::{ResultStore, SourceStore, StoreResult, RESULT_TTL_SECS};

// ---------------------------------------------------------------------------
// MemorySourceStore
// ---------------------------------------------------------------------------

/// In-memory source registry backed by a `HashMap<id, CapabilitySource>`.
#[derive(Debug, Default)]
pub struct MemorySourceStore {
    sources: Mutex<HashMap<String, CapabilitySource>>,
}

impl MemorySourceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SourceStore for MemorySourceStore {
    async fn put_source(&self, source: &CapabilitySource) -> StoreResult<()> {
        let mut sources = self.sources.lock().unwrap();
        sources.insert(source.id.clone(), source.clone());
        Ok(())
    }

    async fn get_source(&self, id: &str) -> StoreResult<CapabilitySource> {
        let sources = self.sources.lock().unwrap();
        sources
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::SourceNotFound(id.to_string()))
    }

    async fn delete_source(&self, id: &str) -> StoreResult<()> {
        let mut sources = self.sources.lock().unwrap();
        sources.remove(id);
        Ok(())
    }

    async fn list_sources(&self) -> StoreResult<Vec<CapabilitySource>> {
        let sources = self.sources.lock().unwrap();
        let mut all: Vec<CapabilitySource> = sources.values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }
}

// ---------------------------------------------------------------------------
// MemoryResultStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct ResultRow {
    results: SandboxResults,
    expires_at: DateTime<Utc>,
}

/// In-memory result store with TTL expiry.
#[derive(Debug)]
pub struct MemoryResultStore {
    rows: Mutex<HashMap<String, ResultRow>>,
    ttl: Duration,
}

impl MemoryResultStore {
    pub fn new() -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            ttl: Duration::from_secs(RESULT_TTL_SECS),
        }
    }

    /// Override the TTL (tests exercising expiry).
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            rows: Mutex::new(HashMap::new()),
            ttl,
        }
    }
}

impl Default for MemoryResultStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultStore for MemoryResultStore {
    async fn put_results(&self, sandbox_id: &str, results: &SandboxResults) -> StoreResult<()> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(self.ttl)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
        let mut rows = self.rows.lock().unwrap();
        rows.insert(
            sandbox_id.to_string(),
            ResultRow {
                results: results.clone(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get_results(&self, sandbox_id: &str) -> StoreResult<SandboxResults> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get(sandbox_id) {
            Some(row) if row.expires_at > Utc::now() => Ok(row.results.clone()),
            Some(_) => {
                // Lazy expiry on read.
                rows.remove(sandbox_id);
                Err(StoreError::ResultsNotFound(sandbox_id.to_string()))
            }
            None => Err(StoreError::ResultsNotFound(sandbox_id.to_string())),
        }
    }

    async fn delete_results(&self, sandbox_id: &str) -> StoreResult<()> {
        let mut rows = self.rows.lock().unwrap();
        rows.remove(sandbox_id);
        Ok(())
    }

    async fn purge_expired(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let mut rows = self.rows.lock().unwrap();
        let before = rows.len();
        rows.retain(|_, row| row.expires_at > now);
        Ok(before - rows.len())
    }
}
