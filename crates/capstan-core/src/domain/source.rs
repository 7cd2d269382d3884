//! Registered capability sources.
//!
//! A `CapabilitySource` is an origin of capability packs (a git repository,
//! a registry, a local directory, or an HTTP API). Sources are created by
//! the coordinator, polled by their watcher, and persisted as JSON under
//! `source:<id>`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Kind of source adapter used to discover packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    /// Git repository cloned into a scratch directory per poll.
    Git,
    /// Container/package registry queried over HTTP.
    Registry,
    /// Local filesystem path read directly.
    Filesystem,
    /// Generic HTTP API.
    Api,
}

impl std::fmt::Display for SourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Git => write!(f, "git"),
            Self::Registry => write!(f, "registry"),
            Self::Filesystem => write!(f, "filesystem"),
            Self::Api => write!(f, "api"),
        }
    }
}

/// Whether a source participates in polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Active,
    Disabled,
}

/// A registered origin of capability packs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilitySource {
    /// Stable derived identifier (16 hex chars of SHA-256 over url + created_at).
    pub id: String,

    /// Adapter type used for discovery.
    #[serde(rename = "type")]
    pub source_type: SourceType,

    /// Source location (repository URL, registry endpoint, or local path).
    pub url: String,

    /// Opaque credential material handed to the adapter.
    #[serde(default)]
    pub credentials: BTreeMap<String, String>,

    /// Pack identifiers this source is watched for.
    #[serde(default)]
    pub filters: Vec<String>,

    /// Whether the watcher polls this source.
    pub status: SourceStatus,

    /// Last successful poll, if any.
    pub last_sync: Option<DateTime<Utc>>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CapabilitySource {
    /// Create a new active source with a derived stable ID.
    pub fn new(source_type: SourceType, url: impl Into<String>) -> Self {
        let url = url.into();
        let created_at = Utc::now();
        Self {
            id: derive_source_id(&url, created_at),
            source_type,
            url,
            credentials: BTreeMap::new(),
            filters: Vec::new(),
            status: SourceStatus::Active,
            last_sync: None,
            created_at,
            updated_at: created_at,
        }
    }

    /// Restrict discovery to the given pack identifiers.
    pub fn with_filters(mut self, filters: Vec<String>) -> Self {
        self.filters = filters;
        self
    }

    /// Attach credential material for the adapter.
    pub fn with_credentials(mut self, credentials: BTreeMap<String, String>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Record a completed poll cycle.
    pub fn mark_synced(&mut self, at: DateTime<Utc>) {
        self.last_sync = Some(at);
        self.updated_at = at;
    }

    /// Whether the watcher should poll this source.
    pub fn is_active(&self) -> bool {
        self.status == SourceStatus::Active
    }
}

/// Derive a stable source ID from the URL and creation instant.
fn derive_source_id(url: &str, created_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    hasher.update(created_at.to_rfc3339().as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}
