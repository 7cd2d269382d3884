//! Source adapters and discovery dispatch.
//!
//! Each adapter turns `(source, pack_id)` into a raw manifest document and
//! parses it into a `CapabilityPack`. Adapters perform no validation and no
//! sandboxing; discovery failures are non-fatal to the coordinator (logged,
//! retried on the next poll).

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use capstan_core::{CapabilityPack, CapabilitySource, SourceType};

/// Manifest file names probed inside a pack directory.
const MANIFEST_NAMES: &[&str] = &["capability.yaml", "capability.yml", "capability.json"];

/// Errors produced by source adapters.
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("source {source_id} unreachable: {reason}")]
    Unreachable { source_id: String, reason: String },

    #[error("manifest for pack {pack_id:?} not found in source {source_id}")]
    ManifestNotFound { source_id: String, pack_id: String },

    #[error("failed to parse manifest for pack {pack_id:?}: {reason}")]
    Parse { pack_id: String, reason: String },

    #[error("git clone failed: {0}")]
    GitClone(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A discovery strategy for one source type.
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Adapter name for logging and diagnostics.
    fn name(&self) -> &'static str;

    /// Produce the pack manifest for `pack_id` from `source`.
    async fn discover(
        &self,
        source: &CapabilitySource,
        pack_id: &str,
    ) -> Result<CapabilityPack, DiscoveryError>;
}

/// Parse a raw manifest document (YAML first, JSON fallback).
pub fn parse_manifest(raw: &str, pack_id: &str) -> Result<CapabilityPack, DiscoveryError> {
    match serde_yaml::from_str::<CapabilityPack>(raw) {
        Ok(pack) => Ok(pack),
        Err(yaml_err) => serde_json::from_str::<CapabilityPack>(raw).map_err(|json_err| {
            DiscoveryError::Parse {
                pack_id: pack_id.to_string(),
                reason: format!("yaml: {yaml_err}; json: {json_err}"),
            }
        }),
    }
}

/// Read `<dir>/<pack_id>/capability.{yaml,yml,json}` and parse it.
async fn read_pack_dir(
    dir: &Path,
    source_id: &str,
    pack_id: &str,
) -> Result<CapabilityPack, DiscoveryError> {
    for name in MANIFEST_NAMES {
        let path = dir.join(pack_id).join(name);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => return parse_manifest(&raw, pack_id),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(DiscoveryError::Io(e)),
        }
    }
    Err(DiscoveryError::ManifestNotFound {
        source_id: source_id.to_string(),
        pack_id: pack_id.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Git adapter
// ---------------------------------------------------------------------------

/// Clones the repository into an ephemeral scratch directory per call.
///
/// The scratch directory is removed on return, success or failure, by the
/// `TempDir` guard.
#[derive(Debug, Clone, Copy, Default)]
pub struct GitDiscoverer;

#[async_trait]
impl Discoverer for GitDiscoverer {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn discover(
        &self,
        source: &CapabilitySource,
        pack_id: &str,
    ) -> Result<CapabilityPack, DiscoveryError> {
        let scratch = tempfile::tempdir()?;
        debug!(source_id = %source.id, pack_id = %pack_id, "cloning source repository");

        let output = Command::new("git")
            .args(["clone", "--depth", "1", &source.url])
            .arg(scratch.path())
            .output()
            .await
            .map_err(|e| DiscoveryError::GitClone(format!("failed to run git: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DiscoveryError::GitClone(format!(
                "git clone {} failed: {stderr}",
                source.url
            )));
        }

        read_pack_dir(scratch.path(), &source.id, pack_id).await
    }
}

// ---------------------------------------------------------------------------
// Filesystem adapter
// ---------------------------------------------------------------------------

/// Reads manifests directly from a local directory tree.
#[derive(Debug, Clone, Copy, Default)]
pub struct FilesystemDiscoverer;

#[async_trait]
impl Discoverer for FilesystemDiscoverer {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn discover(
        &self,
        source: &CapabilitySource,
        pack_id: &str,
    ) -> Result<CapabilityPack, DiscoveryError> {
        read_pack_dir(Path::new(&source.url), &source.id, pack_id).await
    }
}

// ---------------------------------------------------------------------------
// Registry / API adapters
// ---------------------------------------------------------------------------

/// Fetches manifests from a capability registry over HTTP.
#[derive(Debug, Clone, Default)]
pub struct RegistryDiscoverer {
    client: reqwest::Client,
}

/// Fetches manifests from a generic HTTP API.
#[derive(Debug, Clone, Default)]
pub struct ApiDiscoverer {
    client: reqwest::Client,
}

async fn fetch_manifest(
    client: &reqwest::Client,
    source: &CapabilitySource,
    pack_id: &str,
    url: String,
) -> Result<CapabilityPack, DiscoveryError> {
    let mut req = client.get(&url);
    if let Some(token) = source.credentials.get("token") {
        req = req.bearer_auth(token);
    }

    let resp = req.send().await.map_err(|e| DiscoveryError::Unreachable {
        source_id: source.id.clone(),
        reason: e.to_string(),
    })?;

    if resp.status() == reqwest::StatusCode::NOT_FOUND {
        return Err(DiscoveryError::ManifestNotFound {
            source_id: source.id.clone(),
            pack_id: pack_id.to_string(),
        });
    }
    if !resp.status().is_success() {
        return Err(DiscoveryError::Unreachable {
            source_id: source.id.clone(),
            reason: format!("{url} returned {}", resp.status()),
        });
    }

    let raw = resp.text().await.map_err(|e| DiscoveryError::Unreachable {
        source_id: source.id.clone(),
        reason: e.to_string(),
    })?;
    parse_manifest(&raw, pack_id)
}

#[async_trait]
impl Discoverer for RegistryDiscoverer {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn discover(
        &self,
        source: &CapabilitySource,
        pack_id: &str,
    ) -> Result<CapabilityPack, DiscoveryError> {
        let url = format!("{}/capabilities/{pack_id}", source.url.trim_end_matches('/'));
        fetch_manifest(&self.client, source, pack_id, url).await
    }
}

#[async_trait]
impl Discoverer for ApiDiscoverer {
    fn name(&self) -> &'static str {
        "api"
    }

    async fn discover(
        &self,
        source: &CapabilitySource,
        pack_id: &str,
    ) -> Result<CapabilityPack, DiscoveryError> {
        let url = format!(
            "{}/api/v1/capabilities/{pack_id}",
            source.url.trim_end_matches('/')
        );
        fetch_manifest(&self.client, source, pack_id, url).await
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Selects the adapter for a source by its type.
#[derive(Debug, Default)]
pub struct DiscoveryDispatcher {
    git: GitDiscoverer,
    filesystem: FilesystemDiscoverer,
    registry: RegistryDiscoverer,
    api: ApiDiscoverer,
}

impl DiscoveryDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover a pack via the adapter matching `source.source_type`.
    pub async fn discover(
        &self,
        source: &CapabilitySource,
        pack_id: &str,
    ) -> Result<CapabilityPack, DiscoveryError> {
        let adapter: &dyn Discoverer = match source.source_type {
            SourceType::Git => &self.git,
            SourceType::Filesystem => &self.filesystem,
            SourceType::Registry => &self.registry,
            SourceType::Api => &self.api,
        };
        debug!(source_id = %source.id, pack_id = %pack_id, adapter = adapter.name(), "discovering pack");
        adapter.discover(source, pack_id).await
    }
}
