//! Signed capability pack manifests.
//!
//! A `CapabilityPack` is the self-describing unit of new functionality that
//! sources produce: metadata, a spec (purpose, typed I/O, requirements,
//! declared risks, test declarations), and a signature over the content.
//! Packs are immutable once validated; re-ingesting the same id+version is a
//! fresh evaluation, never a mutation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::risk::RiskLevel;

/// Required value of `CapabilityPack::kind`.
pub const CAPABILITY_KIND: &str = "Capability";

/// A signed capability manifest (YAML or JSON on the wire).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CapabilityPack {
    /// Must equal `"Capability"`.
    pub kind: String,

    /// Manifest schema version.
    #[serde(default)]
    pub api_version: String,

    pub metadata: PackMetadata,
    pub spec: PackSpec,
    pub signature: PackSignature,
}

/// Identity and classification of a capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackMetadata {
    pub id: String,

    /// Capability classification (e.g. "tool", "skill", "adapter").
    #[serde(rename = "type", default)]
    pub capability_type: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub issuer: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Component dependencies, `name` or `name@version`.
    #[serde(default)]
    pub dependencies: Vec<String>,

    /// Capabilities this pack cannot coexist with.
    #[serde(default)]
    pub conflicts: Vec<String>,
}

/// Behavioural contract of a capability.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackSpec {
    /// Human-readable purpose; must be non-empty to pass validation.
    #[serde(default)]
    pub purpose: String,

    #[serde(default)]
    pub inputs: Vec<IoField>,

    #[serde(default)]
    pub outputs: Vec<IoField>,

    #[serde(default)]
    pub requirements: Requirements,

    #[serde(default)]
    pub risks: DeclaredRisks,

    #[serde(default)]
    pub tests: TestSuites,

    #[serde(default)]
    pub rollout: Option<RolloutStrategy>,

    #[serde(default)]
    pub budgets: Option<ResourceBudgets>,

    #[serde(default)]
    pub observability: Option<ObservabilitySpec>,
}

/// A typed input or output declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IoField {
    pub name: String,

    #[serde(rename = "type", default)]
    pub field_type: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub required: bool,
}

/// Runtime requirements declared by the pack.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Requirements {
    #[serde(default)]
    pub os: Vec<String>,

    #[serde(default)]
    pub gpu: bool,

    #[serde(default)]
    pub network: bool,

    #[serde(default)]
    pub cpu_cores: Option<f64>,

    #[serde(default)]
    pub memory_mb: Option<u64>,

    #[serde(default)]
    pub storage_mb: Option<u64>,
}

/// Qualitative risk levels declared per factor.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeclaredRisks {
    #[serde(default)]
    pub privacy: RiskLevel,

    #[serde(default)]
    pub supply_chain: RiskLevel,

    #[serde(default)]
    pub license: RiskLevel,

    #[serde(default)]
    pub security: RiskLevel,

    #[serde(default)]
    pub cost: RiskLevel,

    #[serde(default)]
    pub constitutional: RiskLevel,
}

impl DeclaredRisks {
    /// Iterate factors as `(name, level)` pairs.
    pub fn factors(&self) -> [(&'static str, RiskLevel); 6] {
        [
            ("privacy", self.privacy),
            ("supply_chain", self.supply_chain),
            ("license", self.license),
            ("security", self.security),
            ("cost", self.cost),
            ("constitutional", self.constitutional),
        ]
    }
}

/// Test identifiers declared per tier.
///
/// Only unit, integration, and constitutional tiers are executed by the
/// sandbox pipeline; soak and security tiers are declared for out-of-band
/// tooling. A tier with zero declared tests is vacuously skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TestSuites {
    #[serde(default)]
    pub unit: Vec<String>,

    #[serde(default)]
    pub integration: Vec<String>,

    #[serde(default)]
    pub soak: Vec<String>,

    #[serde(default)]
    pub security: Vec<String>,

    #[serde(default)]
    pub constitutional: Vec<String>,
}

impl TestSuites {
    /// Tiers executed by the pipeline, in order, with their declared tests.
    pub fn execution_tiers(&self) -> [(&'static str, &[String]); 3] {
        [
            ("unit", self.unit.as_slice()),
            ("integration", self.integration.as_slice()),
            ("constitutional", self.constitutional.as_slice()),
        ]
    }

    /// Whether any executable tier declares at least one test.
    pub fn has_declared_tests(&self) -> bool {
        self.execution_tiers().iter().any(|(_, t)| !t.is_empty())
    }
}

/// Rollout declaration (informational; rollout itself is out of scope here).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RolloutStrategy {
    #[serde(default)]
    pub strategy: String,

    #[serde(default)]
    pub canary_percent: Option<u8>,
}

/// Resource budgets the sandboxed execution should respect.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResourceBudgets {
    #[serde(default)]
    pub cpu_millis: Option<u64>,

    #[serde(default)]
    pub memory_mb: Option<u64>,

    #[serde(default)]
    pub storage_mb: Option<u64>,

    #[serde(default)]
    pub network_kbps: Option<u64>,
}

/// Observability requirements declared by the pack.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ObservabilitySpec {
    #[serde(default)]
    pub metrics: Vec<String>,

    #[serde(default)]
    pub logs: bool,

    #[serde(default)]
    pub traces: bool,
}

/// Cryptographic signature over the pack content.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PackSignature {
    /// Hex SHA-256 of the canonical JSON of `(metadata, spec)`.
    #[serde(default)]
    pub sha256: String,

    #[serde(default)]
    pub issuer: String,

    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,

    #[serde(default)]
    pub algorithm: String,

    #[serde(default)]
    pub certificate: String,
}

impl CapabilityPack {
    /// Compute the content digest the signature must match.
    ///
    /// The digest covers `metadata` and `spec` (not the signature itself),
    /// serialized as canonical JSON in declaration order.
    pub fn content_digest(&self) -> Result<String, serde_json::Error> {
        let mut hasher = Sha256::new();
        hasher.update(serde_json::to_vec(&self.metadata)?);
        hasher.update(b"\0");
        hasher.update(serde_json::to_vec(&self.spec)?);
        Ok(hex::encode(hasher.finalize()))
    }

    /// Sign the pack in place with its own content digest.
    ///
    /// Test and authoring helper; production packs arrive already signed.
    pub fn self_sign(&mut self, issuer: impl Into<String>) -> Result<(), serde_json::Error> {
        self.signature.sha256 = self.content_digest()?;
        self.signature.issuer = issuer.into();
        self.signature.algorithm = "sha256".to_string();
        self.signature.timestamp = Some(Utc::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_pack() -> CapabilityPack {
        CapabilityPack {
            kind: CAPABILITY_KIND.to_string(),
            api_version: "v1".to_string(),
            metadata: PackMetadata {
                id: "cap-echo".to_string(),
                capability_type: "tool".to_string(),
                version: "1.0.0".to_string(),
                name: "Echo".to_string(),
                description: String::new(),
                issuer: "acme".to_string(),
                tags: vec![],
                dependencies: vec!["libfoo@2.1".to_string()],
                conflicts: vec![],
            },
            spec: PackSpec {
                purpose: "echoes input".to_string(),
                inputs: vec![],
                outputs: vec![],
                requirements: Requirements::default(),
                risks: DeclaredRisks::default(),
                tests: TestSuites {
                    unit: vec!["true".to_string()],
                    ..Default::default()
                },
                rollout: None,
                budgets: None,
                observability: None,
            },
            signature: PackSignature::default(),
        }
    }

    #[test]
    fn test_content_digest_deterministic() {
        let pack = minimal_pack();
        let d1 = pack.content_digest().unwrap();
        let d2 = pack.content_digest().unwrap();
        assert_eq!(d1, d2);
        assert_eq!(d1.len(), 64);
    }

    #[test]
    fn test_content_digest_ignores_signature() {
        let mut pack = minimal_pack();
        let before = pack.content_digest().unwrap();
        pack.self_sign("acme").unwrap();
        assert_eq!(pack.content_digest().unwrap(), before);
        assert_eq!(pack.signature.sha256, before);
    }

    #[test]
    fn test_content_digest_changes_with_spec() {
        let mut pack = minimal_pack();
        let before = pack.content_digest().unwrap();
        pack.spec.purpose = "something else".to_string();
        assert_ne!(pack.content_digest().unwrap(), before);
    }

    #[test]
    fn test_execution_tiers_order() {
        let suites = TestSuites {
            unit: vec!["u1".to_string()],
            integration: vec!["i1".to_string()],
            constitutional: vec!["c1".to_string()],
            ..Default::default()
        };
        let tiers: Vec<&str> = suites.execution_tiers().iter().map(|(n, _)| *n).collect();
        assert_eq!(tiers, vec!["unit", "integration", "constitutional"]);
    }

    #[test]
    fn test_yaml_manifest_parses_with_defaults() {
        let yaml = r#"
kind: Capability
api_version: v1
metadata:
  id: cap-yaml
  issuer: acme
spec:
  purpose: parse yaml
  tests:
    unit: ["t1", "t2"]
signature:
  sha256: abc
  issuer: acme
"#;
        let pack: CapabilityPack = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(pack.kind, CAPABILITY_KIND);
        assert_eq!(pack.metadata.id, "cap-yaml");
        assert_eq!(pack.spec.tests.unit.len(), 2);
        assert!(pack.spec.tests.integration.is_empty());
        assert!(pack.spec.rollout.is_none());
    }
}
