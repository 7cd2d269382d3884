//! Software bill of materials generation.
//!
//! The SBOM enumerates the capability itself plus its declared component
//! dependencies (`name` or `name@version`) into a versioned, digest-stamped
//! inventory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::pack::CapabilityPack;

/// SBOM document format identifier.
pub const SBOM_FORMAT: &str = "capstan-sbom";

/// SBOM document format version.
pub const SBOM_VERSION: &str = "1";

/// A versioned bill of materials for one capability pack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Sbom {
    pub format: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub components: Vec<SbomComponent>,

    /// Hex SHA-256 over the serialized component list.
    pub digest: String,
}

/// A single inventoried component.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SbomComponent {
    pub name: String,
    pub version: Option<String>,

    /// "capability" for the root entry, "dependency" otherwise.
    #[serde(rename = "type")]
    pub component_type: String,
}

/// Generate the SBOM for a pack from its declared dependencies.
///
/// The root component is the capability itself; each declared dependency
/// becomes a child component, with `name@version` split on the last `@`.
pub fn generate_sbom(pack: &CapabilityPack) -> Result<Sbom, serde_json::Error> {
    let mut components = vec![SbomComponent {
        name: pack.metadata.id.clone(),
        version: Some(pack.metadata.version.clone()).filter(|v| !v.is_empty()),
        component_type: "capability".to_string(),
    }];

    for dep in &pack.metadata.dependencies {
        let (name, version) = match dep.rsplit_once('@') {
            Some((name, version)) if !name.is_empty() => {
                (name.to_string(), Some(version.to_string()))
            }
            _ => (dep.clone(), None),
        };
        components.push(SbomComponent {
            name,
            version,
            component_type: "dependency".to_string(),
        });
    }

    let mut hasher = Sha256::new();
    hasher.update(serde_json::to_vec(&components)?);
    let digest = hex::encode(hasher.finalize());

    Ok(Sbom {
        format: SBOM_FORMAT.to_string(),
        version: SBOM_VERSION.to_string(),
        generated_at: Utc::now(),
        components,
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pack::{PackMetadata, PackSignature, PackSpec, CAPABILITY_KIND};

    fn pack_with_deps(deps: Vec<&str>) -> CapabilityPack {
        CapabilityPack {
            kind: CAPABILITY_KIND.to_string(),
            api_version: "v1".to_string(),
            metadata: PackMetadata {
                id: "cap-sbom".to_string(),
                capability_type: String::new(),
                version: "2.0.0".to_string(),
                name: String::new(),
                description: String::new(),
                issuer: "acme".to_string(),
                tags: vec![],
                dependencies: deps.into_iter().map(String::from).collect(),
                conflicts: vec![],
            },
            spec: PackSpec {
                purpose: "sbom fixture".to_string(),
                inputs: vec![],
                outputs: vec![],
                requirements: Default::default(),
                risks: Default::default(),
                tests: Default::default(),
                rollout: None,
                budgets: None,
                observability: None,
            },
            signature: PackSignature::default(),
        }
    }

    #[test]
    fn test_root_component_is_capability() {
        let sbom = generate_sbom(&pack_with_deps(vec![])).unwrap();
        assert_eq!(sbom.components.len(), 1);
        assert_eq!(sbom.components[0].component_type, "capability");
        assert_eq!(sbom.components[0].name, "cap-sbom");
        assert_eq!(sbom.components[0].version.as_deref(), Some("2.0.0"));
    }

    #[test]
    fn test_dependency_version_split() {
        let sbom = generate_sbom(&pack_with_deps(vec!["libfoo@2.1", "libbar"])).unwrap();
        assert_eq!(sbom.components.len(), 3);
        assert_eq!(sbom.components[1].name, "libfoo");
        assert_eq!(sbom.components[1].version.as_deref(), Some("2.1"));
        assert_eq!(sbom.components[2].name, "libbar");
        assert!(sbom.components[2].version.is_none());
    }

    #[test]
    fn test_digest_stable_for_same_components() {
        let a = generate_sbom(&pack_with_deps(vec!["libfoo@2.1"])).unwrap();
        let b = generate_sbom(&pack_with_deps(vec!["libfoo@2.1"])).unwrap();
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.digest.len(), 64);
    }
}
