//! Pack validation gate.
//!
//! Every pack passes through `PackValidator::validate` before any sandbox
//! resources are allocated. Checks run cheapest-first: structural fields,
//! then the recomputed content digest, then the trusted-issuer policy, so an
//! obviously malformed pack never costs a hash computation.

use crate::domain::pack::{CapabilityPack, CAPABILITY_KIND};

/// Rejection reasons produced by the validation gate.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("manifest kind must be {CAPABILITY_KIND:?}, got {kind:?}")]
    WrongKind { kind: String },

    #[error("metadata.id must not be empty")]
    MissingId,

    #[error("spec.purpose must not be empty")]
    MissingPurpose,

    #[error("signature validation failed: sha256 and issuer must not be empty")]
    IncompleteSignature,

    #[error("signature validation failed: digest mismatch (declared {declared}, computed {computed})")]
    DigestMismatch { declared: String, computed: String },

    #[error("issuer {issuer:?} is not in the trusted issuer allowlist")]
    UntrustedIssuer { issuer: String },

    #[error("failed to compute content digest: {0}")]
    Digest(#[from] serde_json::Error),
}

/// Structural and signature gate applied before sandbox admission.
#[derive(Debug, Clone, Default)]
pub struct PackValidator {
    trusted_issuers: Vec<String>,
}

impl PackValidator {
    /// Create a validator with a trusted-issuer allowlist.
    ///
    /// An empty allowlist accepts any issuer; issuer policy is then deferred
    /// to the external policy collaborator.
    pub fn new(trusted_issuers: Vec<String>) -> Self {
        Self { trusted_issuers }
    }

    /// Validate a pack. First failing check rejects.
    ///
    /// Order: kind, metadata.id, spec.purpose, signature fields, recomputed
    /// content digest, issuer allowlist.
    pub fn validate(&self, pack: &CapabilityPack) -> Result<(), ValidationError> {
        if pack.kind != CAPABILITY_KIND {
            return Err(ValidationError::WrongKind {
                kind: pack.kind.clone(),
            });
        }

        if pack.metadata.id.is_empty() {
            return Err(ValidationError::MissingId);
        }

        if pack.spec.purpose.is_empty() {
            return Err(ValidationError::MissingPurpose);
        }

        if pack.signature.sha256.is_empty() || pack.signature.issuer.is_empty() {
            return Err(ValidationError::IncompleteSignature);
        }

        let computed = pack.content_digest()?;
        if !computed.eq_ignore_ascii_case(&pack.signature.sha256) {
            return Err(ValidationError::DigestMismatch {
                declared: pack.signature.sha256.clone(),
                computed,
            });
        }

        if !self.trusted_issuers.is_empty()
            && !self
                .trusted_issuers
                .iter()
                .any(|i| i == &pack.signature.issuer)
        {
            return Err(ValidationError::UntrustedIssuer {
                issuer: pack.signature.issuer.clone(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pack::{PackMetadata, PackSignature, PackSpec};

    fn signed_pack() -> CapabilityPack {
        let mut pack = CapabilityPack {
            kind: CAPABILITY_KIND.to_string(),
            api_version: "v1".to_string(),
            metadata: PackMetadata {
                id: "cap-valid".to_string(),
                capability_type: "tool".to_string(),
                version: "1.0.0".to_string(),
                name: String::new(),
                description: String::new(),
                issuer: "acme".to_string(),
                tags: vec![],
                dependencies: vec![],
                conflicts: vec![],
            },
            spec: PackSpec {
                purpose: "validation fixture".to_string(),
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
        };
        pack.self_sign("acme").unwrap();
        pack
    }

    #[test]
    fn test_valid_pack_passes() {
        let validator = PackValidator::new(vec!["acme".to_string()]);
        assert!(validator.validate(&signed_pack()).is_ok());
    }

    #[test]
    fn test_wrong_kind_rejected_first() {
        let mut pack = signed_pack();
        pack.kind = "Skill".to_string();
        pack.metadata.id = String::new();
        let err = PackValidator::default().validate(&pack).unwrap_err();
        assert!(matches!(err, ValidationError::WrongKind { .. }));
    }

    #[test]
    fn test_empty_id_rejected() {
        let mut pack = signed_pack();
        pack.metadata.id = String::new();
        let err = PackValidator::default().validate(&pack).unwrap_err();
        assert!(matches!(err, ValidationError::MissingId));
    }

    #[test]
    fn test_empty_purpose_rejected() {
        let mut pack = signed_pack();
        pack.spec.purpose = String::new();
        // Re-sign so the digest check cannot fire first.
        pack.self_sign("acme").unwrap();
        let err = PackValidator::default().validate(&pack).unwrap_err();
        assert!(matches!(err, ValidationError::MissingPurpose));
    }

    #[test]
    fn test_missing_issuer_rejected_as_signature_failure() {
        let mut pack = signed_pack();
        pack.signature.issuer = String::new();
        let err = PackValidator::default().validate(&pack).unwrap_err();
        assert!(matches!(err, ValidationError::IncompleteSignature));
        assert!(err.to_string().contains("signature validation"));
    }

    #[test]
    fn test_tampered_content_rejected() {
        let mut pack = signed_pack();
        pack.spec.purpose = "tampered".to_string();
        let err = PackValidator::default().validate(&pack).unwrap_err();
        assert!(matches!(err, ValidationError::DigestMismatch { .. }));
    }

    #[test]
    fn test_untrusted_issuer_rejected() {
        let validator = PackValidator::new(vec!["other-org".to_string()]);
        let err = validator.validate(&signed_pack()).unwrap_err();
        assert!(matches!(err, ValidationError::UntrustedIssuer { .. }));
    }

    #[test]
    fn test_empty_allowlist_accepts_any_issuer() {
        assert!(PackValidator::default().validate(&signed_pack()).is_ok());
    }

    #[test]
    fn test_digest_comparison_case_insensitive() {
        let mut pack = signed_pack();
        pack.signature.sha256 = pack.signature.sha256.to_uppercase();
        assert!(PackValidator::default().validate(&pack).is_ok());
    }
}
