//! Constitutional policy court client.
//!
//! The constitutional test tier consults an external policy service. The
//! engine's stance when the court is unreachable is configurable: fail-open
//! (inherited default — ingestion proceeds with a logged warning) or
//! fail-closed (the tier fails). The trade-off is deliberate and must stay
//! visible in logs and documentation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;

use capstan_core::CapabilityPack;

/// Errors from the policy court boundary.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("policy court unreachable: {0}")]
    Unreachable(String),

    #[error("policy court returned malformed verdict: {0}")]
    Malformed(String),
}

/// Court response for one capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CourtVerdict {
    pub passed: bool,

    /// Per-court verdicts, opaque to the engine.
    #[serde(default)]
    pub verdicts: serde_json::Value,

    #[serde(default)]
    pub overall_verdict: String,
}

/// External constitutional validation collaborator.
#[async_trait]
pub trait PolicyCourt: Send + Sync {
    async fn validate_capability(&self, pack: &CapabilityPack) -> Result<CourtVerdict, PolicyError>;
}

// ---------------------------------------------------------------------------
// HttpPolicyCourt
// ---------------------------------------------------------------------------

/// HTTP client for the policy court service.
///
/// Sends `{action: "validate_capability", context: {capability_id,
/// capability}}` and expects `{passed, verdicts, overall_verdict}`.
#[derive(Debug, Clone)]
pub struct HttpPolicyCourt {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpPolicyCourt {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PolicyCourt for HttpPolicyCourt {
    async fn validate_capability(
        &self,
        pack: &CapabilityPack,
    ) -> Result<CourtVerdict, PolicyError> {
        let body = json!({
            "action": "validate_capability",
            "context": {
                "capability_id": pack.metadata.id,
                "capability": pack,
            }
        });

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| PolicyError::Unreachable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(PolicyError::Unreachable(format!(
                "{} returned {}",
                self.endpoint,
                resp.status()
            )));
        }

        resp.json::<CourtVerdict>()
            .await
            .map_err(|e| PolicyError::Malformed(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// NullCourt / StaticCourt
// ---------------------------------------------------------------------------

/// Court stand-in when no endpoint is configured.
///
/// Always reports unreachable, so the engine's fail-open/fail-closed setting
/// decides the outcome — keeping the trade-off observable instead of
/// silently passing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCourt;

#[async_trait]
impl PolicyCourt for NullCourt {
    async fn validate_capability(
        &self,
        _pack: &CapabilityPack,
    ) -> Result<CourtVerdict, PolicyError> {
        Err(PolicyError::Unreachable(
            "policy court endpoint not configured".to_string(),
        ))
    }
}

/// Deterministic court for tests.
#[derive(Debug, Clone, Copy)]
pub struct StaticCourt {
    pub pass: bool,
}

#[async_trait]
impl PolicyCourt for StaticCourt {
    async fn validate_capability(
        &self,
        pack: &CapabilityPack,
    ) -> Result<CourtVerdict, PolicyError> {
        Ok(CourtVerdict {
            passed: self.pass,
            verdicts: json!({ "static": { "capability_id": pack.metadata.id } }),
            overall_verdict: if self.pass { "approved" } else { "rejected" }.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_deserializes_with_defaults() {
        let verdict: CourtVerdict = serde_json::from_str(r#"{"passed": true}"#).unwrap();
        assert!(verdict.passed);
        assert!(verdict.overall_verdict.is_empty());
    }

    #[tokio::test]
    async fn test_null_court_reports_unreachable() {
        let pack: CapabilityPack = serde_json::from_value(json!({
            "kind": "Capability",
            "metadata": {"id": "cap-null", "issuer": "acme"},
            "spec": {"purpose": "p"},
            "signature": {}
        }))
        .unwrap();
        let err = NullCourt.validate_capability(&pack).await.unwrap_err();
        assert!(matches!(err, PolicyError::Unreachable(_)));
    }
}
