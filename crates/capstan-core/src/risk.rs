//! Qualitative risk levels and declared-risk analysis.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::pack::CapabilityPack;

/// Qualitative risk level for a single factor.
///
/// Ordinal: `Low < Medium < High < Critical`. Aggregation takes the worst
/// individual factor.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    #[default]
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Whether this level warrants a mitigation entry in the report.
    pub fn needs_mitigation(self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Aggregated risk analysis for a capability pack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RiskReport {
    /// Worst individual factor.
    pub overall: RiskLevel,

    /// Per-factor declared levels.
    pub factors: BTreeMap<String, RiskLevel>,

    /// Mitigations for factors at High or above.
    pub mitigations: Vec<String>,

    /// Rollout recommendations derived from the overall level.
    pub recommendations: Vec<String>,
}

/// Analyze the declared risk factors of a pack.
///
/// The overall level is the ordinal maximum across the six declared factors.
/// Mitigations are emitted per factor at `High`/`Critical`; recommendations
/// follow from the overall level.
pub fn analyze_risks(pack: &CapabilityPack) -> RiskReport {
    let declared = pack.spec.risks.factors();

    let overall = declared
        .iter()
        .map(|(_, level)| *level)
        .max()
        .unwrap_or_default();

    let mut factors = BTreeMap::new();
    let mut mitigations = Vec::new();
    for (name, level) in declared {
        factors.insert(name.to_string(), level);
        if level.needs_mitigation() {
            mitigations.push(mitigation_for(name, level));
        }
    }

    let recommendations = match overall {
        RiskLevel::Low => vec!["eligible for automatic rollout".to_string()],
        RiskLevel::Medium => vec!["rollout with post-deploy monitoring".to_string()],
        RiskLevel::High => vec![
            "canary rollout with a manual promotion gate".to_string(),
            "require reviewer sign-off before enablement".to_string(),
        ],
        RiskLevel::Critical => vec![
            "block automatic rollout".to_string(),
            "require security review and explicit operator approval".to_string(),
        ],
    };

    RiskReport {
        overall,
        factors,
        mitigations,
        recommendations,
    }
}

fn mitigation_for(factor: &str, level: RiskLevel) -> String {
    match factor {
        "privacy" => format!("{factor} risk {level}: restrict data access to declared inputs"),
        "supply_chain" => format!("{factor} risk {level}: pin and audit declared dependencies"),
        "license" => format!("{factor} risk {level}: verify license compatibility before rollout"),
        "security" => format!("{factor} risk {level}: run extended security test tier"),
        "cost" => format!("{factor} risk {level}: enforce resource budgets at runtime"),
        "constitutional" => {
            format!("{factor} risk {level}: require policy court review before rollout")
        }
        _ => format!("{factor} risk {level}: manual review required"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::pack::{
        DeclaredRisks, PackMetadata, PackSignature, PackSpec, CAPABILITY_KIND,
    };

    fn pack_with_risks(risks: DeclaredRisks) -> CapabilityPack {
        CapabilityPack {
            kind: CAPABILITY_KIND.to_string(),
            api_version: "v1".to_string(),
            metadata: PackMetadata {
                id: "cap-risk".to_string(),
                capability_type: String::new(),
                version: "1.0.0".to_string(),
                name: String::new(),
                description: String::new(),
                issuer: "acme".to_string(),
                tags: vec![],
                dependencies: vec![],
                conflicts: vec![],
            },
            spec: PackSpec {
                purpose: "risk fixture".to_string(),
                inputs: vec![],
                outputs: vec![],
                requirements: Default::default(),
                risks,
                tests: Default::default(),
                rollout: None,
                budgets: None,
                observability: None,
            },
            signature: PackSignature::default(),
        }
    }

    #[test]
    fn test_risk_level_ordering() {
        assert!(RiskLevel::Low < RiskLevel::Medium);
        assert!(RiskLevel::Medium < RiskLevel::High);
        assert!(RiskLevel::High < RiskLevel::Critical);
    }

    #[test]
    fn test_overall_is_worst_factor() {
        let report = analyze_risks(&pack_with_risks(DeclaredRisks {
            privacy: RiskLevel::Low,
            security: RiskLevel::Critical,
            cost: RiskLevel::Medium,
            ..Default::default()
        }));
        assert_eq!(report.overall, RiskLevel::Critical);
        assert_eq!(report.factors.len(), 6);
    }

    #[test]
    fn test_all_low_yields_low_overall_and_no_mitigations() {
        let report = analyze_risks(&pack_with_risks(DeclaredRisks::default()));
        assert_eq!(report.overall, RiskLevel::Low);
        assert!(report.mitigations.is_empty());
        assert!(!report.recommendations.is_empty());
    }

    #[test]
    fn test_high_factors_get_mitigations() {
        let report = analyze_risks(&pack_with_risks(DeclaredRisks {
            supply_chain: RiskLevel::High,
            license: RiskLevel::High,
            ..Default::default()
        }));
        assert_eq!(report.mitigations.len(), 2);
        assert!(report.mitigations.iter().any(|m| m.contains("supply_chain")));
    }

    #[test]
    fn test_risk_level_serde_snake_case() {
        let json = serde_json::to_string(&RiskLevel::Critical).unwrap();
        assert_eq!(json, "\"critical\"");
        let back: RiskLevel = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(back, RiskLevel::Medium);
    }
}
