//! Security scan results and the pre-deploy gate.

use serde::{Deserialize, Serialize};

use crate::order::ComplianceLevel;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VulnerabilityCounts {
    pub critical: u32,
    pub high: u32,
    pub medium: u32,
    pub low: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceFlags {
    pub cis_benchmark: bool,
    pub pci_dss: bool,
    pub soc2: bool,
}

impl Default for ComplianceFlags {
    fn default() -> Self {
        Self {
            cis_benchmark: true,
            pci_dss: true,
            soc2: true,
        }
    }
}

impl ComplianceFlags {
    /// Flags that `level` requires but this scan did not satisfy.
    pub fn missing(&self, level: ComplianceLevel) -> Vec<&'static str> {
        let required: &[(&'static str, bool)] = match level {
            ComplianceLevel::Basic => &[],
            ComplianceLevel::Standard => &[("cis_benchmark", self.cis_benchmark)],
            ComplianceLevel::Strict => &[
                ("cis_benchmark", self.cis_benchmark),
                ("pci_dss", self.pci_dss),
                ("soc2", self.soc2),
            ],
        };
        required
            .iter()
            .filter(|(_, ok)| !ok)
            .map(|(name, _)| *name)
            .collect()
    }

    fn failed_count(&self) -> u32 {
        [self.cis_benchmark, self.pci_dss, self.soc2]
            .iter()
            .filter(|ok| !**ok)
            .count() as u32
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretsScan {
    pub exposed: bool,
    pub findings: Vec<String>,
}

/// Result of scanning an image before it is deployed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityScan {
    pub image: String,
    pub vulnerabilities: VulnerabilityCounts,
    pub compliance: ComplianceFlags,
    pub secrets: SecretsScan,
}

impl SecurityScan {
    /// Reasons the image may not be deployed at `level`. Empty means pass.
    pub fn violations(&self, level: ComplianceLevel) -> Vec<String> {
        let mut reasons = Vec::new();
        if self.vulnerabilities.critical > 0 {
            reasons.push(format!(
                "{} critical vulnerabilities",
                self.vulnerabilities.critical
            ));
        }
        for flag in self.compliance.missing(level) {
            reasons.push(format!("compliance check failed: {flag}"));
        }
        if self.secrets.exposed {
            reasons.push("exposed secrets detected".to_string());
        }
        reasons
    }

    /// Compliance score 0–100 derived from the scan.
    pub fn compliance_score(&self) -> u32 {
        let penalty = 30 * self.vulnerabilities.critical
            + 10 * self.vulnerabilities.high
            + 2 * self.vulnerabilities.medium
            + 20 * self.compliance.failed_count()
            + if self.secrets.exposed { 50 } else { 0 };
        100u32.saturating_sub(penalty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_scan_passes_strict() {
        let scan = SecurityScan::default();
        assert!(scan.violations(ComplianceLevel::Strict).is_empty());
        assert_eq!(scan.compliance_score(), 100);
    }

    #[test]
    fn critical_vulnerability_blocks() {
        let scan = SecurityScan {
            vulnerabilities: VulnerabilityCounts {
                critical: 1,
                ..Default::default()
            },
            ..Default::default()
        };
        assert_eq!(scan.violations(ComplianceLevel::Basic).len(), 1);
        assert_eq!(scan.compliance_score(), 70);
    }

    #[test]
    fn missing_flags_depend_on_level() {
        let scan = SecurityScan {
            compliance: ComplianceFlags {
                cis_benchmark: true,
                pci_dss: false,
                soc2: true,
            },
            ..Default::default()
        };
        assert!(scan.violations(ComplianceLevel::Standard).is_empty());
        assert_eq!(
            scan.violations(ComplianceLevel::Strict),
            vec!["compliance check failed: pci_dss".to_string()]
        );
    }

    #[test]
    fn exposed_secrets_block_and_score_low() {
        let scan = SecurityScan {
            secrets: SecretsScan {
                exposed: true,
                findings: vec!["AWS key in /app/.env".into()],
            },
            ..Default::default()
        };
        assert!(!scan.violations(ComplianceLevel::Basic).is_empty());
        assert_eq!(scan.compliance_score(), 50);
    }
}
