//! Class alphabet and severity mapping
//!
//! The 34-label alphabet the models emit probabilities over. The
//! authoritative label-to-index mapping ships with the model
//! artifacts; the table here backs severity mapping and tests.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The benign class label.
pub const BENIGN_LABEL: &str = "BenignTraffic";

/// Canonical class alphabet, in training order.
pub const CLASS_LABELS: [&str; 34] = [
    "BenignTraffic",
    "DDoS-ACK_Fragmentation",
    "DDoS-HTTP_Flood",
    "DDoS-ICMP_Flood",
    "DDoS-ICMP_Fragmentation",
    "DDoS-PSHACK_Flood",
    "DDoS-RSTFINFlood",
    "DDoS-SYN_Flood",
    "DDoS-SlowLoris",
    "DDoS-SynonymousIP_Flood",
    "DDoS-TCP_Flood",
    "DDoS-UDP_Flood",
    "DDoS-UDP_Fragmentation",
    "DoS-HTTP_Flood",
    "DoS-SYN_Flood",
    "DoS-TCP_Flood",
    "DoS-UDP_Flood",
    "Recon-HostDiscovery",
    "Recon-OSScan",
    "Recon-PingSweep",
    "Recon-PortScan",
    "Mirai-greeth_flood",
    "Mirai-greip_flood",
    "Mirai-udpplain",
    "SqlInjection",
    "XSS",
    "CommandInjection",
    "MITM-ArpSpoofing",
    "DNS_Spoofing",
    "DictionaryBruteForce",
    "Backdoor_Malware",
    "BrowserHijacking",
    "VulnerabilityScan",
    "Uploading_Attack",
];

/// Alert severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity for a threat label: benign is low, flood and scan
/// families are medium, everything else is high.
pub fn severity_for(label: &str) -> Severity {
    if label == BENIGN_LABEL {
        Severity::Low
    } else if label.starts_with("DDoS-")
        || label.starts_with("DoS-")
        || label.starts_with("Recon-")
        || label == "VulnerabilityScan"
    {
        Severity::Medium
    } else {
        Severity::High
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alphabet_size() {
        assert_eq!(CLASS_LABELS.len(), 34);
        assert_eq!(CLASS_LABELS[0], BENIGN_LABEL);
    }

    #[test]
    fn test_severity_mapping() {
        assert_eq!(severity_for("BenignTraffic"), Severity::Low);
        assert_eq!(severity_for("DDoS-SYN_Flood"), Severity::Medium);
        assert_eq!(severity_for("DoS-UDP_Flood"), Severity::Medium);
        assert_eq!(severity_for("Recon-PortScan"), Severity::Medium);
        assert_eq!(severity_for("VulnerabilityScan"), Severity::Medium);
        assert_eq!(severity_for("Mirai-udpplain"), Severity::High);
        assert_eq!(severity_for("SqlInjection"), Severity::High);
        assert_eq!(severity_for("MITM-ArpSpoofing"), Severity::High);
        assert_eq!(severity_for("DictionaryBruteForce"), Severity::High);
    }

    #[test]
    fn test_severity_serde() {
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"high\"");
        let s: Severity = serde_json::from_str("\"medium\"").unwrap();
        assert_eq!(s, Severity::Medium);
    }
}
