//! Suppression cascade
//!
//! Seven ordered layers between a scored flow and an alert. The
//! first failing layer wins; every suppression is recorded with its
//! reason to a bounded debug ring for tuning.

use crate::baseline::{AdaptiveBaseline, Fingerprint};
use chrono::{DateTime, Utc};
use ipnetwork::IpNetwork;
use parking_lot::Mutex;
use sentra_common::config::{DetectionConfig, DetectionMode};
use sentra_common::labels::BENIGN_LABEL;
use sentra_common::FlowKey;
use sentra_flow::FlowSnapshot;
use sentra_ml::Prediction;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::net::IpAddr;

const DEBUG_RING_CAPACITY: usize = 512;

/// Why a flow did not alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuppressReason {
    NotAThreat,
    LowConfidence,
    InsufficientTraffic,
    CloudTraffic,
    WhitelistedIp,
    PrivateNetwork,
    LegitimateLowVolume,
    BaselineMatch,
}

impl SuppressReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAThreat => "not_a_threat",
            Self::LowConfidence => "low_confidence",
            Self::InsufficientTraffic => "insufficient_traffic",
            Self::CloudTraffic => "cloud_traffic",
            Self::WhitelistedIp => "whitelisted_ip",
            Self::PrivateNetwork => "private_network",
            Self::LegitimateLowVolume => "legitimate_low_volume",
            Self::BaselineMatch => "baseline_match",
        }
    }
}

/// Cascade outcome for one scored flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Emit,
    Suppress(SuppressReason),
}

/// Debug ring entry.
#[derive(Debug, Clone, Serialize)]
pub struct SuppressionEvent {
    pub at: DateTime<Utc>,
    pub key: FlowKey,
    pub label: String,
    pub confidence: f64,
    pub reason: SuppressReason,
}

/// The filter cascade. Stateless apart from the adaptive baseline
/// and the debug ring.
pub struct Suppressor {
    mode: DetectionMode,
    confidence_threshold: f64,
    min_packet_threshold: u64,
    filter_localhost: bool,
    filter_private_networks: bool,
    whitelist_ports: HashSet<u16>,
    whitelist_networks: Vec<IpNetwork>,
    cloud_prefixes: Vec<String>,
    ignored_labels: HashSet<String>,
    legitimate_port_packet_threshold: u64,
    baseline: AdaptiveBaseline,
    ring: Mutex<VecDeque<SuppressionEvent>>,
}

impl Suppressor {
    pub fn new(config: &DetectionConfig, baseline: AdaptiveBaseline) -> Self {
        Self {
            mode: config.mode,
            confidence_threshold: config.confidence_threshold,
            min_packet_threshold: config.min_packet_threshold,
            filter_localhost: config.filter_localhost,
            filter_private_networks: config.filter_private_networks,
            whitelist_ports: config.whitelist_ports.iter().copied().collect(),
            whitelist_networks: config
                .whitelist_ips
                .iter()
                .filter_map(|c| c.parse().ok())
                .collect(),
            cloud_prefixes: config.cloud_prefixes.clone(),
            ignored_labels: config.ignored_attack_types.iter().cloned().collect(),
            legitimate_port_packet_threshold: config.legitimate_port_packet_threshold,
            baseline,
            ring: Mutex::new(VecDeque::with_capacity(DEBUG_RING_CAPACITY)),
        }
    }

    pub fn baseline(&self) -> &AdaptiveBaseline {
        &self.baseline
    }

    /// Run the cascade for one scored flow.
    pub fn evaluate(&self, snap: &FlowSnapshot, prediction: &Prediction) -> Verdict {
        // Every snapshot feeds learning, whatever the earlier layers
        // would say; the baseline has to see normal traffic that the
        // threat layer discards.
        if self.baseline.learning_active() {
            self.baseline.observe(Fingerprint::of(snap));
        }

        let verdict = self.decide(snap, prediction);
        if let Verdict::Suppress(reason) = verdict {
            self.record(snap, prediction, reason);
        }
        verdict
    }

    fn decide(&self, snap: &FlowSnapshot, prediction: &Prediction) -> Verdict {
        // Layer 1: threat class
        if prediction.label == BENIGN_LABEL || self.ignored_labels.contains(&prediction.label) {
            return Verdict::Suppress(SuppressReason::NotAThreat);
        }
        if self.mode == DetectionMode::PureMl {
            return Verdict::Emit;
        }

        // Layer 2: confidence
        if prediction.confidence < self.confidence_threshold {
            return Verdict::Suppress(SuppressReason::LowConfidence);
        }

        // Layer 3: packet count
        if snap.packet_count() < self.min_packet_threshold {
            return Verdict::Suppress(SuppressReason::InsufficientTraffic);
        }

        let src = snap.key.src_ip;
        let dst = snap.key.dst_ip;

        // Layer 4: cloud-provider whitelist
        if self.matches_cloud_prefix(src) || self.matches_cloud_prefix(dst) {
            return Verdict::Suppress(SuppressReason::CloudTraffic);
        }

        // Layer 4.5: explicit CIDR whitelist
        if self.is_whitelisted(src) || self.is_whitelisted(dst) {
            return Verdict::Suppress(SuppressReason::WhitelistedIp);
        }

        // Layer 5: private-network filter
        if self.filter_localhost && (src.is_loopback() || dst.is_loopback()) {
            return Verdict::Suppress(SuppressReason::PrivateNetwork);
        }
        if self.filter_private_networks && !is_public(src) && !is_public(dst) {
            return Verdict::Suppress(SuppressReason::PrivateNetwork);
        }

        // Layer 6: legitimate port with low volume
        if self.whitelist_ports.contains(&snap.key.dst_port)
            && snap.packet_count() < self.legitimate_port_packet_threshold
        {
            return Verdict::Suppress(SuppressReason::LegitimateLowVolume);
        }

        // Layer 7: adaptive baseline
        if self.baseline.matches(&Fingerprint::of(snap)) {
            return Verdict::Suppress(SuppressReason::BaselineMatch);
        }

        Verdict::Emit
    }

    fn matches_cloud_prefix(&self, ip: IpAddr) -> bool {
        if self.cloud_prefixes.is_empty() {
            return false;
        }
        let dotted = ip.to_string();
        self.cloud_prefixes.iter().any(|p| dotted.starts_with(p))
    }

    fn is_whitelisted(&self, ip: IpAddr) -> bool {
        self.whitelist_networks.iter().any(|net| net.contains(ip))
    }

    fn record(&self, snap: &FlowSnapshot, prediction: &Prediction, reason: SuppressReason) {
        tracing::debug!(
            key = %snap.key,
            label = %prediction.label,
            reason = reason.as_str(),
            "flow suppressed"
        );
        let mut ring = self.ring.lock();
        if ring.len() == DEBUG_RING_CAPACITY {
            ring.pop_front();
        }
        ring.push_back(SuppressionEvent {
            at: Utc::now(),
            key: snap.key,
            label: prediction.label.clone(),
            confidence: prediction.confidence,
            reason,
        });
    }

    /// Newest-first slice of the debug ring.
    pub fn recent_suppressions(&self, limit: usize) -> Vec<SuppressionEvent> {
        let ring = self.ring.lock();
        ring.iter().rev().take(limit).cloned().collect()
    }
}

/// Globally routable, as far as the cascade cares: not RFC1918,
/// link-local, loopback, multicast, broadcast, or unique-local.
fn is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_private()
                || v4.is_loopback()
                || v4.is_link_local()
                || v4.is_multicast()
                || v4.is_broadcast()
                || v4.is_unspecified())
        }
        IpAddr::V6(v6) => {
            let seg = v6.segments();
            let unique_local = (seg[0] & 0xfe00) == 0xfc00;
            let link_local = (seg[0] & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_multicast() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentra_common::config::AdaptiveBaselineConfig;
    use sentra_common::labels::Severity;
    use sentra_flow::FlowCounters;
    use sentra_ml::{ModelVote, PredictionMethod};
    use std::collections::HashMap;
    use std::time::Duration;

    fn snap(src: &str, dst: &str, dst_port: u16, packets: u64) -> FlowSnapshot {
        let mut counters = FlowCounters::default();
        counters.packet_count = packets;
        counters.byte_total = packets * 60;
        FlowSnapshot {
            uid: 1,
            key: FlowKey {
                src_ip: src.parse().unwrap(),
                dst_ip: dst.parse().unwrap(),
                protocol: 6,
                src_port: 40000,
                dst_port,
            },
            first_seen_nanos: 0,
            last_seen_nanos: 2_000_000_000,
            first_seen_wall: Utc::now(),
            counters,
            packets: Vec::new(),
        }
    }

    fn prediction(label: &str, confidence: f64) -> Prediction {
        Prediction {
            label: label.to_string(),
            class_index: 7,
            severity: if label == BENIGN_LABEL {
                Severity::Low
            } else {
                Severity::Medium
            },
            confidence,
            method: PredictionMethod::EnsembleWeighted,
            tree: ModelVote {
                class_index: 7,
                confidence,
            },
            nn: ModelVote {
                class_index: 7,
                confidence,
            },
        }
    }

    fn baseline_off() -> AdaptiveBaseline {
        AdaptiveBaseline::new(AdaptiveBaselineConfig {
            enabled: false,
            ..AdaptiveBaselineConfig::default()
        })
    }

    fn suppressor(config: DetectionConfig) -> Suppressor {
        Suppressor::new(&config, baseline_off())
    }

    fn open_config() -> DetectionConfig {
        DetectionConfig {
            filter_private_networks: false,
            filter_localhost: false,
            whitelist_ports: Vec::new(),
            ..DetectionConfig::default()
        }
    }

    #[test]
    fn test_benign_suppressed_as_not_a_threat() {
        let s = suppressor(open_config());
        let verdict = s.evaluate(&snap("1.2.3.4", "5.6.7.8", 8080, 1000), &prediction(BENIGN_LABEL, 0.99));
        assert_eq!(verdict, Verdict::Suppress(SuppressReason::NotAThreat));
    }

    #[test]
    fn test_ignored_label_suppressed() {
        let mut config = open_config();
        config.ignored_attack_types = vec!["DoS-TCP_Flood".into()];
        let s = suppressor(config);
        let verdict = s.evaluate(&snap("1.2.3.4", "5.6.7.8", 8080, 1000), &prediction("DoS-TCP_Flood", 0.99));
        assert_eq!(verdict, Verdict::Suppress(SuppressReason::NotAThreat));
    }

    #[test]
    fn test_confidence_boundary_passes_at_threshold() {
        let s = suppressor(open_config());
        let flow = snap("1.2.3.4", "5.6.7.8", 8080, 1000);
        assert_eq!(s.evaluate(&flow, &prediction("DDoS-SYN_Flood", 0.95)), Verdict::Emit);
        assert_eq!(
            s.evaluate(&flow, &prediction("DDoS-SYN_Flood", 0.9499)),
            Verdict::Suppress(SuppressReason::LowConfidence)
        );
    }

    #[test]
    fn test_packet_count_boundary() {
        let s = suppressor(open_config());
        let verdict = s.evaluate(&snap("1.2.3.4", "5.6.7.8", 8080, 199), &prediction("DDoS-SYN_Flood", 0.99));
        assert_eq!(verdict, Verdict::Suppress(SuppressReason::InsufficientTraffic));
        assert_eq!(
            s.evaluate(&snap("1.2.3.4", "5.6.7.8", 8080, 200), &prediction("DDoS-SYN_Flood", 0.99)),
            Verdict::Emit
        );
    }

    #[test]
    fn test_cloud_prefix_suppression() {
        let mut config = open_config();
        config.cloud_prefixes = vec!["140.82.".into(), "8.8.".into()];
        let s = suppressor(config);
        let verdict = s.evaluate(
            &snap("192.168.1.10", "140.82.113.26", 443, 1000),
            &prediction("DDoS-RSTFINFlood", 0.99),
        );
        assert_eq!(verdict, Verdict::Suppress(SuppressReason::CloudTraffic));
    }

    #[test]
    fn test_whitelist_cidr_first_address() {
        let mut config = open_config();
        config.whitelist_ips = vec!["203.0.113.0/24".into()];
        let s = suppressor(config);
        // The network address itself is whitelisted.
        let verdict = s.evaluate(
            &snap("203.0.113.0", "5.6.7.8", 8080, 1000),
            &prediction("DDoS-SYN_Flood", 0.99),
        );
        assert_eq!(verdict, Verdict::Suppress(SuppressReason::WhitelistedIp));
    }

    #[test]
    fn test_private_network_filter() {
        let mut config = open_config();
        config.filter_private_networks = true;
        let s = suppressor(config);
        assert_eq!(
            s.evaluate(&snap("10.0.0.50", "10.0.0.100", 8080, 1000), &prediction("DDoS-SYN_Flood", 0.99)),
            Verdict::Suppress(SuppressReason::PrivateNetwork)
        );
        // One public endpoint passes the layer.
        assert_eq!(
            s.evaluate(&snap("10.0.0.50", "5.6.7.8", 8080, 1000), &prediction("DDoS-SYN_Flood", 0.99)),
            Verdict::Emit
        );
    }

    #[test]
    fn test_private_filter_disabled_emits() {
        let s = suppressor(open_config());
        assert_eq!(
            s.evaluate(&snap("10.0.0.50", "10.0.0.100", 8080, 1000), &prediction("DDoS-SYN_Flood", 0.99)),
            Verdict::Emit
        );
    }

    #[test]
    fn test_localhost_filter() {
        let mut config = open_config();
        config.filter_localhost = true;
        let s = suppressor(config);
        assert_eq!(
            s.evaluate(&snap("127.0.0.1", "127.0.0.1", 8080, 1000), &prediction("DDoS-SYN_Flood", 0.99)),
            Verdict::Suppress(SuppressReason::PrivateNetwork)
        );
    }

    #[test]
    fn test_legitimate_port_low_volume() {
        let mut config = open_config();
        config.whitelist_ports = vec![443];
        let s = suppressor(config);
        assert_eq!(
            s.evaluate(&snap("1.2.3.4", "5.6.7.8", 443, 499), &prediction("DDoS-SYN_Flood", 0.99)),
            Verdict::Suppress(SuppressReason::LegitimateLowVolume)
        );
        // At the threshold the layer passes.
        assert_eq!(
            s.evaluate(&snap("1.2.3.4", "5.6.7.8", 443, 500), &prediction("DDoS-SYN_Flood", 0.99)),
            Verdict::Emit
        );
    }

    #[test]
    fn test_baseline_match_suppresses() {
        let flow = snap("1.2.3.4", "5.6.7.8", 8080, 1000);
        let fp = Fingerprint::of(&flow);
        let mut counts = HashMap::new();
        counts.insert(fp, 5);
        let baseline = AdaptiveBaseline::from_state(
            AdaptiveBaselineConfig::default(),
            Duration::from_secs(3600),
            counts,
        );
        let s = Suppressor::new(&open_config(), baseline);
        assert_eq!(
            s.evaluate(&flow, &prediction("DDoS-SYN_Flood", 0.99)),
            Verdict::Suppress(SuppressReason::BaselineMatch)
        );
    }

    #[test]
    fn test_pure_ml_mode_applies_only_threat_layer() {
        let mut config = open_config();
        config.mode = DetectionMode::PureMl;
        let s = suppressor(config);
        // Low confidence and low packet count, still emits.
        assert_eq!(
            s.evaluate(&snap("10.0.0.1", "10.0.0.2", 443, 3), &prediction("DDoS-SYN_Flood", 0.1)),
            Verdict::Emit
        );
        assert_eq!(
            s.evaluate(&snap("10.0.0.1", "10.0.0.2", 443, 3), &prediction(BENIGN_LABEL, 0.99)),
            Verdict::Suppress(SuppressReason::NotAThreat)
        );
    }

    #[test]
    fn test_debug_ring_records_reasons() {
        let s = suppressor(open_config());
        s.evaluate(&snap("1.2.3.4", "5.6.7.8", 8080, 5), &prediction("DDoS-SYN_Flood", 0.99));
        s.evaluate(&snap("1.2.3.4", "5.6.7.8", 8080, 1000), &prediction(BENIGN_LABEL, 0.99));
        let events = s.recent_suppressions(10);
        assert_eq!(events.len(), 2);
        // Newest first.
        assert_eq!(events[0].reason, SuppressReason::NotAThreat);
        assert_eq!(events[1].reason, SuppressReason::InsufficientTraffic);
    }
}
