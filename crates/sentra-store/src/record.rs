//! Persisted flow records

use sentra_common::labels::Severity;
use sentra_flow::{FeatureVector, FlowSnapshot, NUM_FEATURES};
use sentra_ml::Prediction;

/// SQL column names for the 37 feature values, in canonical feature
/// order.
pub const FEATURE_COLUMNS: [&str; NUM_FEATURES] = [
    "flow_duration",
    "header_length",
    "protocol_type",
    "duration",
    "rate",
    "drate",
    "fin_flag_number",
    "syn_flag_number",
    "psh_flag_number",
    "ack_flag_number",
    "ece_flag_number",
    "cwr_flag_number",
    "syn_count",
    "fin_count",
    "urg_count",
    "rst_count",
    "http",
    "https",
    "dns",
    "telnet",
    "smtp",
    "ssh",
    "irc",
    "tcp",
    "udp",
    "dhcp",
    "arp",
    "icmp",
    "ipv",
    "tot_sum",
    "size_min",
    "size_max",
    "size_avg",
    "tot_size",
    "iat",
    "covariance",
    "variance",
];

/// One row of the flow table: identity, features, and the prediction
/// summary. `flow_uid` keys the row, so re-scoring a live flow
/// updates it in place rather than appending a duplicate.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowRecord {
    pub flow_uid: u64,
    /// Wall time of first sight, seconds since epoch
    pub timestamp: f64,
    pub src_ip: String,
    pub src_port: u16,
    pub dst_ip: String,
    pub dst_port: u16,
    pub protocol: u8,
    pub features: FeatureVector,
    pub predicted_label: String,
    pub severity: Severity,
    pub confidence: f64,
    pub method: String,
    /// Whether the suppression cascade let this flow alert
    pub emitted: bool,
    pub ground_truth_label: Option<String>,
    pub label_verified: bool,
}

impl FlowRecord {
    /// Build a record from one scoring event.
    pub fn from_scored(
        snap: &FlowSnapshot,
        features: &FeatureVector,
        prediction: &Prediction,
        emitted: bool,
    ) -> Self {
        Self {
            flow_uid: snap.uid,
            timestamp: snap.first_seen_wall.timestamp() as f64
                + snap.first_seen_wall.timestamp_subsec_micros() as f64 / 1e6,
            src_ip: snap.key.src_ip.to_string(),
            src_port: snap.key.src_port,
            dst_ip: snap.key.dst_ip.to_string(),
            dst_port: snap.key.dst_port,
            protocol: snap.key.protocol,
            features: *features,
            predicted_label: prediction.label.clone(),
            severity: prediction.severity,
            confidence: prediction.confidence,
            method: prediction.method.as_str().to_string(),
            emitted,
            ground_truth_label: None,
            label_verified: false,
        }
    }
}
