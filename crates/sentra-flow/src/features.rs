//! Feature extraction
//!
//! Computes the fixed 37-feature vector for a flow snapshot. Column
//! order is the training contract and never changes; the scaler and
//! both models expect exactly this layout.

use crate::flow::FlowSnapshot;

/// Dimensionality of the model input.
pub const NUM_FEATURES: usize = 37;

/// Canonical column names, in training order.
pub const FEATURE_NAMES: [&str; NUM_FEATURES] = [
    "flow_duration",
    "Header_Length",
    "Protocol Type",
    "Duration",
    "Rate",
    "Drate",
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
    "HTTP",
    "HTTPS",
    "DNS",
    "Telnet",
    "SMTP",
    "SSH",
    "IRC",
    "TCP",
    "UDP",
    "DHCP",
    "ARP",
    "ICMP",
    "IPv",
    "Tot sum",
    "Min",
    "Max",
    "AVG",
    "Tot size",
    "IAT",
    "Covariance",
    "Variance",
];

/// Model input vector.
pub type FeatureVector = [f64; NUM_FEATURES];

const EPSILON: f64 = 1e-6;

fn indicator(b: bool) -> f64 {
    if b {
        1.0
    } else {
        0.0
    }
}

/// Extract the feature vector from a flow snapshot.
///
/// Deterministic: the same snapshot always yields a bit-identical
/// vector. All outputs are finite; statistics needing two samples
/// are 0 for shorter flows.
pub fn extract(snap: &FlowSnapshot) -> FeatureVector {
    let c = &snap.counters;
    let n = c.packet_count as f64;
    let duration = snap.duration_seconds();
    let denom = duration.max(EPSILON);

    let protocol_type = match snap.key.protocol {
        6 => 6.0,
        17 => 17.0,
        1 => 1.0,
        _ => 0.0,
    };

    let mut min_len = 0.0;
    let mut max_len = 0.0;
    let mut avg_len = 0.0;
    if !snap.packets.is_empty() {
        min_len = snap.packets.iter().map(|p| p.len).min().unwrap_or(0) as f64;
        max_len = snap.packets.iter().map(|p| p.len).max().unwrap_or(0) as f64;
        avg_len = c.byte_total as f64 / n;
    }

    // Adjacent-packet samples: inter-arrival time paired with the
    // size of the later packet.
    let mut iat_mean = 0.0;
    let mut covariance = 0.0;
    let mut variance = 0.0;
    if snap.packets.len() >= 2 {
        let iats: Vec<f64> = snap
            .packets
            .windows(2)
            .map(|w| (w[1].ts_nanos.saturating_sub(w[0].ts_nanos)) as f64 / 1e9)
            .collect();
        iat_mean = iats.iter().sum::<f64>() / iats.len() as f64;

        let sizes: Vec<f64> = snap.packets.iter().map(|p| p.len as f64).collect();
        let size_mean = sizes.iter().sum::<f64>() / sizes.len() as f64;
        variance = sizes.iter().map(|s| (s - size_mean).powi(2)).sum::<f64>() / sizes.len() as f64;

        let paired: Vec<f64> = sizes[1..].to_vec();
        let paired_mean = paired.iter().sum::<f64>() / paired.len() as f64;
        covariance = paired
            .iter()
            .zip(iats.iter())
            .map(|(s, t)| (s - paired_mean) * (t - iat_mean))
            .sum::<f64>()
            / paired.len() as f64;
    }

    let mut v: FeatureVector = [0.0; NUM_FEATURES];
    v[0] = duration;
    v[1] = c.header_total as f64;
    v[2] = protocol_type;
    v[3] = c.min_ttl.unwrap_or(0) as f64;
    v[4] = n / denom;
    v[5] = c.forward_packets as f64 / denom;
    v[6] = indicator(c.fin_count > 0);
    v[7] = indicator(c.syn_count > 0);
    v[8] = indicator(c.psh_count > 0);
    v[9] = indicator(c.ack_count > 0);
    v[10] = indicator(c.ece_count > 0);
    v[11] = indicator(c.cwr_count > 0);
    v[12] = c.syn_count as f64;
    v[13] = c.fin_count as f64;
    v[14] = c.urg_count as f64;
    v[15] = c.rst_count as f64;
    v[16] = indicator(c.http);
    v[17] = indicator(c.https);
    v[18] = indicator(c.dns);
    v[19] = indicator(c.telnet);
    v[20] = indicator(c.smtp);
    v[21] = indicator(c.ssh);
    v[22] = indicator(c.irc);
    v[23] = indicator(c.tcp);
    v[24] = indicator(c.udp);
    v[25] = indicator(c.dhcp);
    v[26] = indicator(c.arp);
    v[27] = indicator(c.icmp);
    v[28] = indicator(c.ipv4);
    v[29] = c.byte_total as f64;
    v[30] = min_len;
    v[31] = max_len;
    v[32] = avg_len;
    v[33] = c.payload_total as f64;
    v[34] = iat_mean;
    v[35] = covariance;
    v[36] = variance;

    // The models cannot take non-finite input.
    for x in v.iter_mut() {
        if !x.is_finite() {
            *x = 0.0;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::Flow;
    use chrono::Utc;
    use sentra_common::flow::tcp_flags;
    use sentra_common::PacketSummary;
    use std::net::IpAddr;

    fn pkt(ts_nanos: u64, len: u32, flags: u8) -> PacketSummary {
        PacketSummary {
            ts_nanos,
            src_ip: "192.168.1.10".parse::<IpAddr>().unwrap(),
            dst_ip: "10.0.0.1".parse::<IpAddr>().unwrap(),
            protocol: 6,
            src_port: 40000,
            dst_port: 80,
            tcp_flags: flags,
            total_len: len,
            header_len: 20,
            payload_len: len.saturating_sub(54),
            ttl: 64,
            is_ipv4: true,
            is_arp: false,
        }
    }

    fn flow_of(packets: &[PacketSummary]) -> FlowSnapshot {
        let mut flow = Flow::new(1, packets[0].key(), Utc::now(), packets[0].ts_nanos);
        for p in packets {
            flow.record(p, true);
        }
        flow.snapshot()
    }

    #[test]
    fn test_feature_names_are_stable() {
        assert_eq!(FEATURE_NAMES.len(), 37);
        assert_eq!(FEATURE_NAMES[0], "flow_duration");
        assert_eq!(FEATURE_NAMES[4], "Rate");
        assert_eq!(FEATURE_NAMES[12], "syn_count");
        assert_eq!(FEATURE_NAMES[29], "Tot sum");
        assert_eq!(FEATURE_NAMES[36], "Variance");
    }

    #[test]
    fn test_extraction_is_deterministic() {
        let snap = flow_of(&[
            pkt(0, 100, tcp_flags::SYN),
            pkt(1_000_000_000, 200, tcp_flags::ACK),
            pkt(3_000_000_000, 300, tcp_flags::PSH | tcp_flags::ACK),
        ]);
        let a = extract(&snap);
        let b = extract(&snap);
        assert_eq!(a.map(f64::to_bits), b.map(f64::to_bits));
    }

    #[test]
    fn test_known_flow_values() {
        // Sizes 100, 200, 300 at t = 0s, 1s, 3s.
        let snap = flow_of(&[
            pkt(0, 100, tcp_flags::SYN),
            pkt(1_000_000_000, 200, tcp_flags::ACK),
            pkt(3_000_000_000, 300, tcp_flags::ACK),
        ]);
        let v = extract(&snap);

        assert_eq!(v[0], 3.0); // flow_duration
        assert_eq!(v[1], 60.0); // Header_Length
        assert_eq!(v[2], 6.0); // Protocol Type
        assert_eq!(v[3], 64.0); // Duration (TTL surrogate)
        assert!((v[4] - 1.0).abs() < 1e-9); // Rate
        assert!((v[5] - 1.0).abs() < 1e-9); // Drate, all forward
        assert_eq!(v[7], 1.0); // syn_flag_number
        assert_eq!(v[12], 1.0); // syn_count
        assert_eq!(v[16], 1.0); // HTTP (port 80)
        assert_eq!(v[23], 1.0); // TCP
        assert_eq!(v[28], 1.0); // IPv
        assert_eq!(v[29], 600.0); // Tot sum
        assert_eq!(v[30], 100.0); // Min
        assert_eq!(v[31], 300.0); // Max
        assert_eq!(v[32], 200.0); // AVG
        assert!((v[34] - 1.5).abs() < 1e-9); // IAT mean of {1, 2}
        assert!((v[35] - 25.0).abs() < 1e-9); // Covariance
        assert!((v[36] - 20000.0 / 3.0).abs() < 1e-9); // Variance
    }

    #[test]
    fn test_single_packet_edges() {
        let snap = flow_of(&[pkt(0, 100, tcp_flags::SYN)]);
        let v = extract(&snap);
        assert_eq!(v[0], 0.0);
        // Zero duration falls back to epsilon.
        assert!((v[4] - 1.0 / 1e-6).abs() < 1e-3);
        assert_eq!(v[34], 0.0); // IAT
        assert_eq!(v[35], 0.0); // Covariance
        assert_eq!(v[36], 0.0); // Variance
        assert!(v.iter().all(|x| x.is_finite()));
    }
}
