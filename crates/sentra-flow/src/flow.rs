//! Per-flow state
//!
//! A flow owns its packet summaries until eviction. Counters are
//! maintained incrementally on ingest; windowed statistics are
//! computed from the retained summaries at snapshot time.

use chrono::{DateTime, Utc};
use sentra_common::flow::{tcp_flags, FlowKey, PacketSummary};

/// Header summary retained per packet.
#[derive(Debug, Clone, Copy)]
pub struct PacketRecord {
    pub ts_nanos: u64,
    /// Total frame length
    pub len: u32,
    pub header_len: u16,
    pub payload_len: u32,
    pub tcp_flags: u8,
    /// True when the packet travels toward the canonical destination.
    pub forward: bool,
}

/// Incrementally maintained flow counters.
#[derive(Debug, Clone, Default)]
pub struct FlowCounters {
    pub packet_count: u64,
    pub byte_total: u64,
    pub payload_total: u64,
    pub header_total: u64,
    /// Packets traveling toward the canonical destination
    pub forward_packets: u64,

    pub fin_count: u64,
    pub syn_count: u64,
    pub rst_count: u64,
    pub psh_count: u64,
    pub ack_count: u64,
    pub urg_count: u64,
    pub ece_count: u64,
    pub cwr_count: u64,

    // Application protocols seen, by well-known port
    pub http: bool,
    pub https: bool,
    pub dns: bool,
    pub telnet: bool,
    pub smtp: bool,
    pub ssh: bool,
    pub irc: bool,

    pub tcp: bool,
    pub udp: bool,
    pub icmp: bool,
    pub arp: bool,
    pub dhcp: bool,
    pub ipv4: bool,

    /// Smallest TTL observed on IPv4 packets
    pub min_ttl: Option<u8>,
}

impl FlowCounters {
    fn record(&mut self, pkt: &PacketSummary, forward: bool) {
        self.packet_count = self.packet_count.saturating_add(1);
        self.byte_total = self.byte_total.saturating_add(pkt.total_len as u64);
        self.payload_total = self.payload_total.saturating_add(pkt.payload_len as u64);
        self.header_total = self.header_total.saturating_add(pkt.header_len as u64);
        if forward {
            self.forward_packets = self.forward_packets.saturating_add(1);
        }

        if pkt.has_flag(tcp_flags::FIN) {
            self.fin_count = self.fin_count.saturating_add(1);
        }
        if pkt.has_flag(tcp_flags::SYN) {
            self.syn_count = self.syn_count.saturating_add(1);
        }
        if pkt.has_flag(tcp_flags::RST) {
            self.rst_count = self.rst_count.saturating_add(1);
        }
        if pkt.has_flag(tcp_flags::PSH) {
            self.psh_count = self.psh_count.saturating_add(1);
        }
        if pkt.has_flag(tcp_flags::ACK) {
            self.ack_count = self.ack_count.saturating_add(1);
        }
        if pkt.has_flag(tcp_flags::URG) {
            self.urg_count = self.urg_count.saturating_add(1);
        }
        if pkt.has_flag(tcp_flags::ECE) {
            self.ece_count = self.ece_count.saturating_add(1);
        }
        if pkt.has_flag(tcp_flags::CWR) {
            self.cwr_count = self.cwr_count.saturating_add(1);
        }

        let port_match = |p: u16| pkt.src_port == p || pkt.dst_port == p;
        self.http |= port_match(80);
        self.https |= port_match(443);
        self.dns |= port_match(53);
        self.telnet |= port_match(23);
        self.smtp |= port_match(25);
        self.ssh |= port_match(22);
        self.irc |= port_match(194);

        match pkt.protocol {
            6 => self.tcp = true,
            17 => {
                self.udp = true;
                if port_match(67) || port_match(68) {
                    self.dhcp = true;
                }
            }
            1 | 58 => self.icmp = true,
            _ => {}
        }
        self.arp |= pkt.is_arp;
        if pkt.is_ipv4 {
            self.ipv4 = true;
            self.min_ttl = Some(match self.min_ttl {
                Some(t) => t.min(pkt.ttl),
                None => pkt.ttl,
            });
        }
    }
}

/// A bidirectional flow, keyed by the first-seen direction.
#[derive(Debug)]
pub struct Flow {
    uid: u64,
    key: FlowKey,
    first_seen_nanos: u64,
    last_seen_nanos: u64,
    first_seen_wall: DateTime<Utc>,
    packets: Vec<PacketRecord>,
    counters: FlowCounters,
    last_scored_packet_count: u64,
}

impl Flow {
    pub(crate) fn new(uid: u64, key: FlowKey, wall: DateTime<Utc>, ts_nanos: u64) -> Self {
        Self {
            uid,
            key,
            first_seen_nanos: ts_nanos,
            last_seen_nanos: ts_nanos,
            first_seen_wall: wall,
            packets: Vec::new(),
            counters: FlowCounters::default(),
            last_scored_packet_count: 0,
        }
    }

    pub(crate) fn record(&mut self, pkt: &PacketSummary, forward: bool) {
        self.last_seen_nanos = self.last_seen_nanos.max(pkt.ts_nanos);
        self.counters.record(pkt, forward);
        self.packets.push(PacketRecord {
            ts_nanos: pkt.ts_nanos,
            len: pkt.total_len,
            header_len: pkt.header_len,
            payload_len: pkt.payload_len,
            tcp_flags: pkt.tcp_flags,
            forward,
        });
    }

    pub fn uid(&self) -> u64 {
        self.uid
    }

    pub fn key(&self) -> FlowKey {
        self.key
    }

    pub fn packet_count(&self) -> u64 {
        self.counters.packet_count
    }

    pub fn last_seen_nanos(&self) -> u64 {
        self.last_seen_nanos
    }

    pub(crate) fn packets_since_last_score(&self) -> u64 {
        self.counters.packet_count - self.last_scored_packet_count
    }

    pub(crate) fn mark_scored(&mut self) {
        self.last_scored_packet_count = self.counters.packet_count;
    }

    /// Immutable copy for extraction and scoring.
    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            uid: self.uid,
            key: self.key,
            first_seen_nanos: self.first_seen_nanos,
            last_seen_nanos: self.last_seen_nanos,
            first_seen_wall: self.first_seen_wall,
            counters: self.counters.clone(),
            packets: self.packets.clone(),
        }
    }
}

/// Immutable view of a flow at a point in time.
#[derive(Debug, Clone)]
pub struct FlowSnapshot {
    pub uid: u64,
    pub key: FlowKey,
    pub first_seen_nanos: u64,
    pub last_seen_nanos: u64,
    pub first_seen_wall: DateTime<Utc>,
    pub counters: FlowCounters,
    pub packets: Vec<PacketRecord>,
}

impl FlowSnapshot {
    pub fn packet_count(&self) -> u64 {
        self.counters.packet_count
    }

    /// Flow duration in seconds.
    pub fn duration_seconds(&self) -> f64 {
        (self.last_seen_nanos.saturating_sub(self.first_seen_nanos)) as f64 / 1e9
    }

    /// Packet rate over the flow lifetime.
    pub fn rate(&self) -> f64 {
        self.counters.packet_count as f64 / self.duration_seconds().max(1e-6)
    }

    /// Mean packet size in bytes.
    pub fn mean_packet_size(&self) -> f64 {
        if self.counters.packet_count == 0 {
            0.0
        } else {
            self.counters.byte_total as f64 / self.counters.packet_count as f64
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::IpAddr;

    fn pkt(ts_nanos: u64, flags: u8, len: u32) -> PacketSummary {
        PacketSummary {
            ts_nanos,
            src_ip: "10.0.0.1".parse::<IpAddr>().unwrap(),
            dst_ip: "10.0.0.2".parse::<IpAddr>().unwrap(),
            protocol: 6,
            src_port: 40000,
            dst_port: 443,
            tcp_flags: flags,
            total_len: len,
            header_len: 20,
            payload_len: len.saturating_sub(54),
            ttl: 64,
            is_ipv4: true,
            is_arp: false,
        }
    }

    #[test]
    fn test_flag_counts_match_packet_iteration() {
        let key = pkt(0, 0, 60).key();
        let mut flow = Flow::new(1, key, Utc::now(), 0);
        let flags = [
            tcp_flags::SYN,
            tcp_flags::SYN | tcp_flags::ACK,
            tcp_flags::ACK,
            tcp_flags::PSH | tcp_flags::ACK,
            tcp_flags::FIN | tcp_flags::ACK,
        ];
        for (i, f) in flags.iter().enumerate() {
            flow.record(&pkt(i as u64 * 1000, *f, 60), true);
        }

        let snap = flow.snapshot();
        let count = |mask: u8| {
            snap.packets
                .iter()
                .filter(|p| p.tcp_flags & mask != 0)
                .count() as u64
        };
        assert_eq!(snap.counters.syn_count, count(tcp_flags::SYN));
        assert_eq!(snap.counters.ack_count, count(tcp_flags::ACK));
        assert_eq!(snap.counters.fin_count, count(tcp_flags::FIN));
        assert_eq!(snap.counters.psh_count, count(tcp_flags::PSH));
        assert_eq!(snap.counters.rst_count, 0);
    }

    #[test]
    fn test_app_protocol_and_ttl_tracking() {
        let key = pkt(0, 0, 60).key();
        let mut flow = Flow::new(1, key, Utc::now(), 0);
        let mut p = pkt(0, tcp_flags::SYN, 60);
        p.ttl = 64;
        flow.record(&p, true);
        let mut p2 = pkt(1000, tcp_flags::ACK, 60);
        p2.ttl = 57;
        flow.record(&p2, false);

        let snap = flow.snapshot();
        assert!(snap.counters.https);
        assert!(!snap.counters.http);
        assert!(snap.counters.tcp);
        assert_eq!(snap.counters.min_ttl, Some(57));
        assert_eq!(snap.counters.forward_packets, 1);
    }

    #[test]
    fn test_last_seen_advances() {
        let key = pkt(0, 0, 60).key();
        let mut flow = Flow::new(1, key, Utc::now(), 0);
        flow.record(&pkt(5_000, 0, 60), true);
        flow.record(&pkt(9_000, 0, 60), true);
        assert_eq!(flow.last_seen_nanos(), 9_000);
        assert_eq!(flow.packet_count(), 2);
    }
}
