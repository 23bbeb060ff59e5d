//! Flow keys and packet summaries
//!
//! Byte-level frame parsing into the header summary the aggregator
//! retains; payloads are discarded at parse time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// TCP flag bit masks (flags byte of the TCP header).
pub mod tcp_flags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;
    pub const ECE: u8 = 0x40;
    pub const CWR: u8 = 0x80;
}

/// 5-tuple flow key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    /// Source IP
    pub src_ip: IpAddr,
    /// Destination IP
    pub dst_ip: IpAddr,
    /// IP protocol (0 for ARP)
    pub protocol: u8,
    /// Source port (0 for ICMP/ARP)
    pub src_port: u16,
    /// Destination port (0 for ICMP/ARP)
    pub dst_port: u16,
}

impl FlowKey {
    /// Get reverse flow key (for bidirectional matching)
    pub fn reverse(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            protocol: self.protocol,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} -> {}:{} proto {}",
            self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.protocol
        )
    }
}

/// Parsed packet headers, payload discarded.
///
/// `ts_nanos` is monotonic nanoseconds since engine start; wall time
/// is attached at the flow level.
#[derive(Debug, Clone, Copy)]
pub struct PacketSummary {
    pub ts_nanos: u64,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub protocol: u8,
    pub src_port: u16,
    pub dst_port: u16,
    /// Raw TCP flags byte, 0 for non-TCP
    pub tcp_flags: u8,
    /// Total frame length
    pub total_len: u32,
    /// Transport header length (TCP data offset, 8 for UDP/ICMP)
    pub header_len: u16,
    /// Transport payload length
    pub payload_len: u32,
    /// IPv4 TTL, 0 otherwise
    pub ttl: u8,
    pub is_ipv4: bool,
    pub is_arp: bool,
}

impl PacketSummary {
    /// Flow key for this packet.
    pub fn key(&self) -> FlowKey {
        FlowKey {
            src_ip: self.src_ip,
            dst_ip: self.dst_ip,
            protocol: self.protocol,
            src_port: self.src_port,
            dst_port: self.dst_port,
        }
    }

    /// Whether the packet has the given TCP flag set.
    pub fn has_flag(&self, mask: u8) -> bool {
        self.tcp_flags & mask != 0
    }

    /// Parse from a raw Ethernet frame. Returns `None` for frames the
    /// pipeline does not track (malformed, truncated, non-IP non-ARP).
    pub fn parse(data: &[u8], ts_nanos: u64) -> Option<Self> {
        if data.len() < 14 {
            return None;
        }

        let eth_type = u16::from_be_bytes([data[12], data[13]]);
        match eth_type {
            0x0800 => Self::parse_ipv4(&data[14..], data.len() as u32, ts_nanos),
            0x86DD => Self::parse_ipv6(&data[14..], data.len() as u32, ts_nanos),
            0x0806 => Self::parse_arp(&data[14..], data.len() as u32, ts_nanos),
            _ => None,
        }
    }

    fn parse_ipv4(data: &[u8], frame_len: u32, ts_nanos: u64) -> Option<Self> {
        if data.len() < 20 {
            return None;
        }
        let version = data[0] >> 4;
        if version != 4 {
            return None;
        }

        let ihl = ((data[0] & 0x0f) as usize) * 4;
        if ihl < 20 || data.len() < ihl {
            return None;
        }
        let total_length = u16::from_be_bytes([data[2], data[3]]) as usize;
        let ttl = data[8];
        let protocol = data[9];
        let src_ip = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
        let dst_ip = Ipv4Addr::new(data[16], data[17], data[18], data[19]);

        // Ethernet frames may be padded past the IP total length.
        let ip_payload_len = total_length
            .min(data.len())
            .saturating_sub(ihl);
        let transport = &data[ihl..];

        let (src_port, dst_port, tcp_flags, header_len) =
            parse_transport(protocol, transport);
        let payload_len = (ip_payload_len as u32).saturating_sub(header_len as u32);

        Some(Self {
            ts_nanos,
            src_ip: IpAddr::V4(src_ip),
            dst_ip: IpAddr::V4(dst_ip),
            protocol,
            src_port,
            dst_port,
            tcp_flags,
            total_len: frame_len,
            header_len,
            payload_len,
            ttl,
            is_ipv4: true,
            is_arp: false,
        })
    }

    fn parse_ipv6(data: &[u8], frame_len: u32, ts_nanos: u64) -> Option<Self> {
        if data.len() < 40 {
            return None;
        }

        let protocol = data[6]; // next header, extension chains not walked
        let payload_length = u16::from_be_bytes([data[4], data[5]]) as usize;
        let src: [u8; 16] = data[8..24].try_into().ok()?;
        let dst: [u8; 16] = data[24..40].try_into().ok()?;

        let transport = &data[40..];
        let (src_port, dst_port, tcp_flags, header_len) =
            parse_transport(protocol, transport);
        let payload_len = (payload_length.min(transport.len()) as u32)
            .saturating_sub(header_len as u32);

        Some(Self {
            ts_nanos,
            src_ip: IpAddr::V6(Ipv6Addr::from(src)),
            dst_ip: IpAddr::V6(Ipv6Addr::from(dst)),
            protocol,
            src_port,
            dst_port,
            tcp_flags,
            total_len: frame_len,
            header_len,
            payload_len,
            ttl: 0,
            is_ipv4: false,
            is_arp: false,
        })
    }

    fn parse_arp(data: &[u8], frame_len: u32, ts_nanos: u64) -> Option<Self> {
        // Ethernet/IPv4 ARP only: sender IP at 14, target IP at 24.
        if data.len() < 28 {
            return None;
        }
        let src_ip = Ipv4Addr::new(data[14], data[15], data[16], data[17]);
        let dst_ip = Ipv4Addr::new(data[24], data[25], data[26], data[27]);

        Some(Self {
            ts_nanos,
            src_ip: IpAddr::V4(src_ip),
            dst_ip: IpAddr::V4(dst_ip),
            protocol: 0,
            src_port: 0,
            dst_port: 0,
            tcp_flags: 0,
            total_len: frame_len,
            header_len: 0,
            payload_len: 0,
            ttl: 0,
            is_ipv4: false,
            is_arp: true,
        })
    }
}

/// Returns (src_port, dst_port, tcp_flags, transport_header_len).
fn parse_transport(protocol: u8, transport: &[u8]) -> (u16, u16, u8, u16) {
    match protocol {
        6 => {
            if transport.len() < 4 {
                return (0, 0, 0, 20);
            }
            let sp = u16::from_be_bytes([transport[0], transport[1]]);
            let dp = u16::from_be_bytes([transport[2], transport[3]]);
            // Data offset may be absent on synthesized packets; assume
            // a 20-byte header when the field cannot be read.
            let (flags, header_len) = if transport.len() >= 14 {
                let data_offset = (transport[12] >> 4) as u16 * 4;
                let hl = if data_offset >= 20 { data_offset } else { 20 };
                (transport[13], hl)
            } else {
                (0, 20)
            };
            (sp, dp, flags, header_len)
        }
        17 => {
            if transport.len() < 4 {
                return (0, 0, 0, 8);
            }
            let sp = u16::from_be_bytes([transport[0], transport[1]]);
            let dp = u16::from_be_bytes([transport[2], transport[3]]);
            (sp, dp, 0, 8)
        }
        1 | 58 => (0, 0, 0, 8),
        _ => (0, 0, 0, 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tcp_frame(flags: u8) -> Vec<u8> {
        let mut pkt = vec![
            // Ethernet
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // dst mac
            0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // src mac
            0x08, 0x00, // IPv4
            // IPv4, 20-byte header, total length 40
            0x45, 0x00, 0x00, 0x28, 0x00, 0x00, 0x00, 0x00, 0x40, 0x06, 0x00, 0x00,
            0xc0, 0xa8, 0x01, 0x0a, // src: 192.168.1.10
            0x0a, 0x00, 0x00, 0x01, // dst: 10.0.0.1
            // TCP
            0x30, 0x39, // src port 12345
            0x01, 0xbb, // dst port 443
            0x00, 0x00, 0x00, 0x00, // seq
            0x00, 0x00, 0x00, 0x00, // ack
            0x50, 0x00, // data offset 5, flags placeholder
            0x00, 0x00, // window
            0x00, 0x00, 0x00, 0x00, // checksum, urgent
        ];
        pkt[14 + 20 + 13] = flags;
        pkt
    }

    #[test]
    fn test_parse_tcp() {
        let frame = tcp_frame(tcp_flags::SYN | tcp_flags::ACK);
        let pkt = PacketSummary::parse(&frame, 7).expect("parse failed");
        assert_eq!(pkt.src_port, 12345);
        assert_eq!(pkt.dst_port, 443);
        assert_eq!(pkt.protocol, 6);
        assert_eq!(pkt.ttl, 64);
        assert_eq!(pkt.header_len, 20);
        assert_eq!(pkt.payload_len, 0);
        assert!(pkt.has_flag(tcp_flags::SYN));
        assert!(pkt.has_flag(tcp_flags::ACK));
        assert!(!pkt.has_flag(tcp_flags::FIN));
        assert!(pkt.is_ipv4);
        assert_eq!(pkt.ts_nanos, 7);
    }

    #[test]
    fn test_key_reverse() {
        let frame = tcp_frame(tcp_flags::SYN);
        let key = PacketSummary::parse(&frame, 0).unwrap().key();
        let rev = key.reverse();
        assert_eq!(rev.src_ip, key.dst_ip);
        assert_eq!(rev.src_port, 443);
        assert_eq!(rev.reverse(), key);
    }

    #[test]
    fn test_truncated_frames_dropped() {
        assert!(PacketSummary::parse(&[0u8; 10], 0).is_none());
        let mut frame = tcp_frame(0);
        frame.truncate(20);
        assert!(PacketSummary::parse(&frame, 0).is_none());
    }

    #[test]
    fn test_non_ip_ethertype_dropped() {
        let mut frame = tcp_frame(0);
        frame[12] = 0x88;
        frame[13] = 0xcc;
        assert!(PacketSummary::parse(&frame, 0).is_none());
    }

    #[test]
    fn test_short_tcp_header_assumes_20_bytes() {
        // IPv4 header + only the TCP port words survive truncation.
        let frame = tcp_frame(0);
        let cut = &frame[..14 + 20 + 4];
        let pkt = PacketSummary::parse(cut, 0).unwrap();
        assert_eq!(pkt.header_len, 20);
        assert_eq!(pkt.src_port, 12345);
    }

    #[test]
    fn test_parse_arp() {
        let mut frame = vec![0u8; 14 + 28];
        frame[12] = 0x08;
        frame[13] = 0x06;
        frame[14 + 14..14 + 18].copy_from_slice(&[192, 168, 1, 1]);
        frame[14 + 24..14 + 28].copy_from_slice(&[192, 168, 1, 2]);
        let pkt = PacketSummary::parse(&frame, 0).unwrap();
        assert!(pkt.is_arp);
        assert_eq!(pkt.protocol, 0);
        assert_eq!(pkt.src_ip, "192.168.1.1".parse::<IpAddr>().unwrap());
    }
}
