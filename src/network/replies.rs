//! Reply frame construction
//!
//! Every builder here is a pure function of the request frame (and, for
//! ARP, the registry). None of them look at puzzle state. Returning `None`
//! means the request did not have the layer the builder needs.

use crate::network::frame::{ArpMessage, Frame, Layer, TcpSegment, Transport};
use crate::network::tcp_flags;
use crate::simulator::registry::NetworkRegistry;
use pnet::packet::arp::ArpOperations;
use pnet::packet::ethernet::EtherTypes;
use pnet::packet::icmp::IcmpTypes;
use std::net::Ipv4Addr;

/// Initial sequence number of every SYN-ACK
pub const SYN_ACK_SEQUENCE: u32 = 0x1000;

/// Sequence number of every RST-ACK
pub const RESET_SEQUENCE: u32 = 1;

/// ARP is-at answer for a who-has.
///
/// The target protocol address is always `own_ip`, the simulator's own
/// network address, not the requester's sender address.
pub fn arp_is_at(req: &Frame, registry: &NetworkRegistry, own_ip: Ipv4Addr) -> Option<Frame> {
    let arp = req.arp()?;
    let mac = registry.lookup(arp.target_ip)?;

    let mut reply = req.clone();
    reply.ethernet.destination = arp.sender_hw;
    reply.ethernet.source = mac;
    reply.ethernet.ethertype = EtherTypes::Arp;
    reply.layer = Layer::Arp(ArpMessage {
        operation: ArpOperations::Reply,
        sender_hw: mac,
        sender_ip: arp.target_ip,
        target_hw: arp.sender_hw,
        target_ip: own_ip,
    });
    Some(reply)
}

/// ICMP echo reply with identifier, sequence and payload unchanged
pub fn icmp_echo_reply(req: &Frame) -> Option<Frame> {
    req.icmp()?;
    let mut reply = about_face(req);
    if let Some(ip) = reply.ipv4_mut() {
        if let Transport::Icmp(icmp) = &mut ip.transport {
            icmp.icmp_type = IcmpTypes::EchoReply;
        }
    }
    Some(reply)
}

/// Open port answer to a SYN
pub fn tcp_syn_ack(req: &Frame) -> Option<Frame> {
    let seq = req.tcp()?.sequence;
    tcp_reply(req, |tcp| {
        tcp.flags = tcp_flags::SYN_ACK;
        tcp.sequence = SYN_ACK_SEQUENCE;
        tcp.acknowledgement = seq.wrapping_add(1);
    })
}

/// Closed port answer to a SYN. The acknowledgement echoes the request's
/// own sequence number.
pub fn tcp_reset_ack(req: &Frame) -> Option<Frame> {
    let seq = req.tcp()?.sequence;
    tcp_reply(req, |tcp| {
        tcp.flags = tcp_flags::RST_ACK;
        tcp.sequence = RESET_SEQUENCE;
        tcp.acknowledgement = seq;
    })
}

/// Bare acknowledgement of the request
pub fn tcp_ack(req: &Frame) -> Option<Frame> {
    let (seq, ack, consumed) = sequence_space(req.tcp()?);
    tcp_reply(req, |tcp| {
        tcp.flags = tcp_flags::ACK;
        tcp.sequence = ack;
        tcp.acknowledgement = seq.wrapping_add(consumed.max(1));
    })
}

/// Close our side of the connection
pub fn tcp_fin_ack(req: &Frame) -> Option<Frame> {
    let (seq, ack, _) = sequence_space(req.tcp()?);
    tcp_reply(req, |tcp| {
        tcp.flags = tcp_flags::FIN_ACK;
        tcp.sequence = ack;
        tcp.acknowledgement = seq.wrapping_add(1);
    })
}

/// Application data in answer to the request.
///
/// `seq_offset` is the number of bytes already sent in answer to the same
/// request, so consecutive data frames line up in sequence space.
pub fn tcp_data(req: &Frame, data: &[u8], seq_offset: u32) -> Option<Frame> {
    let (seq, ack, consumed) = sequence_space(req.tcp()?);
    tcp_reply(req, |tcp| {
        tcp.flags = tcp_flags::PSH_ACK;
        tcp.sequence = ack.wrapping_add(seq_offset);
        tcp.acknowledgement = seq.wrapping_add(consumed);
        tcp.payload = data.to_vec();
    })
}

fn sequence_space(tcp: &TcpSegment) -> (u32, u32, u32) {
    (tcp.sequence, tcp.acknowledgement, tcp.payload.len() as u32)
}

/// Swap Ethernet and IPv4 endpoints
fn about_face(req: &Frame) -> Frame {
    let mut reply = req.clone();
    std::mem::swap(&mut reply.ethernet.source, &mut reply.ethernet.destination);
    if let Some(ip) = reply.ipv4_mut() {
        std::mem::swap(&mut ip.source, &mut ip.destination);
    }
    reply
}

fn tcp_reply(req: &Frame, shape: impl FnOnce(&mut TcpSegment)) -> Option<Frame> {
    let mut reply = about_face(req);
    let tcp = reply.tcp_mut()?;
    std::mem::swap(&mut tcp.source_port, &mut tcp.destination_port);
    tcp.payload.clear();
    tcp.urgent_ptr = 0;
    shape(tcp);
    Some(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::frame::{checksums_valid, EthernetHeader, Ipv4Datagram};
    use crate::network::MacAddr;

    fn request(flags: u8, seq: u32, ack: u32, payload: &[u8]) -> Frame {
        Frame {
            ethernet: EthernetHeader::new(
                MacAddr::new(0x12, 0x67, 0x7e, 0xb7, 0x6d, 0xc8),
                MacAddr::new(0x12, 0x67, 0x7e, 0xb7, 0x6d, 0x23),
                EtherTypes::Ipv4,
            ),
            layer: Layer::Ipv4(Ipv4Datagram::new(
                Ipv4Addr::new(10, 5, 0, 1),
                Ipv4Addr::new(10, 5, 0, 35),
                Transport::Tcp(TcpSegment {
                    source_port: 51000,
                    destination_port: 25,
                    sequence: seq,
                    acknowledgement: ack,
                    flags,
                    window: 29200,
                    urgent_ptr: 0,
                    payload: payload.to_vec(),
                }),
            )),
        }
    }

    #[test]
    fn syn_ack_swaps_and_acknowledges() {
        let req = request(tcp_flags::SYN, 100, 0, b"");
        let reply = tcp_syn_ack(&req).unwrap();
        let tcp = reply.tcp().unwrap();
        assert_eq!(tcp.flags, tcp_flags::SYN_ACK);
        assert_eq!(tcp.sequence, SYN_ACK_SEQUENCE);
        assert_eq!(tcp.acknowledgement, 101);
        assert_eq!((tcp.source_port, tcp.destination_port), (25, 51000));
        assert_eq!(reply.ethernet.source, req.ethernet.destination);
        assert_eq!(reply.ipv4().unwrap().source, Ipv4Addr::new(10, 5, 0, 35));
        assert!(checksums_valid(&reply.to_bytes().unwrap()));
    }

    #[test]
    fn reset_uses_fixed_sequence_and_echoes_request_seq() {
        let reply = tcp_reset_ack(&request(tcp_flags::SYN, 1000, 0, b"")).unwrap();
        let tcp = reply.tcp().unwrap();
        assert_eq!(tcp.flags, tcp_flags::RST_ACK);
        assert_eq!(tcp.sequence, RESET_SEQUENCE);
        assert_eq!(tcp.acknowledgement, 1000);

        let reply = tcp_reset_ack(&request(tcp_flags::SYN, u32::MAX, 0, b"")).unwrap();
        assert_eq!(reply.tcp().unwrap().acknowledgement, u32::MAX);
    }

    #[test]
    fn ack_counts_payload_or_one() {
        let reply = tcp_ack(&request(tcp_flags::FIN_ACK, 500, 9000, b"")).unwrap();
        let tcp = reply.tcp().unwrap();
        assert_eq!((tcp.sequence, tcp.acknowledgement), (9000, 501));

        let reply = tcp_ack(&request(tcp_flags::PSH_ACK, 500, 9000, b"NOOP\r\n")).unwrap();
        assert_eq!(reply.tcp().unwrap().acknowledgement, 506);
    }

    #[test]
    fn fin_ack_closes() {
        let reply = tcp_fin_ack(&request(tcp_flags::ACK, 42, 77, b"")).unwrap();
        let tcp = reply.tcp().unwrap();
        assert_eq!(tcp.flags, tcp_flags::FIN_ACK);
        assert_eq!((tcp.sequence, tcp.acknowledgement), (77, 43));
    }

    #[test]
    fn data_frames_chain_in_sequence_space() {
        let req = request(tcp_flags::PSH_ACK, 10, 4097, b"RETR x\r\n");
        let first = tcp_data(&req, b"150 go\r\n", 0).unwrap();
        let second = tcp_data(&req, b"done\r\n", 8).unwrap();
        assert_eq!(first.tcp().unwrap().sequence, 4097);
        assert_eq!(second.tcp().unwrap().sequence, 4105);
        assert_eq!(second.tcp().unwrap().acknowledgement, 18);
        assert_eq!(second.tcp().unwrap().payload, b"done\r\n");
    }

    #[test]
    fn builders_reject_wrong_layers() {
        let req = request(tcp_flags::SYN, 1, 0, b"");
        assert!(icmp_echo_reply(&req).is_none());
        assert!(arp_is_at(&req, &NetworkRegistry::default(), Ipv4Addr::new(10, 5, 0, 1)).is_none());
    }
}
