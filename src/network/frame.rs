//! Ethernet frame codec
//!
//! [`Frame::parse`] turns raw TAP bytes into a typed layer stack and never
//! fails: anything that is not ARP or IPv4 ends up as [`Layer::Opaque`].
//! [`Frame::to_bytes`] rebuilds every header from the typed fields, so the
//! IPv4, TCP and ICMP checksums on the wire are always freshly computed.

use crate::network::MacAddr;
use crate::HuntError;
use pnet::packet::arp::{ArpHardwareTypes, ArpOperation, ArpOperations, ArpPacket, MutableArpPacket};
use pnet::packet::ethernet::{EtherType, EtherTypes, EthernetPacket, MutableEthernetPacket};
use pnet::packet::icmp::{IcmpCode, IcmpPacket, IcmpType, IcmpTypes, MutableIcmpPacket};
use pnet::packet::ip::{IpNextHeaderProtocol, IpNextHeaderProtocols};
use pnet::packet::ipv4::{Ipv4Packet, MutableIpv4Packet};
use pnet::packet::tcp::{MutableTcpPacket, TcpPacket};
use pnet::packet::Packet;
use std::net::Ipv4Addr;

pub const ETHERNET_HEADER_LEN: usize = 14;
pub const ARP_LEN: usize = 28;
pub const IPV4_HEADER_LEN: usize = 20;
pub const TCP_HEADER_LEN: usize = 20;
pub const ICMP_HEADER_LEN: usize = 8;

/// Ethernet II header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub destination: MacAddr,
    pub source: MacAddr,
    pub ethertype: EtherType,
}

impl EthernetHeader {
    pub fn new(source: MacAddr, destination: MacAddr, ethertype: EtherType) -> Self {
        Self {
            destination,
            source,
            ethertype,
        }
    }
}

/// ARP message for IPv4 over Ethernet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpMessage {
    pub operation: ArpOperation,
    pub sender_hw: MacAddr,
    pub sender_ip: Ipv4Addr,
    pub target_hw: MacAddr,
    pub target_ip: Ipv4Addr,
}

impl ArpMessage {
    pub fn is_request(&self) -> bool {
        self.operation == ArpOperations::Request
    }

    pub fn is_reply(&self) -> bool {
        self.operation == ArpOperations::Reply
    }
}

/// TCP segment; options are not kept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpSegment {
    pub source_port: u16,
    pub destination_port: u16,
    pub sequence: u32,
    pub acknowledgement: u32,
    pub flags: u8,
    pub window: u16,
    pub urgent_ptr: u16,
    pub payload: Vec<u8>,
}

impl TcpSegment {
    /// All of these flags are set
    pub fn has_flags(&self, flags: u8) -> bool {
        self.flags & flags == flags
    }

    /// A connection request: SYN without ACK
    pub fn is_syn(&self) -> bool {
        use crate::network::tcp_flags::{ACK, SYN};
        self.flags & (SYN | ACK) == SYN
    }
}

/// ICMP message; identifier and sequence are the first four bytes after
/// the checksum for every type this simulator handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IcmpMessage {
    pub icmp_type: IcmpType,
    pub code: IcmpCode,
    pub identifier: u16,
    pub sequence: u16,
    pub payload: Vec<u8>,
}

impl IcmpMessage {
    pub fn is_echo_request(&self) -> bool {
        self.icmp_type == IcmpTypes::EchoRequest
    }
}

/// Transport carried by an IPv4 datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Tcp(TcpSegment),
    Icmp(IcmpMessage),
    /// Any other protocol, or a TCP/ICMP body too malformed to read
    Other {
        protocol: IpNextHeaderProtocol,
        payload: Vec<u8>,
    },
}

/// IPv4 header fields plus the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ipv4Datagram {
    pub source: Ipv4Addr,
    pub destination: Ipv4Addr,
    pub identification: u16,
    pub flags: u8,
    pub ttl: u8,
    pub dscp: u8,
    pub ecn: u8,
    pub transport: Transport,
}

impl Ipv4Datagram {
    pub fn new(source: Ipv4Addr, destination: Ipv4Addr, transport: Transport) -> Self {
        Self {
            source,
            destination,
            identification: 0,
            flags: pnet::packet::ipv4::Ipv4Flags::DontFragment,
            ttl: 64,
            dscp: 0,
            ecn: 0,
            transport,
        }
    }

    pub fn protocol(&self) -> IpNextHeaderProtocol {
        match &self.transport {
            Transport::Tcp(_) => IpNextHeaderProtocols::Tcp,
            Transport::Icmp(_) => IpNextHeaderProtocols::Icmp,
            Transport::Other { protocol, .. } => *protocol,
        }
    }

    fn transport_len(&self) -> usize {
        match &self.transport {
            Transport::Tcp(tcp) => TCP_HEADER_LEN + tcp.payload.len(),
            Transport::Icmp(icmp) => ICMP_HEADER_LEN + icmp.payload.len(),
            Transport::Other { payload, .. } => payload.len(),
        }
    }
}

/// Everything above the Ethernet header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layer {
    Arp(ArpMessage),
    Ipv4(Ipv4Datagram),
    /// Ethernet with no recognized upper layer
    Opaque(Vec<u8>),
}

/// A fully classified Ethernet frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub ethernet: EthernetHeader,
    pub layer: Layer,
}

impl Frame {
    /// Classify a raw buffer. Never fails.
    pub fn parse(buf: &[u8]) -> Frame {
        let eth = match EthernetPacket::new(buf) {
            Some(eth) => eth,
            None => {
                return Frame {
                    ethernet: EthernetHeader::new(MacAddr::zero(), MacAddr::zero(), EtherType(0)),
                    layer: Layer::Opaque(buf.to_vec()),
                }
            }
        };

        let ethernet = EthernetHeader {
            destination: eth.get_destination(),
            source: eth.get_source(),
            ethertype: eth.get_ethertype(),
        };
        let body = eth.payload();

        let layer = match ethernet.ethertype {
            EtherTypes::Arp => parse_arp(body).map(Layer::Arp),
            EtherTypes::Ipv4 => parse_ipv4(body).map(Layer::Ipv4),
            _ => None,
        }
        .unwrap_or_else(|| Layer::Opaque(body.to_vec()));

        Frame { ethernet, layer }
    }

    pub fn arp(&self) -> Option<&ArpMessage> {
        match &self.layer {
            Layer::Arp(arp) => Some(arp),
            _ => None,
        }
    }

    pub fn ipv4(&self) -> Option<&Ipv4Datagram> {
        match &self.layer {
            Layer::Ipv4(ip) => Some(ip),
            _ => None,
        }
    }

    pub fn ipv4_mut(&mut self) -> Option<&mut Ipv4Datagram> {
        match &mut self.layer {
            Layer::Ipv4(ip) => Some(ip),
            _ => None,
        }
    }

    pub fn tcp(&self) -> Option<&TcpSegment> {
        match self.ipv4().map(|ip| &ip.transport) {
            Some(Transport::Tcp(tcp)) => Some(tcp),
            _ => None,
        }
    }

    pub fn tcp_mut(&mut self) -> Option<&mut TcpSegment> {
        match self.ipv4_mut().map(|ip| &mut ip.transport) {
            Some(Transport::Tcp(tcp)) => Some(tcp),
            _ => None,
        }
    }

    pub fn icmp(&self) -> Option<&IcmpMessage> {
        match self.ipv4().map(|ip| &ip.transport) {
            Some(Transport::Icmp(icmp)) => Some(icmp),
            _ => None,
        }
    }

    pub fn is_opaque(&self) -> bool {
        matches!(self.layer, Layer::Opaque(_))
    }

    /// Length of the encoded frame
    pub fn wire_len(&self) -> usize {
        ETHERNET_HEADER_LEN
            + match &self.layer {
                Layer::Arp(_) => ARP_LEN,
                Layer::Ipv4(ip) => IPV4_HEADER_LEN + ip.transport_len(),
                Layer::Opaque(body) => body.len(),
            }
    }

    /// Serialize, recomputing every checksum
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        let mut buf = vec![0u8; self.wire_len()];

        {
            let mut eth = MutableEthernetPacket::new(&mut buf[..])
                .ok_or_else(|| encode_error("ethernet header"))?;
            eth.set_destination(self.ethernet.destination);
            eth.set_source(self.ethernet.source);
            eth.set_ethertype(self.ethernet.ethertype);
        }

        let body = &mut buf[ETHERNET_HEADER_LEN..];
        match &self.layer {
            Layer::Arp(arp) => write_arp(body, arp)?,
            Layer::Ipv4(ip) => write_ipv4(body, ip)?,
            Layer::Opaque(bytes) => body.copy_from_slice(bytes),
        }

        Ok(buf)
    }
}

fn encode_error(what: &str) -> HuntError {
    HuntError::EncodeError(format!("buffer too small for {}", what))
}

fn parse_arp(body: &[u8]) -> Option<ArpMessage> {
    let arp = ArpPacket::new(body)?;
    if arp.get_protocol_type() != EtherTypes::Ipv4
        || arp.get_hw_addr_len() != 6
        || arp.get_proto_addr_len() != 4
    {
        return None;
    }

    Some(ArpMessage {
        operation: arp.get_operation(),
        sender_hw: arp.get_sender_hw_addr(),
        sender_ip: arp.get_sender_proto_addr(),
        target_hw: arp.get_target_hw_addr(),
        target_ip: arp.get_target_proto_addr(),
    })
}

fn parse_ipv4(body: &[u8]) -> Option<Ipv4Datagram> {
    let ip = Ipv4Packet::new(body)?;
    if ip.get_version() != 4 {
        return None;
    }

    let header_len = ip.get_header_length() as usize * 4;
    let total_len = (ip.get_total_length() as usize).min(body.len());
    if header_len < IPV4_HEADER_LEN || total_len < header_len {
        return None;
    }

    // Slice by total length so Ethernet padding never leaks into payloads
    let payload = &body[header_len..total_len];
    let protocol = ip.get_next_level_protocol();
    let transport = match protocol {
        IpNextHeaderProtocols::Tcp => parse_tcp(payload).map(Transport::Tcp),
        IpNextHeaderProtocols::Icmp => parse_icmp(payload).map(Transport::Icmp),
        _ => None,
    }
    .unwrap_or_else(|| Transport::Other {
        protocol,
        payload: payload.to_vec(),
    });

    Some(Ipv4Datagram {
        source: ip.get_source(),
        destination: ip.get_destination(),
        identification: ip.get_identification(),
        flags: ip.get_flags(),
        ttl: ip.get_ttl(),
        dscp: ip.get_dscp(),
        ecn: ip.get_ecn(),
        transport,
    })
}

fn parse_tcp(segment: &[u8]) -> Option<TcpSegment> {
    let tcp = TcpPacket::new(segment)?;
    let data_offset = tcp.get_data_offset() as usize * 4;
    if data_offset < TCP_HEADER_LEN || data_offset > segment.len() {
        return None;
    }

    Some(TcpSegment {
        source_port: tcp.get_source(),
        destination_port: tcp.get_destination(),
        sequence: tcp.get_sequence(),
        acknowledgement: tcp.get_acknowledgement(),
        flags: tcp.get_flags(),
        window: tcp.get_window(),
        urgent_ptr: tcp.get_urgent_ptr(),
        payload: segment[data_offset..].to_vec(),
    })
}

fn parse_icmp(message: &[u8]) -> Option<IcmpMessage> {
    if message.len() < ICMP_HEADER_LEN {
        return None;
    }
    let icmp = IcmpPacket::new(message)?;

    Some(IcmpMessage {
        icmp_type: icmp.get_icmp_type(),
        code: icmp.get_icmp_code(),
        identifier: u16::from_be_bytes([message[4], message[5]]),
        sequence: u16::from_be_bytes([message[6], message[7]]),
        payload: message[ICMP_HEADER_LEN..].to_vec(),
    })
}

fn write_arp(body: &mut [u8], arp: &ArpMessage) -> crate::Result<()> {
    let mut packet = MutableArpPacket::new(body).ok_or_else(|| encode_error("ARP"))?;
    packet.set_hardware_type(ArpHardwareTypes::Ethernet);
    packet.set_protocol_type(EtherTypes::Ipv4);
    packet.set_hw_addr_len(6);
    packet.set_proto_addr_len(4);
    packet.set_operation(arp.operation);
    packet.set_sender_hw_addr(arp.sender_hw);
    packet.set_sender_proto_addr(arp.sender_ip);
    packet.set_target_hw_addr(arp.target_hw);
    packet.set_target_proto_addr(arp.target_ip);
    Ok(())
}

fn write_ipv4(body: &mut [u8], ip: &Ipv4Datagram) -> crate::Result<()> {
    let total_len = body.len();
    if total_len < IPV4_HEADER_LEN {
        return Err(encode_error("IPv4 header"));
    }

    let transport = &mut body[IPV4_HEADER_LEN..];
    match &ip.transport {
        Transport::Tcp(tcp) => write_tcp(transport, tcp, ip.source, ip.destination)?,
        Transport::Icmp(icmp) => write_icmp(transport, icmp)?,
        Transport::Other { payload, .. } => transport.copy_from_slice(payload),
    }

    let mut packet = MutableIpv4Packet::new(body).ok_or_else(|| encode_error("IPv4 header"))?;
    packet.set_version(4);
    packet.set_header_length(5);
    packet.set_dscp(ip.dscp);
    packet.set_ecn(ip.ecn);
    packet.set_total_length(total_len as u16);
    packet.set_identification(ip.identification);
    packet.set_flags(ip.flags);
    packet.set_fragment_offset(0);
    packet.set_ttl(ip.ttl);
    packet.set_next_level_protocol(ip.protocol());
    packet.set_source(ip.source);
    packet.set_destination(ip.destination);
    packet.set_checksum(0);
    let checksum = pnet::packet::ipv4::checksum(&packet.to_immutable());
    packet.set_checksum(checksum);
    Ok(())
}

fn write_tcp(buf: &mut [u8], tcp: &TcpSegment, source: Ipv4Addr, destination: Ipv4Addr) -> crate::Result<()> {
    if buf.len() < TCP_HEADER_LEN {
        return Err(encode_error("TCP header"));
    }
    buf[TCP_HEADER_LEN..].copy_from_slice(&tcp.payload);

    let mut packet = MutableTcpPacket::new(buf).ok_or_else(|| encode_error("TCP header"))?;
    packet.set_source(tcp.source_port);
    packet.set_destination(tcp.destination_port);
    packet.set_sequence(tcp.sequence);
    packet.set_acknowledgement(tcp.acknowledgement);
    packet.set_data_offset(5);
    packet.set_flags(tcp.flags);
    packet.set_window(tcp.window);
    packet.set_urgent_ptr(tcp.urgent_ptr);
    packet.set_checksum(0);
    let checksum = pnet::packet::tcp::ipv4_checksum(&packet.to_immutable(), &source, &destination);
    packet.set_checksum(checksum);
    Ok(())
}

fn write_icmp(buf: &mut [u8], icmp: &IcmpMessage) -> crate::Result<()> {
    if buf.len() < ICMP_HEADER_LEN {
        return Err(encode_error("ICMP header"));
    }
    buf[4..6].copy_from_slice(&icmp.identifier.to_be_bytes());
    buf[6..8].copy_from_slice(&icmp.sequence.to_be_bytes());
    buf[ICMP_HEADER_LEN..].copy_from_slice(&icmp.payload);

    let mut packet = MutableIcmpPacket::new(buf).ok_or_else(|| encode_error("ICMP header"))?;
    packet.set_icmp_type(icmp.icmp_type);
    packet.set_icmp_code(icmp.code);
    packet.set_checksum(0);
    let checksum = pnet::packet::icmp::checksum(&packet.to_immutable());
    packet.set_checksum(checksum);
    Ok(())
}

/// Recompute the checksums of an encoded frame independently of the codec
/// and report whether the shipped values match.
pub fn checksums_valid(buf: &[u8]) -> bool {
    let eth = match EthernetPacket::new(buf) {
        Some(eth) if eth.get_ethertype() == EtherTypes::Ipv4 => eth,
        Some(_) => return true,
        None => return false,
    };
    let body = eth.payload();
    let ip = match Ipv4Packet::new(body) {
        Some(ip) => ip,
        None => return false,
    };

    let header_len = ip.get_header_length() as usize * 4;
    let total_len = ip.get_total_length() as usize;
    if header_len < IPV4_HEADER_LEN || total_len < header_len || total_len > body.len() {
        return false;
    }
    if internet_checksum(&body[..header_len]) != 0 {
        return false;
    }

    let segment = &body[header_len..total_len];
    match ip.get_next_level_protocol() {
        IpNextHeaderProtocols::Tcp => {
            let mut pseudo = Vec::with_capacity(12 + segment.len());
            pseudo.extend_from_slice(&ip.get_source().octets());
            pseudo.extend_from_slice(&ip.get_destination().octets());
            pseudo.push(0);
            pseudo.push(IpNextHeaderProtocols::Tcp.0);
            pseudo.extend_from_slice(&(segment.len() as u16).to_be_bytes());
            pseudo.extend_from_slice(segment);
            internet_checksum(&pseudo) == 0
        }
        IpNextHeaderProtocols::Icmp => internet_checksum(segment) == 0,
        _ => true,
    }
}

/// One's complement sum; zero when the embedded checksum is correct
fn internet_checksum(data: &[u8]) -> u16 {
    let mut sum = 0u32;
    for chunk in data.chunks(2) {
        if chunk.len() == 2 {
            sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        } else {
            sum += (chunk[0] as u32) << 8;
        }
    }
    while (sum >> 16) != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}
