//! Synthetic TCP frame crafting for background traffic

use crate::network::frame::{EthernetHeader, Frame, Ipv4Datagram, Layer, TcpSegment, Transport};
use crate::network::tcp_flags;
use crate::network::MacAddr;
use pnet::packet::ethernet::EtherTypes;
use rand::Rng;
use std::net::Ipv4Addr;

/// TCP frame builder for crafting traffic between two simulated hosts
#[derive(Debug, Clone)]
pub struct TcpFrameBuilder {
    source_mac: MacAddr,
    dest_mac: MacAddr,
    source_ip: Ipv4Addr,
    dest_ip: Ipv4Addr,
    source_port: u16,
    dest_port: u16,
    flags: u8,
    seq_num: u32,
    ack_num: u32,
    window_size: u16,
    ip_id: u16,
    payload: Vec<u8>,
}

impl TcpFrameBuilder {
    pub fn new(
        source: (MacAddr, Ipv4Addr),
        dest: (MacAddr, Ipv4Addr),
        source_port: u16,
        dest_port: u16,
    ) -> Self {
        Self {
            source_mac: source.0,
            dest_mac: dest.0,
            source_ip: source.1,
            dest_ip: dest.1,
            source_port,
            dest_port,
            flags: 0,
            seq_num: 0,
            ack_num: 0,
            window_size: 65535,
            ip_id: rand::thread_rng().gen(),
            payload: Vec::new(),
        }
    }

    pub fn syn(mut self) -> Self {
        self.flags |= tcp_flags::SYN;
        self
    }

    pub fn ack(mut self) -> Self {
        self.flags |= tcp_flags::ACK;
        self
    }

    pub fn fin(mut self) -> Self {
        self.flags |= tcp_flags::FIN;
        self
    }

    pub fn seq_num(mut self, seq_num: u32) -> Self {
        self.seq_num = seq_num;
        self
    }

    pub fn ack_num(mut self, ack_num: u32) -> Self {
        self.ack_num = ack_num;
        self
    }

    pub fn window_size(mut self, window_size: u16) -> Self {
        self.window_size = window_size;
        self
    }

    /// Attach application data; PSH is set alongside
    pub fn payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self.flags |= tcp_flags::PSH;
        self
    }

    /// Build the Ethernet + IPv4 + TCP frame
    pub fn build(self) -> Frame {
        let mut datagram = Ipv4Datagram::new(
            self.source_ip,
            self.dest_ip,
            Transport::Tcp(TcpSegment {
                source_port: self.source_port,
                destination_port: self.dest_port,
                sequence: self.seq_num,
                acknowledgement: self.ack_num,
                flags: self.flags,
                window: self.window_size,
                urgent_ptr: 0,
                payload: self.payload,
            }),
        );
        datagram.identification = self.ip_id;

        Frame {
            ethernet: EthernetHeader::new(self.source_mac, self.dest_mac, EtherTypes::Ipv4),
            layer: Layer::Ipv4(datagram),
        }
    }
}
