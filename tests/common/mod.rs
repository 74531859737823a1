//! Shared harness for the integration tests: a capturing sink, a
//! recording launcher and frame builders for the player's side.

#![allow(dead_code)]

use packethunt::network::frame::{
    checksums_valid, ArpMessage, EthernetHeader, Frame, IcmpMessage, Ipv4Datagram, Layer, Transport,
};
use packethunt::network::packet::TcpFrameBuilder;
use packethunt::network::MacAddr;
use packethunt::{DaemonKind, DaemonLauncher, FrameSink, SimConfig, Simulator};
use pnet::packet::arp::ArpOperations;
use pnet::packet::ethernet::{EtherType, EtherTypes};
use pnet::packet::icmp::{IcmpCode, IcmpTypes};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};

pub const PLAYER_IP: Ipv4Addr = Ipv4Addr::new(10, 5, 0, 1);
pub const PLAYER_MAC: MacAddr = MacAddr(0x12, 0x67, 0x7e, 0xb7, 0x6d, 0xc8);

#[derive(Default)]
pub struct CaptureSink {
    frames: Mutex<Vec<Vec<u8>>>,
}

impl FrameSink for CaptureSink {
    fn write_frame(&self, frame: &[u8]) -> packethunt::Result<()> {
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(())
    }
}

impl CaptureSink {
    pub fn take_raw(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *self.frames.lock().unwrap())
    }
}

#[derive(Default)]
pub struct RecordingLauncher {
    pub launched: Mutex<Vec<DaemonKind>>,
}

impl DaemonLauncher for RecordingLauncher {
    fn launch(&self, kind: DaemonKind, _simulator: Arc<Simulator>) {
        self.launched.lock().unwrap().push(kind);
    }
}

impl RecordingLauncher {
    pub fn launched(&self) -> Vec<DaemonKind> {
        self.launched.lock().unwrap().clone()
    }
}

pub struct Harness {
    pub sim: Arc<Simulator>,
    pub sink: Arc<CaptureSink>,
    pub launcher: Arc<RecordingLauncher>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Self {
        let sink = Arc::new(CaptureSink::default());
        let launcher = Arc::new(RecordingLauncher::default());
        let sim = Arc::new(Simulator::new(&config, sink.clone(), launcher.clone()).unwrap());
        Self { sim, sink, launcher }
    }

    /// Dispatch a frame and return the parsed replies it produced
    pub fn send(&self, frame: &Frame) -> Vec<Frame> {
        self.sim.dispatch(&frame.to_bytes().unwrap());
        self.replies()
    }

    /// Parse everything written since the last call. Every written frame
    /// must carry valid checksums.
    pub fn replies(&self) -> Vec<Frame> {
        self.sink
            .take_raw()
            .iter()
            .map(|raw| {
                assert!(checksums_valid(raw), "bad checksum in {:02x?}", raw);
                Frame::parse(raw)
            })
            .collect()
    }

    pub fn mac_of(&self, ip: Ipv4Addr) -> MacAddr {
        self.sim.hosts().get(ip).map(|h| h.mac).unwrap_or(MacAddr::broadcast())
    }

    /// TCP frame from the player to `dst`
    pub fn tcp(&self, dst: Ipv4Addr, dport: u16) -> TcpFrameBuilder {
        TcpFrameBuilder::new((PLAYER_MAC, PLAYER_IP), (self.mac_of(dst), dst), 40000, dport)
    }

    pub fn syn(&self, dst: Ipv4Addr, dport: u16) -> Frame {
        self.tcp(dst, dport).syn().seq_num(1000).build()
    }
}

pub fn arp(operation: pnet::packet::arp::ArpOperation, sender: (MacAddr, Ipv4Addr), target_ip: Ipv4Addr) -> Frame {
    Frame {
        ethernet: EthernetHeader::new(sender.0, MacAddr::broadcast(), EtherTypes::Arp),
        layer: Layer::Arp(ArpMessage {
            operation,
            sender_hw: sender.0,
            sender_ip: sender.1,
            target_hw: MacAddr::zero(),
            target_ip,
        }),
    }
}

pub fn who_has(target_ip: Ipv4Addr) -> Frame {
    arp(ArpOperations::Request, (PLAYER_MAC, PLAYER_IP), target_ip)
}

pub fn is_at(claimed_ip: Ipv4Addr, mac: MacAddr, target_ip: Ipv4Addr) -> Frame {
    arp(ArpOperations::Reply, (mac, claimed_ip), target_ip)
}

pub fn ping(dst: Ipv4Addr, dst_mac: MacAddr) -> Frame {
    Frame {
        ethernet: EthernetHeader::new(PLAYER_MAC, dst_mac, EtherTypes::Ipv4),
        layer: Layer::Ipv4(Ipv4Datagram::new(
            PLAYER_IP,
            dst,
            Transport::Icmp(IcmpMessage {
                icmp_type: IcmpTypes::EchoRequest,
                code: IcmpCode(0),
                identifier: 0x4242,
                sequence: 3,
                payload: b"abcdefgh".to_vec(),
            }),
        )),
    }
}

/// A frame with a random source MAC and no known upper layer, the kind a
/// MAC flooder emits
pub fn flood_frame(n: u32) -> Frame {
    let b = n.to_be_bytes();
    Frame {
        ethernet: EthernetHeader::new(
            MacAddr::new(0x02, b[0], b[1], b[2], b[3], 0x01),
            MacAddr::broadcast(),
            EtherType(0x88b5),
        ),
        layer: Layer::Opaque(vec![0u8; 46]),
    }
}

pub fn payload_text(frame: &Frame) -> String {
    String::from_utf8_lossy(&frame.tcp().unwrap().payload).into_owned()
}
