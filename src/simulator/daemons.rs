//! Background traffic
//!
//! Two timer driven generators make the puzzles solvable by sniffing:
//! the knock daemon replays the knock sequence from the automated source
//! once the switch floods, and the gateway daemon replays a cleartext FTP
//! login towards the internal server once the hidden port is open.

use crate::network::frame::Frame;
use crate::network::packet::TcpFrameBuilder;
use crate::network::replies::{self, SYN_ACK_SEQUENCE};
use crate::network::MacAddr;
use crate::simulator::hosts::FTP_PORT;
use crate::simulator::session::ftp;
use crate::simulator::{DaemonKind, DaemonLauncher, Simulator};
use rand::Rng;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

/// Source port of the first knock; later knocks add the index of their port
pub const KNOCK_SOURCE_PORT: u16 = 39367;

/// Window advertised by the scripted knocks
pub const KNOCK_WINDOW: u16 = 2048;

/// Spawns each daemon on the tokio runtime, at most once per kind
pub struct TokioLauncher {
    handle: Handle,
    knock_started: AtomicBool,
    gateway_started: AtomicBool,
}

impl TokioLauncher {
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            knock_started: AtomicBool::new(false),
            gateway_started: AtomicBool::new(false),
        }
    }

    fn flag(&self, kind: DaemonKind) -> &AtomicBool {
        match kind {
            DaemonKind::Knock => &self.knock_started,
            DaemonKind::Gateway => &self.gateway_started,
        }
    }

    pub fn is_started(&self, kind: DaemonKind) -> bool {
        self.flag(kind).load(Ordering::SeqCst)
    }
}

impl DaemonLauncher for TokioLauncher {
    fn launch(&self, kind: DaemonKind, simulator: Arc<Simulator>) {
        if self.flag(kind).swap(true, Ordering::SeqCst) {
            log::debug!("{:?} daemon already running", kind);
            return;
        }

        log::info!("Starting {:?} daemon", kind);
        match kind {
            DaemonKind::Knock => self.handle.spawn(knock_daemon(simulator)),
            DaemonKind::Gateway => self.handle.spawn(gateway_daemon(simulator)),
        };
    }
}

/// Replay the knock sequence until the player completes it
pub async fn knock_daemon(simulator: Arc<Simulator>) {
    let interval = simulator.daemon_config().knock_interval();

    while !simulator.knock_complete() {
        let frames = knock_round(&simulator);
        for frame in &frames {
            simulator.send(frame);
        }

        // The target sees the last knock too, as it would on a real wire
        if let Some(last) = frames.last() {
            match last.to_bytes() {
                Ok(bytes) => {
                    simulator.dispatch(&bytes);
                }
                Err(e) => log::warn!("Failed to loop back knock: {}", e),
            }
        }

        tokio::time::sleep(interval).await;
    }

    log::info!("Knock daemon finished");
}

/// One round of knocks from the automated source to the knock target
pub fn knock_round(simulator: &Simulator) -> Vec<Frame> {
    let topology = simulator.topology();
    let (source, target) = match (
        simulator.hosts().get(topology.automated_source),
        simulator.hosts().get(topology.knock_target),
    ) {
        (Some(source), Some(target)) => (source, target),
        _ => return Vec::new(),
    };
    let sequence = simulator.with_state(|state| state.knock.sequence().to_vec());

    sequence
        .iter()
        .map(|port| {
            let index = sequence.iter().position(|p| p == port).unwrap_or(0) as u16;
            TcpFrameBuilder::new(
                (source.mac, source.address),
                (target.mac, target.address),
                KNOCK_SOURCE_PORT.wrapping_add(index),
                *port,
            )
            .syn()
            .window_size(KNOCK_WINDOW)
            .seq_num(0)
            .build()
        })
        .collect()
}

/// Replay a sniffable FTP login at randomized intervals
pub async fn gateway_daemon(simulator: Arc<Simulator>) {
    let (min, max) = simulator.daemon_config().gateway_interval_bounds();

    loop {
        tokio::time::sleep(jitter(min, max)).await;

        let frames = ftp_login_conversation(&simulator);
        if frames.is_empty() {
            log::warn!("No gateway route to an FTP server, gateway daemon stopping");
            return;
        }
        let written = frames.iter().filter(|frame| simulator.send(frame)).count();
        log::debug!("Gateway daemon replayed FTP login ({} of {} frames)", written, frames.len());
    }
}

fn jitter(min: Duration, max: Duration) -> Duration {
    let (min, max) = (min.as_millis() as u64, max.as_millis() as u64);
    Duration::from_millis(rand::thread_rng().gen_range(min..=max))
}

/// A scripted FTP login between the knock target and the internal FTP
/// server, as seen on the visible side of the gateway.
pub fn ftp_login_conversation(simulator: &Simulator) -> Vec<Frame> {
    let topology = simulator.topology();
    let hosts = simulator.hosts();
    let (client, gateway, server) = match (
        hosts.get(topology.knock_target),
        topology.gateway.and_then(|ip| hosts.get(ip)),
        topology.ftp_server,
    ) {
        (Some(client), Some(gateway), Some(server)) => (client, gateway, server),
        _ => return Vec::new(),
    };

    let profile = simulator.ftp_profile();
    let mut rng = rand::thread_rng();
    let mut talk = Conversation {
        client: (client.mac, client.address),
        server: (gateway.mac, server),
        client_port: rng.gen_range(32768..61000),
        client_seq: rng.gen(),
        server_seq: SYN_ACK_SEQUENCE,
        frames: Vec::new(),
    };

    talk.handshake();
    talk.server_says(ftp::BANNER);
    talk.client_says(&format!("USER {}\r\n", profile.username));
    talk.server_says(ftp::NEED_PASSWORD);
    talk.client_says(&format!("PASS {}\r\n", profile.password));
    talk.server_says(ftp::LOGGED_IN);
    talk.teardown();
    talk.frames
}

struct Conversation {
    client: (MacAddr, Ipv4Addr),
    server: (MacAddr, Ipv4Addr),
    client_port: u16,
    client_seq: u32,
    server_seq: u32,
    frames: Vec<Frame>,
}

impl Conversation {
    fn from_client(&self) -> TcpFrameBuilder {
        TcpFrameBuilder::new(self.client, self.server, self.client_port, FTP_PORT)
            .seq_num(self.client_seq)
            .ack_num(self.server_seq)
    }

    fn from_server(&self) -> TcpFrameBuilder {
        TcpFrameBuilder::new(self.server, self.client, FTP_PORT, self.client_port)
            .seq_num(self.server_seq)
            .ack_num(self.client_seq)
    }

    fn handshake(&mut self) {
        let syn = self.from_client().ack_num(0).syn().build();
        self.frames.push(syn);
        self.client_seq = self.client_seq.wrapping_add(1);

        let syn_ack = self.from_server().syn().ack().build();
        self.frames.push(syn_ack);
        self.server_seq = self.server_seq.wrapping_add(1);

        let ack = self.from_client().ack().build();
        self.frames.push(ack);
    }

    fn client_says(&mut self, line: &str) {
        let frame = self.from_client().ack().payload(line).build();
        self.frames.push(frame);
        self.client_seq = self.client_seq.wrapping_add(line.len() as u32);
    }

    fn server_says(&mut self, line: &str) {
        let frame = self.from_server().ack().payload(line).build();
        self.frames.push(frame);
        self.server_seq = self.server_seq.wrapping_add(line.len() as u32);
    }

    fn teardown(&mut self) {
        let fin = self.from_client().fin().ack().build();
        let reply = replies::tcp_fin_ack(&fin);
        self.frames.push(fin);
        self.client_seq = self.client_seq.wrapping_add(1);

        if let Some(reply) = reply {
            self.frames.push(reply);
            self.server_seq = self.server_seq.wrapping_add(1);
        }
        let last = self.from_client().ack().build();
        self.frames.push(last);
    }
}
