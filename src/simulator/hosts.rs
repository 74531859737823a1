//! Static host table
//!
//! Every simulated address is bound to exactly one [`HostEntry`] at
//! startup. The table is immutable afterwards; only the state the hosts
//! refer to (open ports, sessions) changes.

use crate::config::SimConfig;
use crate::network::frame::{Frame, Layer, TcpSegment, Transport};
use crate::network::{derive_mac, parse_mac_prefix, replies, MacAddr, SegmentId};
use crate::simulator::puzzle::KnockProgress;
use crate::simulator::registry::{NetworkRegistry, OpenPortTable};
use crate::simulator::session::{FtpProfile, SegmentEvent, SessionReply};
use crate::simulator::{PuzzleEvent, PuzzleState};
use crate::HuntError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::Ipv4Addr;

/// Control port of the simulated FTP server
pub const FTP_PORT: u16 = 21;

/// Scripted behavior of a simulated host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostRole {
    /// Answers ARP, pings and SYNs from its open-port list
    Plain,
    /// Plain, plus the port-knock matcher and the hidden SMTP service
    KnockTarget,
    /// Plain; the next hop for the internal segment
    Gateway,
    /// FTP on port 21, reachable only from the authorized MACs
    FtpServer,
}

impl HostRole {
    pub fn name(&self) -> &'static str {
        match self {
            HostRole::Plain => "plain",
            HostRole::KnockTarget => "knock target",
            HostRole::Gateway => "gateway",
            HostRole::FtpServer => "FTP server",
        }
    }
}

impl std::fmt::Display for HostRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One simulated host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostEntry {
    pub address: Ipv4Addr,
    pub segment: SegmentId,
    pub role: HostRole,
    pub mac: MacAddr,
    pub icmp: bool,
}

/// Addresses the puzzles refer to by role
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    /// The player's interface address, target of every ARP reply
    pub own_address: Ipv4Addr,
    pub automated_source: Ipv4Addr,
    pub knock_target: Ipv4Addr,
    pub gateway: Option<Ipv4Addr>,
    pub ftp_server: Option<Ipv4Addr>,
    pub hidden_port: u16,
    /// Seeded MACs the FTP server accepts frames from
    pub authorized_macs: [MacAddr; 2],
}

/// Everything built from the static configuration
#[derive(Debug, Clone)]
pub struct Network {
    pub hosts: HostTable,
    pub topology: Topology,
    pub registry: NetworkRegistry,
    pub open_ports: OpenPortTable,
}

#[derive(Debug, Clone, Default)]
pub struct HostTable {
    hosts: HashMap<Ipv4Addr, HostEntry>,
}

impl HostTable {
    pub fn get(&self, ip: Ipv4Addr) -> Option<&HostEntry> {
        self.hosts.get(&ip)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HostEntry> {
        self.hosts.values()
    }

    fn insert(&mut self, entry: HostEntry) -> crate::Result<()> {
        if self.hosts.contains_key(&entry.address) {
            return Err(HuntError::ValidationError(format!(
                "{} has more than one host handler",
                entry.address
            )));
        }
        self.hosts.insert(entry.address, entry);
        Ok(())
    }
}

impl Network {
    /// Build the host table, registry and open-port table, checking that
    /// every configured address gets exactly one handler and exactly one
    /// registry entry.
    pub fn from_config(config: &SimConfig) -> crate::Result<Self> {
        config.validate()?;

        let mut hosts = HostTable::default();
        let mut registry = NetworkRegistry::new();
        let mut open_ports = OpenPortTable::new();

        for segment in &config.segments {
            let prefix = parse_mac_prefix(&segment.mac_prefix)?;
            for host in &segment.hosts {
                let mac = derive_mac(prefix, host.address);
                if !registry.insert(segment.id, host.address, mac) {
                    return Err(HuntError::ValidationError(format!(
                        "{} is registered in more than one segment",
                        host.address
                    )));
                }
                hosts.insert(HostEntry {
                    address: host.address,
                    segment: segment.id,
                    role: host.role,
                    mac,
                    icmp: host.icmp && host.role != HostRole::FtpServer,
                })?;
                open_ports.set(host.address, host.open_ports.clone());
            }
        }

        let single = |role: HostRole| hosts.iter().find(|h| h.role == role).map(|h| h.address);
        let knock_target = single(HostRole::KnockTarget)
            .ok_or_else(|| HuntError::ValidationError("no knock target configured".to_string()))?;
        let automated_source = config.puzzle.automated_source;

        let seeded_mac = |ip: Ipv4Addr| {
            registry
                .lookup(ip)
                .ok_or_else(|| HuntError::ValidationError(format!("{} has no registry entry", ip)))
        };
        let authorized_macs = [seeded_mac(automated_source)?, seeded_mac(knock_target)?];

        let topology = Topology {
            own_address: config.interface.address,
            automated_source,
            knock_target,
            gateway: single(HostRole::Gateway),
            ftp_server: single(HostRole::FtpServer),
            hidden_port: config.puzzle.hidden_port,
            authorized_macs,
        };

        for ip in open_ports.hosts() {
            if hosts.get(*ip).is_none() {
                return Err(HuntError::ValidationError(format!("open ports declared for unknown host {}", ip)));
            }
        }

        log::debug!("Built {} simulated hosts across {} segments", hosts.len(), config.segments.len());

        Ok(Self {
            hosts,
            topology,
            registry,
            open_ports,
        })
    }
}

/// Frames and puzzle events produced by one handler invocation
#[derive(Debug, Default)]
pub struct Handled {
    pub replies: Vec<Frame>,
    pub events: Vec<PuzzleEvent>,
}

impl Handled {
    fn reply(&mut self, frame: Option<Frame>) {
        self.replies.extend(frame);
    }
}

/// Read-only inputs every handler needs besides the mutable state
pub struct HandlerContext<'a> {
    pub topology: &'a Topology,
    pub ftp: &'a FtpProfile,
}

impl HostEntry {
    /// Run this host's behavior for one routed frame
    pub fn handle(&self, frame: &Frame, state: &mut PuzzleState, ctx: &HandlerContext<'_>) -> Handled {
        let mut out = Handled::default();

        if self.role == HostRole::FtpServer && !ctx.topology.authorized_macs.contains(&frame.ethernet.source) {
            log::debug!(
                "{} dropped frame from unauthorized MAC {}",
                self.address,
                frame.ethernet.source
            );
            return out;
        }

        match &frame.layer {
            Layer::Arp(arp) if arp.is_request() => {
                out.reply(replies::arp_is_at(frame, &state.registry, ctx.topology.own_address));
            }
            Layer::Ipv4(ip) => match &ip.transport {
                Transport::Icmp(icmp) if icmp.is_echo_request() && self.icmp => {
                    out.reply(replies::icmp_echo_reply(frame));
                }
                Transport::Tcp(tcp) => match self.role {
                    HostRole::Plain | HostRole::Gateway => self.plain_tcp(frame, tcp, state, &mut out),
                    HostRole::KnockTarget => self.knock_target_tcp(frame, ip.source, tcp, state, ctx, &mut out),
                    HostRole::FtpServer => self.ftp_server_tcp(frame, ip.source, tcp, state, ctx, &mut out),
                },
                _ => {}
            },
            _ => {}
        }

        out
    }

    fn plain_tcp(&self, frame: &Frame, tcp: &TcpSegment, state: &PuzzleState, out: &mut Handled) {
        if !tcp.is_syn() {
            return;
        }
        if state.open_ports.is_open(self.address, tcp.destination_port) {
            out.reply(replies::tcp_syn_ack(frame));
        } else {
            out.reply(replies::tcp_reset_ack(frame));
        }
    }

    fn knock_target_tcp(
        &self,
        frame: &Frame,
        client: Ipv4Addr,
        tcp: &TcpSegment,
        state: &mut PuzzleState,
        ctx: &HandlerContext<'_>,
        out: &mut Handled,
    ) {
        let port = tcp.destination_port;
        let hidden = ctx.topology.hidden_port;

        if tcp.is_syn() && !state.knock.is_complete() {
            match state.knock.feed(client, port) {
                KnockProgress::Advanced(step) => {
                    log::debug!("Knock from {} advanced to {}/{}", client, step, state.knock.sequence().len());
                }
                KnockProgress::Reset => log::debug!("Knock from {} reset on port {}", client, port),
                KnockProgress::Completed => {
                    log::info!("Knock sequence completed by {}, opening port {}", client, hidden);
                    state.open_ports.append(self.address, hidden);
                    out.events.push(PuzzleEvent::KnockCompleted);
                }
                KnockProgress::Ignored => {}
            }
        }

        if port != hidden {
            self.plain_tcp(frame, tcp, state, out);
            return;
        }

        // Filtered until the knock appends it
        if !state.open_ports.is_open(self.address, hidden) {
            return;
        }

        let event = SegmentEvent::classify(tcp);
        let session = state.smtp.remove(&client).unwrap_or_default();
        let (session, reply) = session.step(&event);
        if session.is_alive() || event == SegmentEvent::Syn {
            state.smtp.insert(client, session);
        }
        emit(frame, reply, out);
    }

    fn ftp_server_tcp(
        &self,
        frame: &Frame,
        client: Ipv4Addr,
        tcp: &TcpSegment,
        state: &mut PuzzleState,
        ctx: &HandlerContext<'_>,
        out: &mut Handled,
    ) {
        if tcp.destination_port != FTP_PORT {
            if tcp.is_syn() {
                out.reply(replies::tcp_reset_ack(frame));
            }
            return;
        }

        let event = SegmentEvent::classify(tcp);
        let session = state.ftp.remove(&client).unwrap_or_default();
        let (session, reply) = session.step(&event, ctx.ftp);
        if session.pass_entered() && matches!(reply, Some(SessionReply::Transfer { .. })) {
            log::info!("{} retrieved {} from {}", client, ctx.ftp.secret_file, self.address);
        }
        if session.is_alive() || event == SegmentEvent::Syn {
            state.ftp.insert(client, session);
        }
        emit(frame, reply, out);
    }
}

/// Turn a session reply into frames answering `frame`
fn emit(frame: &Frame, reply: Option<SessionReply>, out: &mut Handled) {
    match reply {
        Some(SessionReply::SynAck) => out.reply(replies::tcp_syn_ack(frame)),
        Some(SessionReply::Ack) => out.reply(replies::tcp_ack(frame)),
        Some(SessionReply::Text(text)) => out.reply(replies::tcp_data(frame, text.as_bytes(), 0)),
        Some(SessionReply::Transfer { notice, body }) => {
            out.reply(replies::tcp_data(frame, notice.as_bytes(), 0));
            out.reply(replies::tcp_data(frame, body.as_bytes(), notice.len() as u32));
        }
        None => {}
    }
}
