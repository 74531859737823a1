//! Simulator core: puzzle state, dispatch and the seams to the outside
//!
//! All mutable puzzle state lives in one [`PuzzleState`] behind a single
//! mutex owned by the [`Simulator`]. A dispatch takes the lock for the
//! state step only; reply frames are written and daemons are launched
//! after it is released.

pub mod daemons;
pub mod hosts;
pub mod puzzle;
pub mod registry;
pub mod session;

use crate::config::{DaemonConfig, SimConfig};
use crate::network::frame::{Frame, Layer, Transport};
use crate::network::tcp_flags;
use hosts::{HandlerContext, Handled, HostTable, Network, Topology};
use puzzle::{CamTable, KnockState};
use registry::{NetworkRegistry, OpenPortTable};
use session::{FtpProfile, FtpSession, SmtpSession};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex, MutexGuard};

/// Where raw frames leave the simulator
pub trait FrameSink: Send + Sync {
    fn write_frame(&self, frame: &[u8]) -> crate::Result<()>;
}

/// Background traffic generators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DaemonKind {
    /// Replays the knock sequence from the automated source
    Knock,
    /// Replays a cleartext FTP login towards the internal server
    Gateway,
}

/// Starts daemons on request of the dispatcher
pub trait DaemonLauncher: Send + Sync {
    fn launch(&self, kind: DaemonKind, simulator: Arc<Simulator>);
}

/// One-shot transitions of the puzzle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PuzzleEvent {
    /// The CAM table overflowed; knock traffic becomes sniffable
    HubModeEntered,
    /// The player completed the knock; the hidden port is open
    KnockCompleted,
}

impl PuzzleEvent {
    pub fn daemon(&self) -> DaemonKind {
        match self {
            PuzzleEvent::HubModeEntered => DaemonKind::Knock,
            PuzzleEvent::KnockCompleted => DaemonKind::Gateway,
        }
    }
}

/// Every piece of state the puzzles mutate
#[derive(Debug, Clone)]
pub struct PuzzleState {
    pub registry: NetworkRegistry,
    pub open_ports: OpenPortTable,
    pub cam: CamTable,
    pub knock: KnockState,
    /// SMTP sessions on the knock target, by client address
    pub smtp: HashMap<Ipv4Addr, SmtpSession>,
    /// FTP sessions on the internal server, by client address
    pub ftp: HashMap<Ipv4Addr, FtpSession>,
}

impl PuzzleState {
    pub fn new(network: &Network, config: &SimConfig) -> Self {
        Self {
            registry: network.registry.clone(),
            open_ports: network.open_ports.clone(),
            cam: CamTable::new(config.puzzle.cam_capacity),
            knock: KnockState::new(config.puzzle.knock_sequence.clone(), config.puzzle.automated_source),
            smtp: HashMap::new(),
            ftp: HashMap::new(),
        }
    }
}

/// How the dispatcher classified a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Handed to the simulated host at this address
    Host(Ipv4Addr),
    /// Counted against the CAM table
    Cam,
    /// Nobody is interested
    Dropped,
}

/// Outcome of one dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReport {
    pub route: Route,
    /// Reply frames the handler produced
    pub replies: usize,
    /// Reply frames that reached the sink
    pub written: usize,
    pub events: Vec<PuzzleEvent>,
}

/// The simulated network
pub struct Simulator {
    hosts: HostTable,
    topology: Topology,
    ftp: FtpProfile,
    daemons: DaemonConfig,
    state: Mutex<PuzzleState>,
    sink: Arc<dyn FrameSink>,
    launcher: Arc<dyn DaemonLauncher>,
}

impl Simulator {
    /// Build the simulator from a configuration. Fails if the configuration
    /// does not describe a consistent network.
    pub fn new(
        config: &SimConfig,
        sink: Arc<dyn FrameSink>,
        launcher: Arc<dyn DaemonLauncher>,
    ) -> crate::Result<Self> {
        let network = Network::from_config(config)?;
        let state = PuzzleState::new(&network, config);

        log::info!(
            "Simulating {} hosts, knock target {}, {} ports in the knock sequence",
            network.hosts.len(),
            network.topology.knock_target,
            config.puzzle.knock_sequence.len()
        );

        Ok(Self {
            hosts: network.hosts,
            topology: network.topology,
            ftp: config.ftp.clone(),
            daemons: config.daemons.clone(),
            state: Mutex::new(state),
            sink,
            launcher,
        })
    }

    /// Classify one raw frame, run at most one host handler, write its
    /// replies and launch any daemon the step unlocked.
    pub fn dispatch(self: &Arc<Self>, bytes: &[u8]) -> DispatchReport {
        let frame = Frame::parse(bytes);

        let (route, handled) = {
            let mut state = self.lock_state();
            self.step(&frame, &mut state)
        };

        let written = handled.replies.iter().filter(|reply| self.send(reply)).count();

        for event in &handled.events {
            log::info!("Puzzle event: {:?}", event);
            self.launcher.launch(event.daemon(), Arc::clone(self));
        }

        DispatchReport {
            route,
            replies: handled.replies.len(),
            written,
            events: handled.events,
        }
    }

    fn step(&self, frame: &Frame, state: &mut PuzzleState) -> (Route, Handled) {
        let destination = match &frame.layer {
            Layer::Arp(arp) => {
                if arp.is_reply() {
                    if let Some(previous) = state.registry.learn(arp.sender_ip, arp.sender_hw) {
                        if previous != arp.sender_hw {
                            log::info!("ARP: {} is-at {} (was {})", arp.sender_ip, arp.sender_hw, previous);
                        }
                    }
                }
                Some(arp.target_ip)
            }
            Layer::Ipv4(ip) => match &ip.transport {
                Transport::Icmp(icmp) if icmp.is_echo_request() => Some(ip.destination),
                Transport::Tcp(_) => Some(ip.destination),
                _ => None,
            },
            Layer::Opaque(_) => {
                let mut handled = Handled::default();
                if state.cam.record_frame() {
                    log::warn!(
                        "CAM table full after {} entries, switch is flooding like a hub",
                        state.cam.entries()
                    );
                    handled.events.push(PuzzleEvent::HubModeEntered);
                }
                return (Route::Cam, handled);
            }
        };

        let host = match destination.and_then(|ip| self.hosts.get(ip)) {
            Some(host) => host,
            None => return (Route::Dropped, Handled::default()),
        };

        if let Some(tcp) = frame.tcp() {
            log::trace!(
                "{}:{} -> {}:{} [{}]",
                frame.ipv4().map_or(Ipv4Addr::UNSPECIFIED, |ip| ip.source),
                tcp.source_port,
                host.address,
                tcp.destination_port,
                tcp_flags::describe(tcp.flags)
            );
        }

        let ctx = HandlerContext {
            topology: &self.topology,
            ftp: &self.ftp,
        };
        (Route::Host(host.address), host.handle(frame, state, &ctx))
    }

    /// Serialize and write one frame. Failures are logged and dropped.
    pub fn send(&self, frame: &Frame) -> bool {
        let result = frame.to_bytes().and_then(|bytes| self.sink.write_frame(&bytes));
        match result {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Failed to write frame: {}", e);
                false
            }
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PuzzleState> {
        // Every step leaves the state consistent, so a panic elsewhere
        // does not invalidate it.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run a closure against the current puzzle state
    pub fn with_state<R>(&self, f: impl FnOnce(&PuzzleState) -> R) -> R {
        f(&self.lock_state())
    }

    pub fn knock_complete(&self) -> bool {
        self.with_state(|state| state.knock.is_complete())
    }

    pub fn hosts(&self) -> &HostTable {
        &self.hosts
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn ftp_profile(&self) -> &FtpProfile {
        &self.ftp
    }

    pub fn daemon_config(&self) -> &DaemonConfig {
        &self.daemons
    }
}

impl std::fmt::Debug for Simulator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulator")
            .field("hosts", &self.hosts.len())
            .field("topology", &self.topology)
            .finish()
    }
}
