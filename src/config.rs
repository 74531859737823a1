//! Configuration module for the packethunt simulator

use crate::network::{parse_mac_prefix, MacAddr, SegmentId};
use crate::simulator::hosts::HostRole;
use crate::simulator::puzzle::{DEFAULT_CAM_CAPACITY, DEFAULT_KNOCK_SEQUENCE};
use crate::simulator::session::FtpProfile;
use crate::HuntError;
use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::Ipv4Addr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Main configuration structure for a simulation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    /// TAP interface the simulator attaches to
    pub interface: InterfaceConfig,

    /// Simulated LAN segments and their hosts
    pub segments: Vec<SegmentConfig>,

    /// Puzzle tuning
    #[serde(default)]
    pub puzzle: PuzzleConfig,

    /// Background traffic timing
    #[serde(default)]
    pub daemons: DaemonConfig,

    /// FTP server credentials and prize
    #[serde(default)]
    pub ftp: FtpProfile,
}

/// The player's side of the wire
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Device name, e.g. `tap0`
    pub name: String,

    /// Address assigned to the interface; also the fixed target address of
    /// every ARP reply
    pub address: Ipv4Addr,

    /// MAC assigned to the interface
    pub mac: String,

    /// Uid allowed to use the device without root
    pub owner: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentConfig {
    pub id: SegmentId,
    pub network: Ipv4Network,
    /// First five MAC octets shared by every host in the segment
    pub mac_prefix: String,
    pub hosts: Vec<HostConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub address: Ipv4Addr,
    pub role: HostRole,
    #[serde(default)]
    pub open_ports: Vec<u16>,
    /// Answer ICMP echo requests
    #[serde(default = "default_icmp")]
    pub icmp: bool,
}

fn default_icmp() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PuzzleConfig {
    /// Host whose scripted knocks must not count as the player's
    pub automated_source: Ipv4Addr,
    pub knock_sequence: Vec<u16>,
    /// Filtered on the knock target until the knock succeeds
    pub hidden_port: u16,
    pub cam_capacity: usize,
}

impl Default for PuzzleConfig {
    fn default() -> Self {
        Self {
            automated_source: Ipv4Addr::new(10, 5, 0, 4),
            knock_sequence: DEFAULT_KNOCK_SEQUENCE.to_vec(),
            hidden_port: 25,
            cam_capacity: DEFAULT_CAM_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Pause between two rounds of scripted knocking
    pub knock_interval_ms: u64,
    /// Bounds of the randomized pause between two sniffable FTP logins
    pub gateway_min_interval_ms: u64,
    pub gateway_max_interval_ms: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            knock_interval_ms: 10_000,
            gateway_min_interval_ms: 5_000,
            gateway_max_interval_ms: 15_000,
        }
    }
}

impl DaemonConfig {
    pub fn knock_interval(&self) -> Duration {
        Duration::from_millis(self.knock_interval_ms)
    }

    pub fn gateway_interval_bounds(&self) -> (Duration, Duration) {
        (
            Duration::from_millis(self.gateway_min_interval_ms),
            Duration::from_millis(self.gateway_max_interval_ms),
        )
    }
}

impl Default for SimConfig {
    fn default() -> Self {
        let visible = |last: u8, role: HostRole, open_ports: Vec<u16>| HostConfig {
            address: Ipv4Addr::new(10, 5, 0, last),
            role,
            open_ports,
            icmp: true,
        };
        let internal = |last: u8, role: HostRole, open_ports: Vec<u16>, icmp: bool| HostConfig {
            address: Ipv4Addr::new(10, 5, 1, last),
            role,
            open_ports,
            icmp,
        };

        Self {
            interface: InterfaceConfig {
                name: "tap0".to_string(),
                address: Ipv4Addr::new(10, 5, 0, 1),
                mac: "12:67:7e:b7:6d:c8".to_string(),
                owner: None,
            },
            segments: vec![
                SegmentConfig {
                    id: SegmentId::Visible,
                    network: Ipv4Network::new(Ipv4Addr::new(10, 5, 0, 0), 24).expect("static /24 network"),
                    mac_prefix: "12:67:7e:b7:6d".to_string(),
                    hosts: vec![
                        visible(4, HostRole::Plain, vec![20, 21, 22, 80, 443]),
                        visible(6, HostRole::KnockTarget, vec![80, 22]),
                        visible(35, HostRole::Plain, vec![20, 21, 22, 25, 80, 443, 8080]),
                        visible(254, HostRole::Gateway, vec![22, 80]),
                    ],
                },
                SegmentConfig {
                    id: SegmentId::Internal,
                    network: Ipv4Network::new(Ipv4Addr::new(10, 5, 1, 0), 24).expect("static /24 network"),
                    mac_prefix: "12:67:7e:b7:6e".to_string(),
                    hosts: vec![
                        internal(2, HostRole::FtpServer, vec![21], false),
                        internal(3, HostRole::Plain, vec![22, 3306], true),
                        internal(7, HostRole::Plain, vec![22, 139, 445], false),
                    ],
                },
            ],
            puzzle: PuzzleConfig::default(),
            daemons: DaemonConfig::default(),
            ftp: FtpProfile::default(),
        }
    }
}

impl SimConfig {
    /// Load configuration from TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let content = fs::read_to_string(path.as_ref()).map_err(|e| {
            HuntError::ConfigError(format!("Failed to read config file {}: {}", path.as_ref().display(), e))
        })?;

        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> crate::Result<Self> {
        toml::from_str(content).map_err(|e| HuntError::ConfigError(format!("Failed to parse TOML: {}", e)))
    }

    pub fn to_toml_string(&self) -> crate::Result<String> {
        toml::to_string_pretty(self).map_err(|e| HuntError::ConfigError(format!("Config serialization error: {}", e)))
    }

    /// Load configuration from default locations
    pub fn load_default_config() -> crate::Result<Self> {
        let home_dir = dirs::home_dir().unwrap_or_else(|| std::path::PathBuf::from("."));
        let hunt_config = home_dir.join(".packethunt.toml");

        if hunt_config.exists() {
            log::info!("Loading config from {}", hunt_config.display());
            return Self::from_toml_file(&hunt_config);
        }

        Ok(Self::default())
    }

    pub fn interface_mac(&self) -> crate::Result<MacAddr> {
        MacAddr::from_str(&self.interface.mac)
            .map_err(|e| HuntError::ConfigError(format!("invalid interface MAC '{}': {:?}", self.interface.mac, e)))
    }

    pub fn segment(&self, id: SegmentId) -> Option<&SegmentConfig> {
        self.segments.iter().find(|segment| segment.id == id)
    }

    pub fn hosts(&self) -> impl Iterator<Item = (&SegmentConfig, &HostConfig)> {
        self.segments
            .iter()
            .flat_map(|segment| segment.hosts.iter().map(move |host| (segment, host)))
    }

    /// Hosts with the given role
    pub fn hosts_with_role(&self, role: HostRole) -> Vec<&HostConfig> {
        self.hosts().filter(|(_, host)| host.role == role).map(|(_, host)| host).collect()
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |msg: String| Err(HuntError::ConfigError(msg));

        if self.interface.name.is_empty() || self.interface.name.len() > 15 {
            return invalid(format!("interface name '{}' must be 1-15 bytes", self.interface.name));
        }
        self.interface_mac()?;

        let visible = match self.segment(SegmentId::Visible) {
            Some(segment) => segment,
            None => return invalid("a visible segment is required".to_string()),
        };
        if !visible.network.contains(self.interface.address) {
            return invalid(format!(
                "interface address {} is outside the visible segment {}",
                self.interface.address, visible.network
            ));
        }

        let mut seen_segments = HashSet::new();
        let mut seen_hosts = HashSet::new();
        seen_hosts.insert(self.interface.address);

        for segment in &self.segments {
            if !seen_segments.insert(segment.id) {
                return invalid(format!("segment '{}' is declared twice", segment.id));
            }
            parse_mac_prefix(&segment.mac_prefix)?;

            for host in &segment.hosts {
                if !segment.network.contains(host.address) {
                    return invalid(format!(
                        "host {} is outside its segment {} ({})",
                        host.address, segment.id, segment.network
                    ));
                }
                if !seen_hosts.insert(host.address) {
                    return invalid(format!("address {} is configured more than once", host.address));
                }
                let placed = matches!(
                    (host.role, segment.id),
                    (HostRole::KnockTarget, SegmentId::Visible)
                        | (HostRole::Gateway, SegmentId::Visible)
                        | (HostRole::FtpServer, SegmentId::Internal)
                        | (HostRole::Plain, _)
                );
                if !placed {
                    return invalid(format!("{} host {} cannot live in the {} segment", host.role, host.address, segment.id));
                }
            }
        }

        let knock_targets = self.hosts_with_role(HostRole::KnockTarget);
        if knock_targets.len() != 1 {
            return invalid(format!("exactly one knock target is required, found {}", knock_targets.len()));
        }
        let knock_target = knock_targets[0];

        let internal_hosts = self.segment(SegmentId::Internal).map_or(0, |s| s.hosts.len());
        let gateways = self.hosts_with_role(HostRole::Gateway).len();
        if gateways > 1 || (internal_hosts > 0 && gateways == 0) {
            return invalid(format!("internal hosts need exactly one gateway, found {}", gateways));
        }
        if self.hosts_with_role(HostRole::FtpServer).len() > 1 {
            return invalid("at most one FTP server is supported".to_string());
        }

        let automated = self.puzzle.automated_source;
        if automated == knock_target.address || visible.hosts.iter().all(|h| h.address != automated) {
            return invalid(format!("automated source {} must be another visible host", automated));
        }
        if self.puzzle.knock_sequence.is_empty() {
            return invalid("knock sequence cannot be empty".to_string());
        }
        if knock_target.open_ports.contains(&self.puzzle.hidden_port) {
            return invalid(format!(
                "hidden port {} is already open on the knock target",
                self.puzzle.hidden_port
            ));
        }
        if self.puzzle.cam_capacity == 0 {
            return invalid("CAM capacity must be greater than 0".to_string());
        }

        let daemons = &self.daemons;
        if daemons.knock_interval_ms == 0
            || daemons.gateway_min_interval_ms == 0
            || daemons.gateway_min_interval_ms > daemons.gateway_max_interval_ms
        {
            return invalid("daemon intervals must be positive and min <= max".to_string());
        }

        Ok(())
    }
}
