//! Linux TAP device adapter
//!
//! Opens `/dev/net/tun` in TAP mode without packet information, so every
//! read returns exactly one Ethernet frame and every write injects one.

use crate::config::SimConfig;
use crate::network::SegmentId;
use crate::simulator::hosts::HostRole;
use crate::simulator::FrameSink;
use crate::HuntError;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::process::Command;

const DEVICE_PATH: &str = "/dev/net/tun";

const TUNSETIFF: libc::c_ulong = 0x4004_54ca;
const TUNSETOWNER: libc::c_ulong = TUNSETIFF + 2;
const IFF_TAP: libc::c_short = 0x0002;
const IFF_NO_PI: libc::c_short = 0x1000;

/// Large enough for any frame on a 1500 byte MTU link, VLAN tag included
pub const MAX_FRAME_LEN: usize = 2048;

/// `struct ifreq` as the TUN driver reads it: name, flags, padding
#[repr(C)]
struct IfReq {
    name: [libc::c_char; libc::IFNAMSIZ],
    flags: libc::c_short,
    _pad: [u8; 22],
}

impl IfReq {
    fn new(name: &str, flags: libc::c_short) -> crate::Result<Self> {
        if name.is_empty() || name.len() >= libc::IFNAMSIZ {
            return Err(HuntError::InterfaceError(format!(
                "interface name '{}' must be 1-{} bytes",
                name,
                libc::IFNAMSIZ - 1
            )));
        }

        let mut req = Self {
            name: [0; libc::IFNAMSIZ],
            flags,
            _pad: [0; 22],
        };
        for (slot, byte) in req.name.iter_mut().zip(name.bytes()) {
            *slot = byte as libc::c_char;
        }
        Ok(req)
    }
}

/// An attached TAP interface
#[derive(Debug)]
pub struct TapDevice {
    file: File,
    name: String,
}

impl TapDevice {
    /// Create (or attach to) the named TAP interface, optionally handing
    /// it to an unprivileged uid.
    pub fn open(name: &str, owner: Option<u32>) -> crate::Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(DEVICE_PATH)
            .map_err(|e| HuntError::from_interface_io(&format!("open {}", DEVICE_PATH), e))?;

        let mut req = IfReq::new(name, IFF_TAP | IFF_NO_PI)?;
        // SAFETY: `req` is a properly sized ifreq that outlives the call
        let rc = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETIFF as _, &mut req as *mut IfReq) };
        if rc < 0 {
            return Err(HuntError::from_interface_io(
                &format!("TUNSETIFF {}", name),
                std::io::Error::last_os_error(),
            ));
        }

        if let Some(uid) = owner {
            // SAFETY: TUNSETOWNER takes the uid by value
            let rc = unsafe { libc::ioctl(file.as_raw_fd(), TUNSETOWNER as _, uid as libc::c_ulong) };
            if rc < 0 {
                return Err(HuntError::from_interface_io(
                    &format!("TUNSETOWNER {}", uid),
                    std::io::Error::last_os_error(),
                ));
            }
        }

        log::info!("Allocated interface {}", name);
        Ok(Self {
            file,
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Assign MAC and address, bring the link up and route the internal
    /// segment through the gateway host. Safe to repeat on an interface
    /// that kept its address from an earlier run.
    pub fn configure(&self, config: &SimConfig) -> crate::Result<()> {
        for args in configure_commands(&self.name, config)? {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            ip(&args)?;
        }

        log::info!("Configured {} as {} ({})", self.name, config.interface.address, config.interface.mac);
        Ok(())
    }

    /// Flush addresses and routes and down the link
    pub fn teardown(&self) -> crate::Result<()> {
        ip(&["addr", "flush", "dev", &self.name])?;
        ip(&["link", "set", "dev", &self.name, "down"])?;
        log::info!("Tore down {}", self.name);
        Ok(())
    }

    /// Block until one frame arrives
    pub fn read_frame(&self, buf: &mut [u8]) -> crate::Result<usize> {
        (&self.file)
            .read(buf)
            .map_err(|e| HuntError::from_interface_io(&format!("read {}", self.name), e))
    }
}

impl FrameSink for TapDevice {
    fn write_frame(&self, frame: &[u8]) -> crate::Result<()> {
        let written = (&self.file)
            .write(frame)
            .map_err(|e| HuntError::NetworkError(format!("write {}: {}", self.name, e)))?;
        if written != frame.len() {
            return Err(HuntError::NetworkError(format!(
                "short write on {}: {} of {} bytes",
                self.name,
                written,
                frame.len()
            )));
        }
        Ok(())
    }
}

/// `ip` argument lists that configure `name`, in order
fn configure_commands(name: &str, config: &SimConfig) -> crate::Result<Vec<Vec<String>>> {
    let iface = &config.interface;
    let visible = config
        .segment(SegmentId::Visible)
        .ok_or_else(|| HuntError::ConfigError("a visible segment is required".to_string()))?;

    let address = format!("{}/{}", iface.address, visible.network.prefix());
    let broadcast = visible.network.broadcast().to_string();
    let args = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();

    let mut commands = vec![
        args(&["link", "set", "dev", name, "down"]),
        args(&["link", "set", "dev", name, "address", &iface.mac]),
        args(&["addr", "replace", &address, "broadcast", &broadcast, "dev", name]),
        args(&["link", "set", "dev", name, "up"]),
    ];

    let gateway = config.hosts_with_role(HostRole::Gateway).first().map(|h| h.address);
    if let (Some(internal), Some(gateway)) = (config.segment(SegmentId::Internal), gateway) {
        let network = internal.network.to_string();
        let via = gateway.to_string();
        commands.push(args(&["route", "replace", &network, "via", &via, "dev", name]));
    }
    Ok(commands)
}

fn ip(args: &[&str]) -> crate::Result<()> {
    log::debug!("ip {}", args.join(" "));
    let output = Command::new("ip")
        .args(args)
        .output()
        .map_err(|e| HuntError::InterfaceError(format!("failed to run ip: {}", e)))?;

    if !output.status.success() {
        return Err(HuntError::InterfaceError(format!(
            "ip {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
