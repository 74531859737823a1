//! Network module for frame parsing, reply crafting and the TAP device

pub mod frame;
pub mod packet;
pub mod replies;
pub mod tap;

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

pub use pnet::util::MacAddr;

/// The two simulated LAN segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentId {
    /// Directly attached to the TAP interface
    Visible,
    /// Behind the gateway host
    Internal,
}

impl SegmentId {
    pub fn name(&self) -> &'static str {
        match self {
            SegmentId::Visible => "visible",
            SegmentId::Internal => "internal",
        }
    }
}

impl std::fmt::Display for SegmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Derive the MAC of a simulated host: five prefix bytes plus the last
/// octet of its address.
pub fn derive_mac(prefix: [u8; 5], ip: Ipv4Addr) -> MacAddr {
    let last = ip.octets()[3];
    MacAddr::new(prefix[0], prefix[1], prefix[2], prefix[3], prefix[4], last)
}

/// Parse a colon separated five byte MAC prefix such as `12:67:7e:b7:6d`.
pub fn parse_mac_prefix(s: &str) -> crate::Result<[u8; 5]> {
    let parts: Vec<&str> = s.trim().split(':').collect();
    if parts.len() != 5 {
        return Err(crate::HuntError::ParseError(format!(
            "MAC prefix '{}' must have exactly five octets",
            s
        )));
    }

    let mut prefix = [0u8; 5];
    for (slot, part) in prefix.iter_mut().zip(parts) {
        *slot = u8::from_str_radix(part, 16).map_err(|e| {
            crate::HuntError::ParseError(format!("invalid octet '{}' in MAC prefix '{}': {}", part, s, e))
        })?;
    }
    Ok(prefix)
}

/// TCP flag bits as they appear in the header
pub mod tcp_flags {
    use pnet::packet::tcp::TcpFlags;

    pub const FIN: u8 = TcpFlags::FIN;
    pub const SYN: u8 = TcpFlags::SYN;
    pub const RST: u8 = TcpFlags::RST;
    pub const PSH: u8 = TcpFlags::PSH;
    pub const ACK: u8 = TcpFlags::ACK;

    pub const SYN_ACK: u8 = SYN | ACK;
    pub const RST_ACK: u8 = RST | ACK;
    pub const FIN_ACK: u8 = FIN | ACK;
    pub const PSH_ACK: u8 = PSH | ACK;

    /// Render flags the way packet sniffers print them (`SA`, `RA`, ...)
    pub fn describe(flags: u8) -> String {
        let mut out = String::new();
        for (bit, letter) in [(FIN, 'F'), (SYN, 'S'), (RST, 'R'), (PSH, 'P'), (ACK, 'A')] {
            if flags & bit != 0 {
                out.push(letter);
            }
        }
        if out.is_empty() {
            out.push('.');
        }
        out
    }
}
