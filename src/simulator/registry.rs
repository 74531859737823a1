//! Address book of the simulated network

use crate::network::{MacAddr, SegmentId};
use std::collections::{BTreeMap, HashMap};
use std::net::Ipv4Addr;

/// IP to MAC mapping per segment
#[derive(Debug, Clone, Default)]
pub struct NetworkRegistry {
    segments: BTreeMap<SegmentId, HashMap<Ipv4Addr, MacAddr>>,
}

impl NetworkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry. Returns false if the address is already registered
    /// in any segment.
    pub fn insert(&mut self, segment: SegmentId, ip: Ipv4Addr, mac: MacAddr) -> bool {
        if self.segment_of(ip).is_some() {
            return false;
        }
        self.segments.entry(segment).or_default().insert(ip, mac);
        true
    }

    /// MAC of `ip` in whichever segment contains it
    pub fn lookup(&self, ip: Ipv4Addr) -> Option<MacAddr> {
        self.segments.values().find_map(|hosts| hosts.get(&ip).copied())
    }

    pub fn segment_of(&self, ip: Ipv4Addr) -> Option<SegmentId> {
        self.segments
            .iter()
            .find(|(_, hosts)| hosts.contains_key(&ip))
            .map(|(segment, _)| *segment)
    }

    pub fn contains(&self, ip: Ipv4Addr) -> bool {
        self.segment_of(ip).is_some()
    }

    /// ARP learning: overwrite the MAC of an address that is already
    /// known. Unknown addresses are never added.
    pub fn learn(&mut self, ip: Ipv4Addr, mac: MacAddr) -> Option<MacAddr> {
        self.segments
            .values_mut()
            .find_map(|hosts| hosts.get_mut(&ip))
            .map(|entry| std::mem::replace(entry, mac))
    }

    pub fn len(&self) -> usize {
        self.segments.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Open TCP ports per host, in insertion order
#[derive(Debug, Clone, Default)]
pub struct OpenPortTable {
    ports: HashMap<Ipv4Addr, Vec<u16>>,
}

impl OpenPortTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, ip: Ipv4Addr, ports: Vec<u16>) {
        self.ports.insert(ip, ports);
    }

    pub fn is_open(&self, ip: Ipv4Addr, port: u16) -> bool {
        self.ports.get(&ip).map_or(false, |ports| ports.contains(&port))
    }

    /// Append a port without merging; a port opened twice is listed twice.
    pub fn append(&mut self, ip: Ipv4Addr, port: u16) {
        self.ports.entry(ip).or_default().push(port);
    }

    pub fn ports(&self, ip: Ipv4Addr) -> &[u16] {
        self.ports.get(&ip).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn hosts(&self) -> impl Iterator<Item = &Ipv4Addr> {
        self.ports.keys()
    }
}
