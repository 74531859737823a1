//! CAM-table overflow and port-knock puzzle state

use std::net::Ipv4Addr;

/// Number of entries a simulated switch can learn before failing open
pub const DEFAULT_CAM_CAPACITY: usize = 1024;

/// The knock sequence sniffable once the switch is in hub mode
pub const DEFAULT_KNOCK_SEQUENCE: [u16; 6] = [951, 951, 4826, 443, 100, 21];

/// Switch forwarding mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchMode {
    Learning,
    /// Flooding every frame to every port. Terminal.
    Hub,
}

/// A learning switch with a finite CAM table
#[derive(Debug, Clone)]
pub struct CamTable {
    capacity: usize,
    entries: usize,
    mode: SwitchMode,
}

impl CamTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: 0,
            mode: SwitchMode::Learning,
        }
    }

    /// Account one unrouted frame. Returns true only on the frame that
    /// fills the table and flips the switch into hub mode.
    pub fn record_frame(&mut self) -> bool {
        if self.mode == SwitchMode::Hub || self.entries >= self.capacity {
            return false;
        }

        self.entries += 1;
        if self.entries >= self.capacity {
            self.mode = SwitchMode::Hub;
            return true;
        }
        false
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    pub fn is_hub(&self) -> bool {
        self.mode == SwitchMode::Hub
    }
}

impl Default for CamTable {
    fn default() -> Self {
        Self::new(DEFAULT_CAM_CAPACITY)
    }
}

/// Outcome of feeding one SYN to the knock matcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KnockProgress {
    /// Not a knock: automated traffic, a port outside the sequence, or the
    /// sequence is already complete
    Ignored,
    Advanced(usize),
    Reset,
    /// The last port of the sequence arrived. Reported exactly once.
    Completed,
}

/// Positional port-knock matcher
#[derive(Debug, Clone)]
pub struct KnockState {
    sequence: Vec<u16>,
    expected_index: usize,
    automated_source: Ipv4Addr,
}

impl KnockState {
    pub fn new(sequence: Vec<u16>, automated_source: Ipv4Addr) -> Self {
        Self {
            sequence,
            expected_index: 0,
            automated_source,
        }
    }

    pub fn feed(&mut self, source: Ipv4Addr, port: u16) -> KnockProgress {
        if source == self.automated_source || !self.sequence.contains(&port) || self.is_complete() {
            return KnockProgress::Ignored;
        }

        if self.sequence[self.expected_index] == port {
            self.expected_index += 1;
        } else {
            self.expected_index = 0;
            return KnockProgress::Reset;
        }

        if self.is_complete() {
            KnockProgress::Completed
        } else {
            KnockProgress::Advanced(self.expected_index)
        }
    }

    pub fn expected_index(&self) -> usize {
        self.expected_index
    }

    pub fn is_complete(&self) -> bool {
        self.expected_index >= self.sequence.len()
    }

    pub fn sequence(&self) -> &[u16] {
        &self.sequence
    }
}
