//! packethunt - a virtual network for practicing packet-level attacks
//!
//! The simulator attaches to a TAP interface and plays every host of a
//! small fake LAN. Players solve a chain of puzzles with raw packets:
//! overflow the switch, sniff and replay a port knock, then spoof their
//! way to an internal FTP server.

pub mod config;
pub mod error;
pub mod network;
pub mod simulator;

// Re-export commonly used types
pub use config::SimConfig;
pub use error::{HuntError, HuntResult};
pub use network::frame::Frame;
pub use network::tap::TapDevice;
pub use simulator::daemons::TokioLauncher;
pub use simulator::{DaemonKind, DaemonLauncher, DispatchReport, FrameSink, PuzzleEvent, Route, Simulator};

pub type Result<T> = std::result::Result<T, HuntError>;
