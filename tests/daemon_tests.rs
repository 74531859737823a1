//! Background traffic daemons running on a real tokio runtime

mod common;

use common::*;
use packethunt::network::frame::Frame;
use packethunt::network::tcp_flags;
use packethunt::{SimConfig, Simulator, TokioLauncher};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

const DOT4: Ipv4Addr = Ipv4Addr::new(10, 5, 0, 4);
const DOT6: Ipv4Addr = Ipv4Addr::new(10, 5, 0, 6);

fn fast_config() -> SimConfig {
    let mut config = SimConfig::default();
    config.daemons.knock_interval_ms = 20;
    config.daemons.gateway_min_interval_ms = 5;
    config.daemons.gateway_max_interval_ms = 15;
    config
}

fn live_simulator() -> (Arc<Simulator>, Arc<CaptureSink>) {
    let sink = Arc::new(CaptureSink::default());
    let launcher = Arc::new(TokioLauncher::new(tokio::runtime::Handle::current()));
    let sim = Simulator::new(&fast_config(), sink.clone(), launcher).unwrap();
    (Arc::new(sim), sink)
}

fn knock_syns(frames: &[Frame]) -> Vec<u16> {
    frames
        .iter()
        .filter_map(|f| {
            let ip = f.ipv4()?;
            let tcp = f.tcp()?;
            (ip.source == DOT4 && tcp.flags == tcp_flags::SYN).then_some(tcp.destination_port)
        })
        .collect()
}

#[tokio::test]
async fn test_knock_daemon_starts_on_hub_mode_and_stops_after_knock() {
    let (sim, sink) = live_simulator();

    for n in 0..1024 {
        sim.dispatch(&flood_frame(n).to_bytes().unwrap());
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let frames: Vec<Frame> = sink.take_raw().iter().map(|raw| Frame::parse(raw)).collect();
    let ports = knock_syns(&frames);
    assert!(ports.len() >= 6);
    assert_eq!(&ports[..6], &[951, 951, 4826, 443, 100, 21]);

    // the looped back knock reaches the target, which resets the closed port
    assert!(frames.iter().any(|f| {
        f.ipv4().map_or(false, |ip| ip.source == DOT6 && ip.destination == DOT4)
            && f.tcp().map_or(false, |tcp| tcp.flags == tcp_flags::RST_ACK)
    }));
    assert!(!sim.knock_complete());

    for port in [951, 951, 4826, 443, 100, 21] {
        sim.dispatch(&player_syn(&sim, port).to_bytes().unwrap());
    }
    assert!(sim.knock_complete());

    tokio::time::sleep(Duration::from_millis(60)).await;
    sink.take_raw();
    tokio::time::sleep(Duration::from_millis(60)).await;
    let late: Vec<Frame> = sink.take_raw().iter().map(|raw| Frame::parse(raw)).collect();
    assert!(knock_syns(&late).is_empty());
}

#[tokio::test]
async fn test_gateway_daemon_leaks_ftp_credentials() {
    let (sim, sink) = live_simulator();

    for port in [951, 951, 4826, 443, 100, 21] {
        sim.dispatch(&player_syn(&sim, port).to_bytes().unwrap());
    }
    sink.take_raw();
    tokio::time::sleep(Duration::from_millis(80)).await;

    let frames: Vec<Frame> = sink.take_raw().iter().map(|raw| Frame::parse(raw)).collect();
    let text: String = frames
        .iter()
        .filter_map(|f| f.tcp())
        .map(|tcp| String::from_utf8_lossy(&tcp.payload).into_owned())
        .collect();
    assert!(text.contains("USER admin"));
    assert!(text.contains("PASS admin"));

    // replayed traffic never touches the player's view of the server
    assert!(sim.with_state(|s| s.ftp.is_empty()));
}

fn player_syn(sim: &Simulator, port: u16) -> Frame {
    let target = sim.hosts().get(DOT6).unwrap();
    packethunt::network::packet::TcpFrameBuilder::new((PLAYER_MAC, PLAYER_IP), (target.mac, DOT6), 40000, port)
        .syn()
        .build()
}
