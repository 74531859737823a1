//! End to end SMTP and FTP conversations through the dispatcher

mod common;

use common::*;
use packethunt::network::frame::Frame;
use packethunt::network::packet::TcpFrameBuilder;
use packethunt::network::tcp_flags;
use packethunt::network::MacAddr;
use packethunt::simulator::session::{ftp, smtp, FtpProfile};
use std::net::Ipv4Addr;

const DOT6: Ipv4Addr = Ipv4Addr::new(10, 5, 0, 6);
const GATEWAY: Ipv4Addr = Ipv4Addr::new(10, 5, 0, 254);
const FTP_SERVER: Ipv4Addr = Ipv4Addr::new(10, 5, 1, 2);

/// Client side of one TCP connection, tracking sequence numbers from
/// the server's replies
struct Client<'a> {
    h: &'a Harness,
    src: (MacAddr, Ipv4Addr),
    dst: (MacAddr, Ipv4Addr),
    dport: u16,
    seq: u32,
    ack: u32,
}

impl<'a> Client<'a> {
    fn new(h: &'a Harness, src_mac: MacAddr, dst: (MacAddr, Ipv4Addr), dport: u16) -> Self {
        Self {
            h,
            src: (src_mac, PLAYER_IP),
            dst,
            dport,
            seq: 5000,
            ack: 0,
        }
    }

    fn builder(&self) -> TcpFrameBuilder {
        TcpFrameBuilder::new(self.src, self.dst, 43210, self.dport)
            .seq_num(self.seq)
            .ack_num(self.ack)
    }

    fn absorb(&mut self, replies: &[Frame]) {
        if let Some(last) = replies.last() {
            let tcp = last.tcp().unwrap();
            let consumed = tcp.payload.len() as u32
                + u32::from(tcp.has_flags(tcp_flags::SYN) || tcp.has_flags(tcp_flags::FIN));
            self.ack = tcp.sequence.wrapping_add(consumed);
        }
    }

    fn connect(&mut self) -> Vec<Frame> {
        let replies = self.h.send(&self.builder().syn().build());
        self.seq += 1;
        self.absorb(&replies);
        assert_eq!(replies[0].tcp().unwrap().flags, tcp_flags::SYN_ACK);

        let banner = self.h.send(&self.builder().ack().build());
        self.absorb(&banner);
        banner
    }

    fn say(&mut self, line: &str) -> Vec<Frame> {
        let data = format!("{}\r\n", line);
        let replies = self.h.send(&self.builder().ack().payload(data.clone()).build());
        self.seq += data.len() as u32;
        self.absorb(&replies);
        replies
    }

    fn close(&mut self) -> Vec<Frame> {
        self.h.send(&self.builder().fin().ack().build())
    }
}

fn unlock_smtp(h: &Harness) {
    for port in [951, 951, 4826, 443, 100, 21] {
        h.send(&h.syn(DOT6, port));
    }
}

#[test]
fn test_smtp_round_trip() {
    let h = Harness::new();
    unlock_smtp(&h);

    let mut client = Client::new(&h, PLAYER_MAC, (h.mac_of(DOT6), DOT6), 25);
    let banner = client.connect();
    assert_eq!(banner.len(), 1);
    assert_eq!(payload_text(&banner[0]), smtp::BANNER);
    assert_eq!(banner[0].tcp().unwrap().sequence, 0x1001);
    assert!(h.sim.with_state(|s| s.smtp[&PLAYER_IP].is_alive()));

    let welcome = client.say("EHLO hunter");
    assert_eq!(payload_text(&welcome[0]), smtp::WELCOME);
    assert_eq!(welcome[0].tcp().unwrap().acknowledgement, client.seq);

    let invalid = client.say("MAIL FROM:<a@b>");
    assert_eq!(payload_text(&invalid[0]), smtp::INVALID);

    let bye = client.close();
    assert_eq!(bye[0].tcp().unwrap().flags, tcp_flags::ACK);
    assert_eq!(bye[0].tcp().unwrap().acknowledgement, client.seq + 1);
    assert!(h.sim.with_state(|s| s.smtp.get(&PLAYER_IP).map_or(true, |session| !session.is_alive())));
}

#[test]
fn test_smtp_is_silent_before_knock() {
    let h = Harness::new();
    let mut client = Client::new(&h, PLAYER_MAC, (h.mac_of(DOT6), DOT6), 25);
    assert!(h.send(&client.builder().syn().build()).is_empty());
    client.seq += 1;
    assert!(h.send(&client.builder().ack().build()).is_empty());
}

#[test]
fn test_ftp_round_trip_with_spoofed_mac() {
    let h = Harness::new();
    let profile = FtpProfile::default();
    let spoofed = h.mac_of(DOT6);
    let mut client = Client::new(&h, spoofed, (h.mac_of(GATEWAY), FTP_SERVER), 21);

    let banner = client.connect();
    assert_eq!(payload_text(&banner[0]), ftp::BANNER);

    assert_eq!(payload_text(&client.say("LIST")[0]), ftp::NOT_LOGGED_IN);
    assert_eq!(payload_text(&client.say("USER admin")[0]), ftp::NEED_PASSWORD);
    assert_eq!(payload_text(&client.say("PASS admin")[0]), ftp::LOGGED_IN);
    assert!(h.sim.with_state(|s| s.ftp[&PLAYER_IP].pass_entered()));

    let listing = client.say("LIST");
    assert!(payload_text(&listing[0]).contains(&profile.secret_file));

    assert_eq!(payload_text(&client.say("RETR nothing.txt")[0]), ftp::NOT_FOUND);

    let transfer = client.say(&format!("RETR {}", profile.secret_file));
    assert_eq!(transfer.len(), 2);
    assert!(payload_text(&transfer[0]).starts_with("150"));
    assert_eq!(payload_text(&transfer[1]), profile.win_message);
    let (first, second) = (transfer[0].tcp().unwrap(), transfer[1].tcp().unwrap());
    assert_eq!(second.sequence, first.sequence + first.payload.len() as u32);

    let bye = client.close();
    assert_eq!(bye[0].tcp().unwrap().flags, tcp_flags::ACK);
    assert!(h.sim.with_state(|s| !s.ftp.contains_key(&PLAYER_IP)));
}

#[test]
fn test_ftp_wrong_password_and_unauthorized_mac() {
    let h = Harness::new();
    let mut stranger = Client::new(&h, PLAYER_MAC, (h.mac_of(GATEWAY), FTP_SERVER), 21);
    assert!(h.send(&stranger.builder().syn().build()).is_empty());
    stranger.seq += 1;

    let spoofed = h.mac_of(Ipv4Addr::new(10, 5, 0, 4));
    let mut client = Client::new(&h, spoofed, (h.mac_of(GATEWAY), FTP_SERVER), 21);
    client.connect();
    client.say("USER admin");
    assert_eq!(payload_text(&client.say("PASS letmein")[0]), ftp::LOGIN_INCORRECT);
    assert_eq!(payload_text(&client.say("PASS admin")[0]), ftp::USER_FIRST);
    assert_eq!(payload_text(&client.say("NOOP")[0]), ftp::INVALID);
}

#[test]
fn test_ftp_server_resets_other_ports_and_ignores_ping() {
    let h = Harness::new();
    let spoofed = h.mac_of(DOT6);
    let syn = TcpFrameBuilder::new((spoofed, PLAYER_IP), (h.mac_of(GATEWAY), FTP_SERVER), 43210, 22)
        .syn()
        .build();
    let replies = h.send(&syn);
    assert_eq!(replies[0].tcp().unwrap().flags, tcp_flags::RST_ACK);

    let mut echo = ping(FTP_SERVER, h.mac_of(GATEWAY));
    echo.ethernet.source = spoofed;
    assert!(h.send(&echo).is_empty());
}
