//! Scripted SMTP and FTP sessions
//!
//! Both services are modelled as small state enums with pure transitions
//! `(state, event) -> (state, Option<reply>)`. The host handler turns a TCP
//! segment into a [`SegmentEvent`] and the returned [`SessionReply`] into
//! frames; nothing in here knows about frames or locks.
//!
//! Application commands are only answered while the session is connected,
//! i.e. after the client's first bare ACK has been answered with the banner.

use crate::network::frame::TcpSegment;
use crate::network::tcp_flags;
use serde::{Deserialize, Serialize};

/// What a TCP segment means to a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    Syn,
    Fin,
    /// ACK without data
    BareAck,
    /// Data carried by an ACK, CRLF trimmed
    Command(String),
    Ignored,
}

impl SegmentEvent {
    pub fn classify(tcp: &TcpSegment) -> Self {
        if tcp.is_syn() {
            SegmentEvent::Syn
        } else if tcp.has_flags(tcp_flags::FIN) {
            SegmentEvent::Fin
        } else if tcp.has_flags(tcp_flags::RST) || !tcp.has_flags(tcp_flags::ACK) {
            SegmentEvent::Ignored
        } else if tcp.payload.is_empty() {
            SegmentEvent::BareAck
        } else {
            let text = String::from_utf8_lossy(&tcp.payload);
            SegmentEvent::Command(text.trim_end_matches(['\r', '\n']).to_string())
        }
    }
}

/// What the session wants sent back
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionReply {
    SynAck,
    Ack,
    Text(String),
    /// Two data frames for one request: a notice, then the file body
    Transfer { notice: String, body: String },
}

impl SessionReply {
    fn text(s: impl Into<String>) -> Option<Self> {
        Some(SessionReply::Text(s.into()))
    }
}

pub mod smtp {
    pub const BANNER: &str = "220 mail.corp.local ESMTP Postfix (Debian/GNU)\r\n";
    pub const WELCOME: &str = "250 mail.corp.local Hello, pleased to meet you\r\n";
    pub const INVALID: &str = "502 5.5.2 Error: command not recognized\r\n";
}

/// SMTP server session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmtpSession {
    #[default]
    Closed,
    Open,
}

impl SmtpSession {
    pub fn is_alive(&self) -> bool {
        *self == SmtpSession::Open
    }

    pub fn step(self, event: &SegmentEvent) -> (Self, Option<SessionReply>) {
        match (self, event) {
            (_, SegmentEvent::Syn) => (self, Some(SessionReply::SynAck)),
            (_, SegmentEvent::Fin) => (SmtpSession::Closed, Some(SessionReply::Ack)),
            (SmtpSession::Closed, SegmentEvent::BareAck) => (SmtpSession::Open, SessionReply::text(smtp::BANNER)),
            (SmtpSession::Open, SegmentEvent::Command(line)) => {
                let greeting = line.split(' ').any(|token| token == "EHLO" || token == "HELO");
                if greeting {
                    (self, SessionReply::text(smtp::WELCOME))
                } else {
                    (self, SessionReply::text(smtp::INVALID))
                }
            }
            _ => (self, None),
        }
    }
}

pub mod ftp {
    pub const BANNER: &str = "220 (vsFTPd 2.3.4)\r\n";
    pub const NEED_PASSWORD: &str = "331 Please specify the password.\r\n";
    pub const LOGGED_IN: &str = "230 Login successful.\r\n";
    pub const LOGIN_INCORRECT: &str = "530 Login incorrect.\r\n";
    pub const USER_FIRST: &str = "503 Login with USER first.\r\n";
    pub const NOT_LOGGED_IN: &str = "530 Please login with USER and PASS.\r\n";
    pub const NOT_FOUND: &str = "550 Failed to open file.\r\n";
    pub const INVALID: &str = "500 Unknown command.\r\n";
}

/// Credentials and the prize file of the FTP server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtpProfile {
    pub username: String,
    pub password: String,
    pub secret_file: String,
    pub win_message: String,
}

impl Default for FtpProfile {
    fn default() -> Self {
        Self {
            username: "admin".to_string(),
            password: "admin".to_string(),
            secret_file: "secret.txt".to_string(),
            win_message: "Congratulations! You sniffed, spoofed and knocked your way to the secret. \
                          The hunt is over.\r\n"
                .to_string(),
        }
    }
}

impl FtpProfile {
    fn listing(&self) -> String {
        format!(
            "150 Here comes the directory listing.\r\n\
             -rw-r--r--    1 0        0             {} Oct 19 09:41 {}\r\n\
             226 Directory send OK.\r\n",
            self.win_message.len(),
            self.secret_file
        )
    }

    fn transfer(&self) -> SessionReply {
        SessionReply::Transfer {
            notice: format!(
                "150 Opening BINARY mode data connection for {} ({} bytes).\r\n",
                self.secret_file,
                self.win_message.len()
            ),
            body: self.win_message.clone(),
        }
    }
}

/// Authentication progress of a connected FTP client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FtpAuth {
    Unauthenticated,
    UserPending(String),
    Authenticated(String),
}

/// FTP server session
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FtpSession {
    #[default]
    Idle,
    Connected(FtpAuth),
}

impl FtpSession {
    pub fn is_alive(&self) -> bool {
        matches!(self, FtpSession::Connected(_))
    }

    pub fn user_entered(&self) -> bool {
        self.user().is_some()
    }

    pub fn pass_entered(&self) -> bool {
        matches!(self, FtpSession::Connected(FtpAuth::Authenticated(_)))
    }

    pub fn user(&self) -> Option<&str> {
        match self {
            FtpSession::Connected(FtpAuth::UserPending(user))
            | FtpSession::Connected(FtpAuth::Authenticated(user)) => Some(user),
            _ => None,
        }
    }

    pub fn step(self, event: &SegmentEvent, profile: &FtpProfile) -> (Self, Option<SessionReply>) {
        match (self, event) {
            (state, SegmentEvent::Syn) => (state, Some(SessionReply::SynAck)),
            (_, SegmentEvent::Fin) => (FtpSession::Idle, Some(SessionReply::Ack)),
            (FtpSession::Idle, SegmentEvent::BareAck) => (
                FtpSession::Connected(FtpAuth::Unauthenticated),
                SessionReply::text(ftp::BANNER),
            ),
            (FtpSession::Connected(auth), SegmentEvent::Command(line)) => {
                let (auth, reply) = command(auth, line, profile);
                (FtpSession::Connected(auth), reply)
            }
            (state, _) => (state, None),
        }
    }
}

fn command(auth: FtpAuth, line: &str, profile: &FtpProfile) -> (FtpAuth, Option<SessionReply>) {
    let args: Vec<&str> = line.split_whitespace().collect();

    match (auth, args.as_slice()) {
        (FtpAuth::Unauthenticated, ["USER", name]) => {
            (FtpAuth::UserPending(name.to_string()), SessionReply::text(ftp::NEED_PASSWORD))
        }
        (FtpAuth::UserPending(user), ["PASS", password]) => {
            if user == profile.username && *password == profile.password {
                (FtpAuth::Authenticated(user), SessionReply::text(ftp::LOGGED_IN))
            } else {
                (FtpAuth::Unauthenticated, SessionReply::text(ftp::LOGIN_INCORRECT))
            }
        }
        (FtpAuth::Unauthenticated, ["PASS", _]) => (FtpAuth::Unauthenticated, SessionReply::text(ftp::USER_FIRST)),
        (auth @ FtpAuth::Authenticated(_), ["LIST"]) => (auth, SessionReply::text(profile.listing())),
        (auth @ FtpAuth::Authenticated(_), ["RETR", name]) => {
            if *name == profile.secret_file {
                (auth, Some(profile.transfer()))
            } else {
                (auth, SessionReply::text(ftp::NOT_FOUND))
            }
        }
        (auth, ["LIST"]) | (auth, ["RETR", _]) => (auth, SessionReply::text(ftp::NOT_LOGGED_IN)),
        (auth, _) => (auth, SessionReply::text(ftp::INVALID)),
    }
}
