//! Frame-set kinds and their scheduling priorities.
//!
//! The numbering is shared with the nanoprobes and must not change. Kinds
//! this build does not know about decode to [`FrameSetKind::Unknown`] rather
//! than failing, so a newer drone can still talk to an older CMA.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::DEFAULT_PRIORITY;

/// The type tag of a frame set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u16", into = "u16")]
pub enum FrameSetKind {
    Heartbeat,
    Ping,
    Pong,
    Startup,
    Ack,
    ConnShut,
    ConnNak,
    HbDead,
    HbShutdown,
    HbLate,
    HbBackAlive,
    HbMartian,
    SwDiscover,
    JsDiscovery,
    RscOpReply,
    SeqPing,
    SeqPong,
    SendHb,
    ExpectHb,
    SendExpectHb,
    StopSendHb,
    StopExpectHb,
    StopSendExpectHb,
    SetConfig,
    DoDiscover,
    StopDiscover,
    AckStartup,
    /// A kind number this build does not recognise.
    Unknown(u16),
}

impl FrameSetKind {
    /// Wire number of this kind.
    pub fn code(self) -> u16 {
        match self {
            Self::Heartbeat => 1,
            Self::Ping => 2,
            Self::Pong => 3,
            Self::Startup => 4,
            Self::Ack => 16,
            Self::ConnShut => 17,
            Self::ConnNak => 18,
            Self::HbDead => 26,
            Self::HbShutdown => 27,
            Self::HbLate => 28,
            Self::HbBackAlive => 29,
            Self::HbMartian => 30,
            Self::SwDiscover => 31,
            Self::JsDiscovery => 32,
            Self::RscOpReply => 33,
            Self::SeqPing => 34,
            Self::SeqPong => 35,
            Self::SendHb => 64,
            Self::ExpectHb => 65,
            Self::SendExpectHb => 66,
            Self::StopSendHb => 67,
            Self::StopExpectHb => 68,
            Self::StopSendExpectHb => 69,
            Self::SetConfig => 70,
            Self::DoDiscover => 73,
            Self::StopDiscover => 74,
            Self::AckStartup => 77,
            Self::Unknown(code) => code,
        }
    }

    /// Protocol name, as used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Heartbeat => "HEARTBEAT",
            Self::Ping => "PING",
            Self::Pong => "PONG",
            Self::Startup => "STARTUP",
            Self::Ack => "ACK",
            Self::ConnShut => "CONNSHUT",
            Self::ConnNak => "CONNNAK",
            Self::HbDead => "HBDEAD",
            Self::HbShutdown => "HBSHUTDOWN",
            Self::HbLate => "HBLATE",
            Self::HbBackAlive => "HBBACKALIVE",
            Self::HbMartian => "HBMARTIAN",
            Self::SwDiscover => "SWDISCOVER",
            Self::JsDiscovery => "JSDISCOVERY",
            Self::RscOpReply => "RSCOPREPLY",
            Self::SeqPing => "SEQPING",
            Self::SeqPong => "SEQPONG",
            Self::SendHb => "SENDHB",
            Self::ExpectHb => "EXPECTHB",
            Self::SendExpectHb => "SENDEXPECTHB",
            Self::StopSendHb => "STOPSENDHB",
            Self::StopExpectHb => "STOPEXPECTHB",
            Self::StopSendExpectHb => "STOPSENDEXPECTHB",
            Self::SetConfig => "SETCONFIG",
            Self::DoDiscover => "DODISCOVER",
            Self::StopDiscover => "STOPDISCOVER",
            Self::AckStartup => "ACKSTARTUP",
            Self::Unknown(_) => "UNKNOWN",
        }
    }

    /// Scheduling priority, 0 being the most urgent.
    ///
    /// Shutdown, death and liveness traffic is cheap and time-critical, so it
    /// goes first. STARTUP is urgent but can be expensive. Discovery is bulk.
    pub fn priority(self) -> u8 {
        match self {
            Self::ConnShut
            | Self::HbShutdown
            | Self::HbDead
            | Self::Ping
            | Self::Pong
            | Self::RscOpReply => 0,
            Self::Startup => 1,
            Self::SwDiscover | Self::JsDiscovery => 2,
            _ => DEFAULT_PRIORITY,
        }
    }

    /// Kinds a drone may send before it has a secure identity.
    pub fn allowed_unencrypted(self) -> bool {
        matches!(self, Self::Startup)
    }
}

impl From<u16> for FrameSetKind {
    fn from(code: u16) -> Self {
        match code {
            1 => Self::Heartbeat,
            2 => Self::Ping,
            3 => Self::Pong,
            4 => Self::Startup,
            16 => Self::Ack,
            17 => Self::ConnShut,
            18 => Self::ConnNak,
            26 => Self::HbDead,
            27 => Self::HbShutdown,
            28 => Self::HbLate,
            29 => Self::HbBackAlive,
            30 => Self::HbMartian,
            31 => Self::SwDiscover,
            32 => Self::JsDiscovery,
            33 => Self::RscOpReply,
            34 => Self::SeqPing,
            35 => Self::SeqPong,
            64 => Self::SendHb,
            65 => Self::ExpectHb,
            66 => Self::SendExpectHb,
            67 => Self::StopSendHb,
            68 => Self::StopExpectHb,
            69 => Self::StopSendExpectHb,
            70 => Self::SetConfig,
            73 => Self::DoDiscover,
            74 => Self::StopDiscover,
            77 => Self::AckStartup,
            other => Self::Unknown(other),
        }
    }
}

impl From<FrameSetKind> for u16 {
    fn from(kind: FrameSetKind) -> Self {
        kind.code()
    }
}

impl fmt::Display for FrameSetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "UNKNOWN({})", code),
            other => f.write_str(other.name()),
        }
    }
}
