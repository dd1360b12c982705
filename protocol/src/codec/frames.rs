//! Typed frames and frame sets.
//!
//! A [`FrameSet`] is one protocol message: a kind tag, an ordered list of
//! typed [`Frame`]s and, when it arrived over a secured channel, the key id
//! of its sender.
//!
//! Outbound commands are staged as loosely typed [`FieldValue`]s (the
//! network transaction stays serialisable) and only become concrete frames
//! at commit time, through [`Frame::from_field`].

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use super::kinds::FrameSetKind;
use super::CodecError;

// ---------------------------------------------------------------------------
// Frame Types
// ---------------------------------------------------------------------------

/// Type tag of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameType {
    Hostname,
    IpAddr,
    IpPort,
    DiscName,
    DiscInterval,
    DiscJson,
    ConfigJson,
    KeyId,
    Text,
}

/// A single typed field of a frame set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Name of the system sending or named by the packet.
    Hostname(String),
    /// Bare IP address.
    IpAddr(IpAddr),
    /// IP address with port.
    IpPort(SocketAddr),
    /// Discovery instance name.
    DiscName(String),
    /// Discovery repeat interval in seconds.
    DiscInterval(u32),
    /// JSON discovery description or result.
    DiscJson(String),
    /// JSON configuration pushed to a drone.
    ConfigJson(String),
    /// Key id of a secure identity.
    KeyId(String),
    /// Free text.
    Text(String),
}

impl Frame {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::Hostname(_) => FrameType::Hostname,
            Self::IpAddr(_) => FrameType::IpAddr,
            Self::IpPort(_) => FrameType::IpPort,
            Self::DiscName(_) => FrameType::DiscName,
            Self::DiscInterval(_) => FrameType::DiscInterval,
            Self::DiscJson(_) => FrameType::DiscJson,
            Self::ConfigJson(_) => FrameType::ConfigJson,
            Self::KeyId(_) => FrameType::KeyId,
            Self::Text(_) => FrameType::Text,
        }
    }

    /// Builds a concrete frame from a staged field value.
    ///
    /// Address frames accept an address or a string that parses as one;
    /// string frames accept any string; the interval frame needs an integer
    /// that fits in 32 bits. Everything else is a [`CodecError::FieldMismatch`].
    pub fn from_field(frame_type: FrameType, value: &FieldValue) -> Result<Self, CodecError> {
        let mismatch = || CodecError::FieldMismatch {
            frame_type,
            value: value.to_string(),
        };

        let frame = match (frame_type, value) {
            (FrameType::IpPort, FieldValue::Addr(addr)) => Self::IpPort(*addr),
            (FrameType::IpPort, FieldValue::Str(s)) => {
                Self::IpPort(s.parse().map_err(|_| mismatch())?)
            }
            (FrameType::IpAddr, FieldValue::Addr(addr)) => Self::IpAddr(addr.ip()),
            (FrameType::IpAddr, FieldValue::Str(s)) => {
                Self::IpAddr(s.parse().map_err(|_| mismatch())?)
            }
            (FrameType::DiscInterval, FieldValue::Int(n)) => {
                Self::DiscInterval(u32::try_from(*n).map_err(|_| mismatch())?)
            }
            (FrameType::Hostname, FieldValue::Str(s)) => Self::Hostname(s.clone()),
            (FrameType::DiscName, FieldValue::Str(s)) => Self::DiscName(s.clone()),
            (FrameType::DiscJson, FieldValue::Str(s)) => Self::DiscJson(s.clone()),
            (FrameType::ConfigJson, FieldValue::Str(s)) => Self::ConfigJson(s.clone()),
            (FrameType::KeyId, FieldValue::Str(s)) => Self::KeyId(s.clone()),
            (FrameType::Text, FieldValue::Str(s)) => Self::Text(s.clone()),
            _ => return Err(mismatch()),
        };
        Ok(frame)
    }
}

// ---------------------------------------------------------------------------
// Staged Field Values
// ---------------------------------------------------------------------------

/// An untyped field value staged on a network transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Str(String),
    Int(u64),
    Addr(SocketAddr),
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{:?}", s),
            Self::Int(n) => write!(f, "{}", n),
            Self::Addr(addr) => write!(f, "{}", addr),
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<u32> for FieldValue {
    fn from(n: u32) -> Self {
        Self::Int(u64::from(n))
    }
}

impl From<SocketAddr> for FieldValue {
    fn from(addr: SocketAddr) -> Self {
        Self::Addr(addr)
    }
}

// ---------------------------------------------------------------------------
// Frame Sets
// ---------------------------------------------------------------------------

/// One protocol message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSet {
    pub kind: FrameSetKind,
    pub frames: Vec<Frame>,
    /// Key id of the sender, present when the frame set arrived signed.
    pub sender_key_id: Option<String>,
}

impl FrameSet {
    pub fn new(kind: FrameSetKind) -> Self {
        Self {
            kind,
            frames: Vec::new(),
            sender_key_id: None,
        }
    }

    /// Appends a frame, builder style.
    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }

    /// Marks the frame set as signed by `key_id`, builder style.
    pub fn signed_by(mut self, key_id: &str) -> Self {
        self.sender_key_id = Some(key_id.to_string());
        self
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    /// First hostname frame, if any.
    pub fn hostname(&self) -> Option<&str> {
        self.frames.iter().find_map(|frame| match frame {
            Frame::Hostname(name) => Some(name.as_str()),
            _ => None,
        })
    }

    /// IP addresses named by IPADDR and IPPORT frames, in order.
    pub fn ip_addrs(&self) -> Vec<IpAddr> {
        self.frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::IpAddr(ip) => Some(*ip),
                Frame::IpPort(addr) => Some(addr.ip()),
                _ => None,
            })
            .collect()
    }

    /// All discovery JSON payloads, in order.
    pub fn discovery_payloads(&self) -> Vec<&str> {
        self.frames
            .iter()
            .filter_map(|frame| match frame {
                Frame::DiscJson(json) => Some(json.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Short single-line rendering for logs.
    pub fn summary(&self) -> String {
        let mut out = format!("{}[", self.kind);
        for (i, frame) in self.frames.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            out.push_str(&format!("{:?}", frame));
        }
        out.push(']');
        if out.len() > 160 {
            out.truncate(150);
            out.push_str("...");
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ipport_accepts_strings_and_addresses() {
        let addr: SocketAddr = "10.10.10.5:1984".parse().unwrap();
        assert_eq!(
            Frame::from_field(FrameType::IpPort, &FieldValue::Addr(addr)).unwrap(),
            Frame::IpPort(addr)
        );
        assert_eq!(
            Frame::from_field(FrameType::IpPort, &"10.10.10.5:1984".into()).unwrap(),
            Frame::IpPort(addr)
        );
    }

    #[test]
    fn unparsable_address_is_a_mismatch() {
        let err = Frame::from_field(FrameType::IpPort, &"not-an-address".into()).unwrap_err();
        assert!(matches!(
            err,
            CodecError::FieldMismatch {
                frame_type: FrameType::IpPort,
                ..
            }
        ));
    }

    #[test]
    fn interval_requires_integer() {
        assert_eq!(
            Frame::from_field(FrameType::DiscInterval, &FieldValue::Int(3600)).unwrap(),
            Frame::DiscInterval(3600)
        );
        assert!(Frame::from_field(FrameType::DiscInterval, &"3600".into()).is_err());
        assert!(Frame::from_field(FrameType::DiscInterval, &FieldValue::Int(u64::MAX)).is_err());
    }

    #[test]
    fn string_frames_reject_integers() {
        assert!(Frame::from_field(FrameType::DiscJson, &FieldValue::Int(1)).is_err());
        assert_eq!(
            Frame::from_field(FrameType::DiscName, &"os".into()).unwrap(),
            Frame::DiscName("os".into())
        );
    }

    #[test]
    fn frameset_accessors() {
        let addr: SocketAddr = "10.0.0.2:1984".parse().unwrap();
        let fs = FrameSet::new(FrameSetKind::HbDead)
            .with_frame(Frame::Hostname("alpha".into()))
            .with_frame(Frame::IpPort(addr))
            .with_frame(Frame::IpAddr("10.0.0.3".parse().unwrap()))
            .with_frame(Frame::DiscJson("{}".into()));

        assert_eq!(fs.hostname(), Some("alpha"));
        assert_eq!(
            fs.ip_addrs(),
            vec![addr.ip(), "10.0.0.3".parse::<IpAddr>().unwrap()]
        );
        assert_eq!(fs.discovery_payloads(), vec!["{}"]);
        assert!(fs.summary().starts_with("HBDEAD["));
    }
}
