//! The drone record.
//!
//! One [`Drone`] per monitored system, keyed by its designation (host
//! name). Drones are created on first contact and never deleted; a drone
//! that goes away is marked dead and keeps its history.

use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::storage::{GraphNode, NodeKind};

/// Liveness status of a drone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    #[default]
    Unknown,
    Up,
    Dead,
    Warn,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unknown => "unknown",
            Self::Up => "up",
            Self::Dead => "dead",
            Self::Warn => "warn",
        })
    }
}

// ---------------------------------------------------------------------------
// Capability Traits
// ---------------------------------------------------------------------------

/// Something with a liveness status.
pub trait HasStatus {
    fn status(&self) -> NodeStatus;

    fn reason(&self) -> &str;

    /// Records a status change and stamps its time.
    fn set_status(&mut self, status: NodeStatus, reason: &str);

    fn is_up(&self) -> bool {
        self.status() == NodeStatus::Up
    }
}

/// Something that carries discovery results, one JSON document per
/// discovery type.
pub trait HasDiscoveryAttributes {
    fn discovery(&self, discovertype: &str) -> Option<&str>;

    /// Stores `json` under `discovertype`. Returns `false` when the stored
    /// document was already identical.
    fn record_discovery(&mut self, discovertype: &str, json: &str) -> bool;

    fn discovery_types(&self) -> Vec<&str>;
}

// ---------------------------------------------------------------------------
// Drone
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Drone {
    pub designation: String,
    pub domain: String,
    pub status: NodeStatus,
    pub reason: String,
    /// Address the drone's nanoprobe listens on.
    pub addr: Option<SocketAddr>,
    /// Key id of the drone's secure identity.
    pub key_id: Option<String>,
    /// Service monitoring has been set up from discovery data.
    pub monitors_activated: bool,
    /// Milliseconds since the epoch of the last status change.
    pub status_time_ms: i64,
    discovery: BTreeMap<String, String>,
}

impl Drone {
    pub fn new(designation: &str, domain: &str) -> Self {
        Self {
            designation: designation.to_string(),
            domain: domain.to_string(),
            status: NodeStatus::Unknown,
            reason: "(initialization)".to_string(),
            addr: None,
            key_id: None,
            monitors_activated: false,
            status_time_ms: Utc::now().timestamp_millis(),
            discovery: BTreeMap::new(),
        }
    }
}

impl fmt::Display for Drone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Drone({})", self.designation)
    }
}

impl GraphNode for Drone {
    const KIND: NodeKind = NodeKind::Drone;

    fn node_key(&self) -> &str {
        &self.designation
    }
}

impl HasStatus for Drone {
    fn status(&self) -> NodeStatus {
        self.status
    }

    fn reason(&self) -> &str {
        &self.reason
    }

    fn set_status(&mut self, status: NodeStatus, reason: &str) {
        self.status = status;
        self.reason = reason.to_string();
        self.status_time_ms = Utc::now().timestamp_millis();
    }
}

impl HasDiscoveryAttributes for Drone {
    fn discovery(&self, discovertype: &str) -> Option<&str> {
        self.discovery.get(discovertype).map(String::as_str)
    }

    fn record_discovery(&mut self, discovertype: &str, json: &str) -> bool {
        if self.discovery.get(discovertype).map(String::as_str) == Some(json) {
            return false;
        }
        self.discovery
            .insert(discovertype.to_string(), json.to_string());
        true
    }

    fn discovery_types(&self) -> Vec<&str> {
        self.discovery.keys().map(String::as_str).collect()
    }
}
