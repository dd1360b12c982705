//! # CMA Configuration & Constants
//!
//! Every magic number the CMA depends on lives here, next to the runtime
//! configuration struct that operators can override from a JSON file.
//!
//! Constants that describe the wire protocol (frame-set kind numbers, the
//! default port) are shared with the nanoprobes and must not drift. The
//! values in [`CmaConfig`] are local policy and can change between restarts.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Network Parameters
// ---------------------------------------------------------------------------

/// Default UDP port the CMA listens on. Nanoprobes are built with the same
/// default, so changing it means reconfiguring the whole fleet.
pub const DEFAULT_CMA_PORT: u16 = 1984;

/// Default listening address.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:1984";

/// Default Prometheus metrics port.
pub const DEFAULT_METRICS_PORT: u16 = 1985;

/// Largest datagram we will try to read.
pub const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

// ---------------------------------------------------------------------------
// Scheduling
// ---------------------------------------------------------------------------

/// Number of priority levels in the packet scheduler. Level 0 is the most
/// urgent, level `PRIORITY_LEVELS - 1` the least.
pub const PRIORITY_LEVELS: usize = 4;

/// Priority given to any frame-set kind that is not in the priority table.
pub const DEFAULT_PRIORITY: u8 = (PRIORITY_LEVELS - 1) as u8;

// ---------------------------------------------------------------------------
// Rings
// ---------------------------------------------------------------------------

/// Name of the global ring every drone joins.
pub const THE_ONE_RING: &str = "The_One_Ring";

/// Relationship type prefix linking a ring to each of its members.
pub const RING_MEMBER_PREFIX: &str = "RingMember_";

/// Relationship type prefix for the directed "next" links forming the cycle.
pub const RING_NEXT_PREFIX: &str = "RingNext_";

// ---------------------------------------------------------------------------
// Status Reasons
// ---------------------------------------------------------------------------

/// Reason recorded when a drone announces itself.
pub const REASON_STARTUP: &str = "STARTUP packet";

/// Reason recorded when a peer reports a drone's heartbeats stopped.
pub const REASON_HBDEAD: &str = "HBDEAD packet";

/// Reason recorded when a drone reports its own orderly shutdown. The drone
/// is already tearing down its connection, so we leave it alone.
pub const REASON_HBSHUTDOWN: &str = "HBSHUTDOWN packet";

/// Domain assigned to drones when none is configured.
pub const DEFAULT_DOMAIN: &str = "global";

/// Discovery type whose arrival means monitoring has been activated for a
/// drone.
pub const SERVICE_DISCOVERY_TYPE: &str = "tcpdiscovery";

// ---------------------------------------------------------------------------
// Runtime Configuration
// ---------------------------------------------------------------------------

/// Kind of heartbeat ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RingKind {
    /// All drones attached to one switch.
    Switch,
    /// All drones on one subnet.
    Subnet,
    /// Every drone in the collective.
    Global,
}

/// A ring the CMA maintains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RingConfig {
    pub name: String,
    pub kind: RingKind,
}

/// A discovery agent every drone is asked to run when it comes up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryRequest {
    /// Unique discovery instance name.
    pub instance: String,
    /// Repeat interval in seconds. Zero means "run once".
    #[serde(default)]
    pub interval: u32,
    /// JSON describing the discovery. When absent the instance name doubles
    /// as the discovery type.
    #[serde(default)]
    pub json: Option<String>,
}

impl DiscoveryRequest {
    pub fn new(instance: &str, interval: u32) -> Self {
        Self {
            instance: instance.to_string(),
            interval,
            json: None,
        }
    }

    /// JSON payload sent in the DISCJSON frame. A bare type name is wrapped
    /// as `{"type":"<name>","parameters":{}}`.
    pub fn json_payload(&self) -> String {
        let raw = self.json.as_deref().unwrap_or(&self.instance);
        if raw.starts_with('{') {
            raw.to_string()
        } else {
            serde_json::json!({ "type": raw, "parameters": {} }).to_string()
        }
    }
}

/// Heartbeat timing pushed to every drone in its SETCONFIG packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Seconds between heartbeats.
    pub repeat: u32,
    /// Seconds of silence before a late-heartbeat warning.
    pub warn: u32,
    /// Seconds of silence before a peer is declared dead.
    pub timeout: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            repeat: 1,
            warn: 5,
            timeout: 30,
        }
    }
}

/// Runtime configuration of the CMA.
///
/// Loaded from JSON by the node binary; every field has a default so a
/// partial file is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CmaConfig {
    /// Refuse to talk to drones whose secure identity we do not know.
    pub encryption_required: bool,
    /// Domain recorded on newly created drones.
    pub domain: String,
    /// Rings every drone joins on STARTUP.
    pub rings: Vec<RingConfig>,
    /// Discovery requested from every drone on STARTUP.
    pub initial_discovery: Vec<DiscoveryRequest>,
    /// Heartbeat timings sent in SETCONFIG.
    pub heartbeats: HeartbeatConfig,
}

impl Default for CmaConfig {
    fn default() -> Self {
        Self {
            encryption_required: false,
            domain: DEFAULT_DOMAIN.to_string(),
            rings: vec![RingConfig {
                name: THE_ONE_RING.to_string(),
                kind: RingKind::Global,
            }],
            initial_discovery: vec![
                DiscoveryRequest::new("os", 0),
                DiscoveryRequest::new("cpu", 36_000),
                DiscoveryRequest::new("netconfig", 3_600),
                DiscoveryRequest::new("tcpdiscovery", 3_555),
                DiscoveryRequest::new("arpcache", 45),
            ],
            heartbeats: HeartbeatConfig::default(),
        }
    }
}

impl CmaConfig {
    /// Parses a configuration from JSON text.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// JSON sent to a drone in its SETCONFIG packet.
    pub fn drone_config_json(&self) -> String {
        serde_json::json!({
            "hbtime": self.heartbeats.repeat,
            "warntime": self.heartbeats.warn,
            "deadtime": self.heartbeats.timeout,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_one_global_ring() {
        let config = CmaConfig::default();
        assert_eq!(config.rings.len(), 1);
        assert_eq!(config.rings[0].name, THE_ONE_RING);
        assert_eq!(config.rings[0].kind, RingKind::Global);
        assert!(!config.encryption_required);
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let config = CmaConfig::from_json(r#"{"encryption_required": true}"#).unwrap();
        assert!(config.encryption_required);
        assert_eq!(config.heartbeats, HeartbeatConfig::default());
        assert_eq!(config.domain, DEFAULT_DOMAIN);
    }

    #[test]
    fn test_ring_kind_parses_lowercase() {
        let config = CmaConfig::from_json(
            r#"{"rings": [{"name": "sw1", "kind": "switch"}, {"name": "net", "kind": "subnet"}]}"#,
        )
        .unwrap();
        assert_eq!(config.rings[0].kind, RingKind::Switch);
        assert_eq!(config.rings[1].kind, RingKind::Subnet);
    }

    #[test]
    fn test_discovery_json_wraps_bare_names() {
        let req = DiscoveryRequest::new("cpu", 0);
        let value: serde_json::Value = serde_json::from_str(&req.json_payload()).unwrap();
        assert_eq!(value["type"], "cpu");
        assert!(value["parameters"].as_object().unwrap().is_empty());

        let custom = DiscoveryRequest {
            instance: "pkgs".into(),
            interval: 0,
            json: Some(r#"{"type":"packages"}"#.into()),
        };
        assert_eq!(custom.json_payload(), r#"{"type":"packages"}"#);
    }

    #[test]
    fn test_drone_config_json_carries_heartbeat_timing() {
        let value: serde_json::Value =
            serde_json::from_str(&CmaConfig::default().drone_config_json()).unwrap();
        assert_eq!(value["hbtime"], 1);
        assert_eq!(value["deadtime"], 30);
    }

    #[test]
    fn test_priority_constants_sanity() {
        assert_eq!(PRIORITY_LEVELS, 4);
        assert_eq!(DEFAULT_PRIORITY, 3);
    }
}
