//! # NodeRegistry: Drone Liveness State Machine
//!
//! ```text
//!   unknown ──STARTUP──▶ up ──HBDEAD/HBSHUTDOWN──▶ dead ──STARTUP──▶ up
//!                         └──────────warn──────────▶ warn ──STARTUP──▶ up
//! ```
//!
//! The registry owns the drone cache, the IP index used to resolve death
//! reports, every ring, and the event bus. Rings are joined on behalf of a
//! drone when it comes up and left when it goes down.
//!
//! The drone cache mirrors the graph store's working state. After a store
//! abort call [`NodeRegistry::reload`] to bring it back in line.

use std::collections::{BTreeMap, HashMap};
use std::net::{IpAddr, SocketAddr};

use tracing::{debug, info, warn};

use super::drone::{Drone, HasDiscoveryAttributes, HasStatus, NodeStatus};
use super::events::{EventBus, EventKind, NodeEvent};
use crate::codec::{FieldValue, FrameSetKind, FrameType};
use crate::config::{
    CmaConfig, REASON_HBSHUTDOWN, REASON_STARTUP, RING_MEMBER_PREFIX, SERVICE_DISCOVERY_TYPE,
};
use crate::error::CmaResult;
use crate::storage::{GraphKey, GraphStore};
use crate::topology::{DroneHeartbeats, Ring, RingTopology};
use crate::transaction::NetworkTransaction;
use crate::transport::IdentityTable;

// ---------------------------------------------------------------------------
// Discovery Payloads
// ---------------------------------------------------------------------------

/// The routing fields of a JSON discovery document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryPayload {
    pub discovertype: String,
    pub host: Option<String>,
}

impl DiscoveryPayload {
    /// Extracts `discovertype` and `host`. Documents without a
    /// `discovertype` or without `data` are not discovery results.
    pub fn parse(json: &str) -> Option<Self> {
        let value: serde_json::Value = serde_json::from_str(json).ok()?;
        let discovertype = value.get("discovertype")?.as_str()?.to_string();
        value.get("data")?;
        let host = value
            .get("host")
            .and_then(|h| h.as_str())
            .map(str::to_string);
        Some(Self { discovertype, host })
    }
}

// ---------------------------------------------------------------------------
// NodeRegistry
// ---------------------------------------------------------------------------

pub struct NodeRegistry {
    drones: HashMap<String, Drone>,
    by_ip: HashMap<IpAddr, String>,
    rings: BTreeMap<String, RingTopology>,
    /// Rings every drone joins on STARTUP, in configuration order.
    startup_rings: Vec<String>,
    events: EventBus,
}

impl NodeRegistry {
    /// Builds the registry from the store: every persisted drone and ring,
    /// plus any configured ring not yet in the store.
    pub fn load(store: &mut GraphStore, config: &CmaConfig) -> CmaResult<Self> {
        let mut registry = Self {
            drones: HashMap::new(),
            by_ip: HashMap::new(),
            rings: BTreeMap::new(),
            startup_rings: Vec::new(),
            events: EventBus::new(),
        };

        for ring_cfg in &config.rings {
            let ring = RingTopology::open(store, &ring_cfg.name, ring_cfg.kind)?;
            registry.rings.insert(ring_cfg.name.clone(), ring);
            registry.startup_rings.push(ring_cfg.name.clone());
        }
        registry.reload(store)?;

        info!(
            drones = registry.drones.len(),
            up = registry.up_count(),
            rings = registry.rings.len(),
            "registry loaded"
        );
        Ok(registry)
    }

    /// Rebuilds the drone cache, IP index and ring insertion points from the
    /// store's current state.
    pub fn reload(&mut self, store: &mut GraphStore) -> CmaResult<()> {
        self.drones.clear();
        self.by_ip.clear();
        let mut drones = store.load_all::<Drone>()?;
        // Oldest transition first: the latest drone to claim an IP owns it.
        drones.sort_by_key(|d| d.status_time_ms);
        for drone in drones {
            if let Some(addr) = drone.addr {
                self.by_ip
                    .insert(addr.ip().to_canonical(), drone.designation.clone());
            }
            self.drones.insert(drone.designation.clone(), drone);
        }

        for stored in store.load_all::<Ring>()? {
            let ring = RingTopology::open(store, &stored.name, stored.kind)?;
            self.rings.insert(stored.name, ring);
        }
        Ok(())
    }

    /// Re-associates every stored key id with its drone's last address, so
    /// ring partners stay addressable when encryption is required. Returns
    /// the number of associations made.
    pub fn restore_identities(&self, identities: &IdentityTable) -> usize {
        let mut drones: Vec<&Drone> = self.drones.values().collect();
        drones.sort_by_key(|d| d.status_time_ms);
        let mut restored = 0;
        for drone in drones {
            if let (Some(addr), Some(key_id)) = (drone.addr, drone.key_id.as_deref()) {
                identities.associate(addr, key_id);
                restored += 1;
            }
        }
        debug!(restored, known = identities.len(), "secure identities restored");
        restored
    }

    // -- Lookups ------------------------------------------------------------

    pub fn get(&self, designation: &str) -> Option<&Drone> {
        self.drones.get(designation)
    }

    /// The drone whose address has IP `ip`, ignoring ports.
    pub fn find_by_ip(&self, ip: IpAddr) -> Option<&Drone> {
        self.by_ip
            .get(&ip.to_canonical())
            .and_then(|name| self.drones.get(name))
    }

    pub fn drones(&self) -> impl Iterator<Item = &Drone> {
        self.drones.values()
    }

    pub fn drone_count(&self) -> usize {
        self.drones.len()
    }

    pub fn up_count(&self) -> usize {
        self.drones.values().filter(|d| d.is_up()).count()
    }

    pub fn ring(&self, name: &str) -> Option<&RingTopology> {
        self.rings.get(name)
    }

    pub fn rings(&self) -> impl Iterator<Item = &RingTopology> {
        self.rings.values()
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut EventBus {
        &mut self.events
    }

    /// Audits every ring against the current drone statuses.
    pub fn audit_rings(&self, store: &GraphStore) -> CmaResult<()> {
        let is_up = |name: &str| self.drones.get(name).is_some_and(|d| d.is_up());
        for ring in self.rings.values() {
            ring.audit(store, &is_up)?;
        }
        Ok(())
    }

    // -- Transitions --------------------------------------------------------

    /// Handles a drone announcing itself: marks it up, pushes its
    /// configuration, joins it to every startup ring and requests the
    /// initial discovery agents.
    pub fn admit(
        &mut self,
        store: &mut GraphStore,
        txn: &mut NetworkTransaction,
        config: &CmaConfig,
        designation: &str,
        addr: SocketAddr,
        key_id: Option<&str>,
    ) -> CmaResult<()> {
        let (mut drone, created) =
            store.load_or_create(designation, || Drone::new(designation, &config.domain))?;

        if let Some(old) = drone.addr.filter(|old| old.ip() != addr.ip()) {
            // Another drone may have taken the old IP since.
            let old_ip = old.ip().to_canonical();
            if self.by_ip.get(&old_ip).map(String::as_str) == Some(designation) {
                self.by_ip.remove(&old_ip);
            }
        }
        drone.addr = Some(addr);
        if key_id.is_some() {
            drone.key_id = key_id.map(str::to_string);
        }
        drone.set_status(NodeStatus::Up, REASON_STARTUP);
        store.save(&drone)?;
        self.by_ip
            .insert(addr.ip().to_canonical(), designation.to_string());
        self.drones.insert(designation.to_string(), drone);

        if created {
            info!(designation, from = %addr, "new drone");
            self.events.emit(NodeEvent::new(
                EventKind::Create,
                designation,
                NodeStatus::Up,
                REASON_STARTUP,
            ));
        }

        txn.add_packet(
            addr,
            FrameSetKind::SetConfig,
            vec![(FrameType::ConfigJson, config.drone_config_json().into())],
        )?;

        for name in &self.startup_rings {
            if let Some(ring) = self.rings.get_mut(name) {
                let mut hb = DroneHeartbeats::new(&self.drones, txn);
                ring.join(store, &mut hb, designation)?;
            }
        }

        for request in &config.initial_discovery {
            let mut fields = vec![(FrameType::DiscName, FieldValue::from(request.instance.as_str()))];
            if request.interval > 0 {
                fields.push((FrameType::DiscInterval, request.interval.into()));
            }
            fields.push((FrameType::DiscJson, request.json_payload().into()));
            txn.add_packet(addr, FrameSetKind::DoDiscover, fields)?;
        }

        info!(designation, from = %addr, "drone up");
        self.events.emit(NodeEvent::new(
            EventKind::Up,
            designation,
            NodeStatus::Up,
            REASON_STARTUP,
        ));
        Ok(())
    }

    /// Handles a report that `designation` died or shut down.
    ///
    /// A report that repeats the drone's current status and reason is
    /// absorbed and returns `false`. Otherwise the drone leaves every ring,
    /// its connection is closed (unless it shut down by itself) and a down
    /// or warn event is emitted.
    pub fn death_report(
        &mut self,
        store: &mut GraphStore,
        txn: &mut NetworkTransaction,
        designation: &str,
        status: NodeStatus,
        reason: &str,
        from: SocketAddr,
    ) -> CmaResult<bool> {
        let Some(current) = self.drones.get(designation) else {
            warn!(designation, from = %from, reason, "death report for unknown drone");
            return Ok(false);
        };
        if current.status == status && current.reason == reason {
            debug!(designation, %status, reason, "duplicate status report ignored");
            return Ok(false);
        }

        if reason != REASON_HBSHUTDOWN {
            info!(designation, %status, from = %from, reason, "drone reported down");
        }

        let mut drone = current.clone();
        drone.set_status(status, reason);
        drone.monitors_activated = false;
        store.save(&drone)?;
        let addr = drone.addr;
        self.drones.insert(designation.to_string(), drone);

        let memberships =
            store.incoming_with_prefix(&GraphKey::drone(designation), RING_MEMBER_PREFIX);
        for (_, ring_key) in memberships {
            let Some(ring) = self.rings.get_mut(&ring_key.key) else {
                warn!(designation, ring = %ring_key.key, "member of a ring that is not loaded");
                continue;
            };
            let mut hb = DroneHeartbeats::new(&self.drones, txn);
            ring.leave(store, &mut hb, designation)?;
        }

        if reason != REASON_HBSHUTDOWN {
            if let Some(addr) = addr {
                txn.close_connection(addr);
            }
        }

        let kind = match status {
            NodeStatus::Warn => EventKind::Warn,
            NodeStatus::Up => EventKind::Up,
            NodeStatus::Dead | NodeStatus::Unknown => EventKind::Down,
        };
        self.events
            .emit(NodeEvent::new(kind, designation, status, reason));
        Ok(true)
    }

    /// Stores a discovery document on `designation`, creating the drone if
    /// this is the first we hear of it. Returns `true` when the document is
    /// new or changed.
    pub fn record_discovery(
        &mut self,
        store: &mut GraphStore,
        domain: &str,
        designation: &str,
        discovertype: &str,
        json: &str,
    ) -> CmaResult<bool> {
        let (mut drone, created) = match self.drones.get(designation) {
            Some(drone) => (drone.clone(), false),
            None => store.load_or_create(designation, || Drone::new(designation, domain))?,
        };
        if created {
            info!(designation, discovertype, "drone first seen through discovery");
            self.events.emit(NodeEvent::new(
                EventKind::Create,
                designation,
                drone.status,
                &drone.reason,
            ));
        }

        if !drone.record_discovery(discovertype, json) {
            debug!(designation, discovertype, "discovery unchanged");
            self.drones.insert(designation.to_string(), drone);
            return Ok(false);
        }

        if discovertype == SERVICE_DISCOVERY_TYPE && drone.is_up() && !drone.monitors_activated {
            drone.monitors_activated = true;
            info!(designation, "service monitoring activated");
        }

        store.save(&drone)?;
        debug!(designation, discovertype, bytes = json.len(), "discovery recorded");
        self.events.emit(
            NodeEvent::new(EventKind::Update, designation, drone.status, &drone.reason)
                .with_detail(discovertype),
        );
        self.drones.insert(designation.to_string(), drone);
        Ok(true)
    }
}
