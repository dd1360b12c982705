//! # Heartbeat Ring
//!
//! A ring is a directed cycle over its member drones. Each drone exchanges
//! heartbeats with its predecessor and its successor, so every drone is
//! watched by two peers and no single process carries the fan-in of the
//! whole collective.
//!
//! ## Graph Layout
//!
//! ```text
//!   Ring ──RingMember_<ring>──▶ Drone        (one per member)
//!   Drone ──RingNext_<ring>──▶ Drone         (one out, one in, per member)
//! ```
//!
//! ## Insertion Point
//!
//! New members are spliced in between the two drones of the insertion
//! point `(ip1, ip2)`, where `ip1 → ip2` is an existing next-link. After a
//! splice the insertion point moves forward, so consecutive joins spread
//! around the ring instead of piling up next to one member. The insertion
//! point is transient; on restart it is rebuilt from the stored links.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::heartbeat::HeartbeatCommands;
use super::RingError;
use crate::config::{RingKind, RING_MEMBER_PREFIX, RING_NEXT_PREFIX};
use crate::storage::{GraphKey, GraphNode, GraphStore, NodeKind};

// ---------------------------------------------------------------------------
// Persisted Ring
// ---------------------------------------------------------------------------

/// The persisted part of a ring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ring {
    pub name: String,
    pub kind: RingKind,
}

impl GraphNode for Ring {
    const KIND: NodeKind = NodeKind::Ring;

    fn node_key(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// RingTopology
// ---------------------------------------------------------------------------

/// A running ring: its persisted record plus the transient insertion point.
///
/// Not internally synchronised. All mutation happens on the dispatch path,
/// one message at a time.
#[derive(Debug, Clone)]
pub struct RingTopology {
    ring: Ring,
    key: GraphKey,
    member_rel: String,
    next_rel: String,
    insertion: Option<(String, Option<String>)>,
}

impl RingTopology {
    /// Loads ring `name` from the store, creating it if needed, and rebuilds
    /// the insertion point from the stored links.
    pub fn open(store: &mut GraphStore, name: &str, kind: RingKind) -> Result<Self, RingError> {
        let (ring, created) = store.load_or_create(name, || Ring {
            name: name.to_string(),
            kind,
        })?;
        if !created && ring.kind != kind {
            warn!(ring = name, stored = ?ring.kind, configured = ?kind, "ring kind changed; keeping stored kind");
        }

        let mut topology = Self {
            key: GraphKey::ring(name),
            member_rel: format!("{RING_MEMBER_PREFIX}{name}"),
            next_rel: format!("{RING_NEXT_PREFIX}{name}"),
            ring,
            insertion: None,
        };
        topology.restore_insertion_point(store);
        if !created {
            debug!(ring = name, members = topology.size(store), "ring restored");
        }
        Ok(topology)
    }

    pub fn name(&self) -> &str {
        &self.ring.name
    }

    pub fn kind(&self) -> RingKind {
        self.ring.kind
    }

    /// Relationship type of this ring's membership links.
    pub fn member_rel(&self) -> &str {
        &self.member_rel
    }

    /// Relationship type of this ring's next-links.
    pub fn next_rel(&self) -> &str {
        &self.next_rel
    }

    pub fn insertion_point(&self) -> Option<(&str, Option<&str>)> {
        self.insertion
            .as_ref()
            .map(|(ip1, ip2)| (ip1.as_str(), ip2.as_deref()))
    }

    // -- Queries ------------------------------------------------------------

    /// Members in key order.
    pub fn members(&self, store: &GraphStore) -> Vec<String> {
        store
            .load_related(&self.key, &self.member_rel)
            .into_iter()
            .map(|k| k.key)
            .collect()
    }

    pub fn size(&self, store: &GraphStore) -> usize {
        store.load_related(&self.key, &self.member_rel).len()
    }

    pub fn is_member(&self, store: &GraphStore, designation: &str) -> bool {
        store.is_related(&self.key, &self.member_rel, &GraphKey::drone(designation))
    }

    /// Members in next-link order, starting from the insertion point.
    /// Stops early if the chain is broken or loops back before `size` hops.
    pub fn members_in_ring_order(&self, store: &GraphStore) -> Vec<String> {
        let size = self.size(store);
        let start = match &self.insertion {
            Some((ip1, _)) => ip1.clone(),
            None => match self.members(store).into_iter().next() {
                Some(first) => first,
                None => return Vec::new(),
            },
        };

        let mut order = Vec::with_capacity(size);
        let mut current = Some(start.clone());
        while let Some(node) = current {
            if order.len() == size || (!order.is_empty() && node == start) {
                break;
            }
            current = self.successor(store, &node);
            order.push(node);
        }
        order
    }

    /// Whether `a` and `b` are adjacent in either direction.
    pub fn are_partners(&self, store: &GraphStore, a: &str, b: &str) -> bool {
        let (ka, kb) = (GraphKey::drone(a), GraphKey::drone(b));
        store.is_related(&ka, &self.next_rel, &kb) || store.is_related(&kb, &self.next_rel, &ka)
    }

    pub fn successor(&self, store: &GraphStore, designation: &str) -> Option<String> {
        store
            .load_related(&GraphKey::drone(designation), &self.next_rel)
            .into_iter()
            .next()
            .map(|k| k.key)
    }

    pub fn predecessor(&self, store: &GraphStore, designation: &str) -> Option<String> {
        store
            .load_in_related(&GraphKey::drone(designation), &self.next_rel)
            .into_iter()
            .next()
            .map(|k| k.key)
    }

    // -- Mutation -----------------------------------------------------------

    /// Adds `designation` to the ring, splicing it in at the insertion point
    /// and issuing the heartbeat commands for the changed partnerships.
    pub fn join(
        &mut self,
        store: &mut GraphStore,
        hb: &mut dyn HeartbeatCommands,
        designation: &str,
    ) -> Result<(), RingError> {
        if self.is_member(store, designation) {
            warn!(ring = %self.ring.name, designation, "already a ring member; rejoining");
            self.leave(store, hb, designation)?;
        }

        let node = GraphKey::drone(designation);
        let ring_name = self.ring.name.clone();
        let size = self.size(store);

        match size {
            0 => {
                store.relate(&self.key, &self.member_rel, &node);
                self.insertion = Some((designation.to_string(), None));
            }
            1 => {
                let partner = self.sole_member(store)?;
                let pk = GraphKey::drone(&partner);
                store.relate(&self.key, &self.member_rel, &node);
                store.relate(&node, &self.next_rel, &pk);
                store.relate(&pk, &self.next_rel, &node);
                hb.start_heartbeat(&ring_name, designation, &[partner.as_str()])?;
                hb.start_heartbeat(&ring_name, &partner, &[designation])?;
                self.insertion = Some((designation.to_string(), Some(partner)));
            }
            _ => {
                let (mut p1, mut p2) = self.insertion_pair(store)?;
                if size >= 3 {
                    if let Some(next) = self.successor(store, &p2) {
                        if next != p1 && next != p2 && p1 != p2 {
                            p1 = std::mem::replace(&mut p2, next);
                        }
                    }
                }
                let (k1, k2) = (GraphKey::drone(&p1), GraphKey::drone(&p2));

                store.separate(&k1, &self.next_rel, &k2);
                if !self.are_partners(store, &p1, &p2) {
                    hb.stop_heartbeat(&ring_name, &p1, &[p2.as_str()])?;
                    hb.stop_heartbeat(&ring_name, &p2, &[p1.as_str()])?;
                }

                store.relate(&self.key, &self.member_rel, &node);
                store.relate(&k1, &self.next_rel, &node);
                store.relate(&node, &self.next_rel, &k2);
                hb.start_heartbeat(&ring_name, designation, &[p1.as_str(), p2.as_str()])?;
                hb.start_heartbeat(&ring_name, &p1, &[designation])?;
                hb.start_heartbeat(&ring_name, &p2, &[designation])?;
                self.insertion = Some((designation.to_string(), Some(p2)));
            }
        }

        info!(ring = %ring_name, designation, size = size + 1, "joined ring");
        Ok(())
    }

    /// Removes `designation` from the ring and closes the gap it leaves.
    /// Leaving a ring one is not a member of does nothing.
    pub fn leave(
        &mut self,
        store: &mut GraphStore,
        hb: &mut dyn HeartbeatCommands,
        designation: &str,
    ) -> Result<(), RingError> {
        if !self.is_member(store, designation) {
            debug!(ring = %self.ring.name, designation, "not a ring member; nothing to leave");
            return Ok(());
        }

        let node = GraphKey::drone(designation);
        let ring_name = self.ring.name.clone();
        let size = self.size(store);
        let pred = self.predecessor(store, designation);
        let succ = self.successor(store, designation);

        store.separate(&self.key, &self.member_rel, &node);

        match (size, pred, succ) {
            (1, _, _) => {
                self.insertion = None;
            }
            (_, Some(pred), Some(succ)) if pred == succ => {
                let pk = GraphKey::drone(&pred);
                store.separate(&node, &self.next_rel, &pk);
                store.separate(&pk, &self.next_rel, &node);
                hb.stop_heartbeat(&ring_name, designation, &[pred.as_str()])?;
                hb.stop_heartbeat(&ring_name, &pred, &[designation])?;
                self.insertion = Some((pred, None));
            }
            (_, Some(pred), Some(succ)) => {
                let (pk, sk) = (GraphKey::drone(&pred), GraphKey::drone(&succ));
                store.separate(&pk, &self.next_rel, &node);
                store.separate(&node, &self.next_rel, &sk);
                store.relate(&pk, &self.next_rel, &sk);
                hb.stop_heartbeat(&ring_name, &pred, &[designation])?;
                hb.stop_heartbeat(&ring_name, &succ, &[designation])?;
                hb.stop_heartbeat(&ring_name, designation, &[pred.as_str(), succ.as_str()])?;
                hb.start_heartbeat(&ring_name, &pred, &[succ.as_str()])?;
                hb.start_heartbeat(&ring_name, &succ, &[pred.as_str()])?;
                self.insertion = Some((pred, Some(succ)));
            }
            _ => {
                return Err(RingError::Audit {
                    ring: ring_name,
                    detail: format!("member {designation} has no next-link neighbours"),
                });
            }
        }

        info!(ring = %ring_name, designation, size = size - 1, "left ring");
        Ok(())
    }

    // -- Audit --------------------------------------------------------------

    /// Checks every structural invariant of the ring.
    ///
    /// `is_up` reports whether a member's status is up. Meant for tests and
    /// debugging; a failure means the ring is corrupt.
    pub fn audit(&self, store: &GraphStore, is_up: &dyn Fn(&str) -> bool) -> Result<(), RingError> {
        let fail = |detail: String| RingError::Audit {
            ring: self.ring.name.clone(),
            detail,
        };
        let members = self.members(store);
        let size = members.len();

        for member in &members {
            let mk = GraphKey::drone(member);
            let memberships = store.load_in_related(&mk, &self.member_rel);
            if memberships != vec![self.key.clone()] {
                return Err(fail(format!(
                    "{member} has {} membership links",
                    memberships.len()
                )));
            }
            let outs = store.load_related(&mk, &self.next_rel).len();
            let ins = store.load_in_related(&mk, &self.next_rel).len();
            let expected = usize::from(size >= 2);
            if outs != expected || ins != expected {
                return Err(fail(format!(
                    "{member} has {outs} outgoing and {ins} incoming next-links in a ring of {size}"
                )));
            }
            if size >= 2 && !is_up(member) {
                return Err(fail(format!("{member} is a member but not up")));
            }
        }

        match (size, &self.insertion) {
            (0, None) => {}
            (0, Some(_)) => return Err(fail("empty ring has an insertion point".into())),
            (_, None) => return Err(fail("non-empty ring has no insertion point".into())),
            (1, Some((ip1, _))) if ip1 != &members[0] => {
                return Err(fail(format!("insertion point {ip1} is not the sole member")))
            }
            _ => {}
        }

        let ordered = self.members_in_ring_order(store);
        let ordered_set: BTreeSet<&String> = ordered.iter().collect();
        let member_set: BTreeSet<&String> = members.iter().collect();
        if ordered.len() != size || ordered_set != member_set {
            return Err(fail(format!(
                "ring order visits {} of {size} members",
                ordered_set.len()
            )));
        }
        Ok(())
    }

    // -- Internals ----------------------------------------------------------

    fn sole_member(&self, store: &GraphStore) -> Result<String, RingError> {
        if let Some((ip1, _)) = &self.insertion {
            if self.is_member(store, ip1) {
                return Ok(ip1.clone());
            }
        }
        self.members(store)
            .into_iter()
            .next()
            .ok_or_else(|| RingError::Audit {
                ring: self.ring.name.clone(),
                detail: "expected one member, found none".into(),
            })
    }

    /// The current insertion pair, repaired from the stored links if the
    /// cached one no longer names an existing next-link.
    fn insertion_pair(&self, store: &GraphStore) -> Result<(String, String), RingError> {
        if let Some((ip1, Some(ip2))) = &self.insertion {
            if store.is_related(&GraphKey::drone(ip1), &self.next_rel, &GraphKey::drone(ip2)) {
                return Ok((ip1.clone(), ip2.clone()));
            }
        }
        for member in self.members(store) {
            if let Some(next) = self.successor(store, &member) {
                return Ok((member, next));
            }
        }
        Err(RingError::Audit {
            ring: self.ring.name.clone(),
            detail: "no next-link to insert at".into(),
        })
    }

    fn restore_insertion_point(&mut self, store: &GraphStore) {
        self.insertion = self.members(store).into_iter().next().map(|first| {
            let next = self.successor(store, &first);
            (first, next)
        });
    }
}
