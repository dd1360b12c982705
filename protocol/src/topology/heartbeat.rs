//! Heartbeat partnership commands.
//!
//! Ring maintenance decides who should heartbeat whom; this module turns
//! those decisions into SENDEXPECTHB / STOPSENDEXPECTHB packets staged on
//! the current network transaction.

use std::collections::HashMap;

use tracing::debug;

use super::RingError;
use crate::codec::{FieldValue, FrameSetKind, FrameType};
use crate::registry::Drone;
use crate::transaction::NetworkTransaction;

/// Receiver of ring partnership changes.
pub trait HeartbeatCommands {
    /// `node` should start exchanging heartbeats with every `partner`.
    fn start_heartbeat(&mut self, ring: &str, node: &str, partners: &[&str])
        -> Result<(), RingError>;

    /// `node` should stop exchanging heartbeats with every `partner`.
    fn stop_heartbeat(&mut self, ring: &str, node: &str, partners: &[&str])
        -> Result<(), RingError>;
}

/// Stages heartbeat commands for drones known to the registry.
pub struct DroneHeartbeats<'a> {
    pub drones: &'a HashMap<String, Drone>,
    pub txn: &'a mut NetworkTransaction,
}

impl<'a> DroneHeartbeats<'a> {
    pub fn new(drones: &'a HashMap<String, Drone>, txn: &'a mut NetworkTransaction) -> Self {
        Self { drones, txn }
    }

    fn stage(
        &mut self,
        action: FrameSetKind,
        ring: &str,
        node: &str,
        partners: &[&str],
    ) -> Result<(), RingError> {
        let dest = self.address_of(node)?;
        let mut fields = Vec::with_capacity(partners.len());
        for partner in partners {
            let addr = self.address_of(partner)?;
            fields.push((FrameType::IpPort, FieldValue::Addr(addr)));
        }
        debug!(ring, designation = node, ?partners, action = %action, "heartbeat command");
        self.txn.add_packet(dest, action, fields)?;
        Ok(())
    }

    fn address_of(&self, designation: &str) -> Result<std::net::SocketAddr, RingError> {
        self.drones
            .get(designation)
            .and_then(|drone| drone.addr)
            .ok_or_else(|| RingError::NoAddress(designation.to_string()))
    }
}

impl HeartbeatCommands for DroneHeartbeats<'_> {
    fn start_heartbeat(
        &mut self,
        ring: &str,
        node: &str,
        partners: &[&str],
    ) -> Result<(), RingError> {
        self.stage(FrameSetKind::SendExpectHb, ring, node, partners)
    }

    fn stop_heartbeat(
        &mut self,
        ring: &str,
        node: &str,
        partners: &[&str],
    ) -> Result<(), RingError> {
        self.stage(FrameSetKind::StopSendExpectHb, ring, node, partners)
    }
}

/// Records commands instead of sending them.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Command {
        Start(String, Vec<String>),
        Stop(String, Vec<String>),
    }

    #[derive(Debug, Default)]
    pub struct RecordingHeartbeats {
        pub commands: Vec<Command>,
    }

    impl RecordingHeartbeats {
        pub fn starts(&self) -> Vec<(String, Vec<String>)> {
            self.commands
                .iter()
                .filter_map(|c| match c {
                    Command::Start(n, p) => Some((n.clone(), p.clone())),
                    Command::Stop(..) => None,
                })
                .collect()
        }

        pub fn stops(&self) -> Vec<(String, Vec<String>)> {
            self.commands
                .iter()
                .filter_map(|c| match c {
                    Command::Stop(n, p) => Some((n.clone(), p.clone())),
                    Command::Start(..) => None,
                })
                .collect()
        }

        pub fn clear(&mut self) {
            self.commands.clear();
        }
    }

    fn owned(partners: &[&str]) -> Vec<String> {
        partners.iter().map(|p| p.to_string()).collect()
    }

    impl HeartbeatCommands for RecordingHeartbeats {
        fn start_heartbeat(
            &mut self,
            _ring: &str,
            node: &str,
            partners: &[&str],
        ) -> Result<(), RingError> {
            self.commands
                .push(Command::Start(node.to_string(), owned(partners)));
            Ok(())
        }

        fn stop_heartbeat(
            &mut self,
            _ring: &str,
            node: &str,
            partners: &[&str],
        ) -> Result<(), RingError> {
            self.commands
                .push(Command::Stop(node.to_string(), owned(partners)));
            Ok(())
        }
    }
}
