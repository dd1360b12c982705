//! # Topology Module
//!
//! Heartbeat ring overlays. Drones do not heartbeat the CMA; they heartbeat
//! their ring neighbours and report deaths upstream.
//!
//! ```text
//! ring.rs      - RingTopology: join/leave splicing, ordering, audit
//! heartbeat.rs - HeartbeatCommands and the drone packet implementation
//! ```

pub mod heartbeat;
pub mod ring;

use crate::storage::StoreError;
use crate::transaction::TransactionError;

pub use heartbeat::{DroneHeartbeats, HeartbeatCommands};
pub use ring::{Ring, RingTopology};

/// Errors raised by ring maintenance.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    #[error("ring {ring} is corrupt: {detail}")]
    Audit { ring: String, detail: String },

    #[error("drone {0} has no known address")]
    NoAddress(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}
