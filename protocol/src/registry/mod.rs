//! # Registry Module
//!
//! Everything the CMA knows about individual drones.
//!
//! ```text
//! drone.rs  - Drone record, NodeStatus, capability traits
//! nodes.rs  - NodeRegistry: admission, death reports, discovery intake
//! events.rs - NodeEvent, EventObserver, EventBus, ChannelObserver
//! ```

pub mod drone;
pub mod events;
pub mod nodes;

pub use drone::{Drone, HasDiscoveryAttributes, HasStatus, NodeStatus};
pub use events::{ChannelObserver, EventBus, EventKind, EventObserver, NodeEvent};
pub use nodes::{DiscoveryPayload, NodeRegistry};
