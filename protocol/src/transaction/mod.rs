//! # Transaction Module
//!
//! The network half of the CMA's two-phase unit of work. Each inbound
//! message gets a fresh [`NetworkTransaction`]; handlers stage outbound
//! commands on it while mutating the graph store, and the router commits or
//! aborts both together.
//!
//! ```text
//! network.rs - PacketDescriptor, NetworkTransaction, CommitStats
//! ```

pub mod network;

pub use network::{CommitStats, NetworkTransaction, PacketDescriptor, TransactionError};
