//! # Storage Module
//!
//! Durable state for the CMA: drones, rings, ring membership and the
//! heartbeat next-links, held in a sled-backed property graph.
//!
//! ```text
//! graph.rs - GraphStore: typed nodes, directed relationships, commit/abort
//! ```
//!
//! Values are bincode on disk. Changes become durable only when the router
//! commits them after a handler succeeds, so a crash mid-message leaves the
//! last committed graph intact and the transport redelivers the message.

pub mod graph;

pub use graph::{GraphKey, GraphNode, GraphStore, NodeKind, StoreError, StoreResult};
