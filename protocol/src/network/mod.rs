//! # Network Module
//!
//! The inbound half of the CMA: everything between a readable socket and a
//! committed transaction.
//!
//! ```text
//! scheduler.rs - per-source, priority-bucketed inbound queue
//! router.rs    - kind-to-handler dispatch and the commit protocol
//! handlers.rs  - the standard frame-set handlers
//! listener.rs  - drain, gate, schedule and dispatch on readiness
//! ```
//!
//! ## Design Decisions
//!
//! - Exactly one frame set is processed at a time, start to finish. The
//!   registry and ring topology rely on this and hold no locks.
//! - Nothing here blocks. Sends are staged on the network transaction and
//!   flushed by the router after the handler returns.
//! - A handler failure is fatal. The router aborts both transactions and
//!   the listener hands the error to the binary, which exits; the sender
//!   retransmits the unacknowledged frame set to the next CMA.

pub mod handlers;
pub mod listener;
pub mod router;
pub mod scheduler;

pub use handlers::register_default_handlers;
pub use listener::{PacketListener, ReadinessReport};
pub use router::{DispatchStats, MessageHandler, MessageRouter};
pub use scheduler::{PacketScheduler, Prioritized};
