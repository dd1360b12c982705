// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # CMA Protocol: Core Library
//!
//! The Collective Management Authority keeps track of every nanoprobe
//! ("drone") in a monitored fleet. Drones announce themselves with STARTUP,
//! peers report each other dead with HBDEAD, and the CMA answers by
//! rearranging heartbeat rings so that every live drone is watched by its
//! neighbours.
//!
//! ## Architecture
//!
//! - **codec** - Frame-set kinds, typed frames and the wire codec.
//! - **transport** - Non-blocking datagram transports and peer identities.
//! - **storage** - Durable property graph with commit and abort.
//! - **transaction** - Staged outbound packets, flushed after each message.
//! - **topology** - Heartbeat rings: splicing members in and out.
//! - **registry** - Drone records, liveness transitions and events.
//! - **network** - Scheduling, routing and the standard handlers.
//! - **context** - The state shared by all handlers.
//! - **config** - Protocol constants and runtime configuration.
//!
//! ## Processing Model
//!
//! 1. One inbound frame set is processed at a time, start to finish.
//! 2. Handlers stage packets and graph mutations; nothing is sent or
//!    persisted until the handler returns successfully.
//! 3. A failed handler aborts everything and stops the process.

pub mod codec;
pub mod config;
pub mod context;
pub mod error;
pub mod network;
pub mod registry;
pub mod storage;
pub mod topology;
pub mod transaction;
pub mod transport;

pub use context::{CmaContext, CommitOutcome};
pub use error::{CmaError, CmaResult};
