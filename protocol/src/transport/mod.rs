//! # Transport
//!
//! The reliable-UDP layer the CMA sits on top of. The CMA only consumes its
//! semantics: a non-blocking drain of decoded frame sets, per-destination
//! sends, acknowledgements of fully processed messages and connection
//! teardown. Retransmission and sequencing live in the nanoprobe library.
//!
//! | Implementation      | Used by                                 |
//! |---------------------|-----------------------------------------|
//! | [`UdpTransport`]    | the `cma-node` daemon                   |
//! | [`MemoryTransport`] | unit and integration tests, benchmarks  |

pub mod identity;
pub mod memory;
pub mod udp;

use std::net::SocketAddr;

use crate::codec::{CodecError, FrameSet};

pub use identity::IdentityTable;
pub use memory::MemoryTransport;
pub use udp::UdpTransport;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("datagram of {size} bytes to {dest} exceeds the {max} byte limit")]
    Oversized {
        dest: SocketAddr,
        size: usize,
        max: usize,
    },
}

// ---------------------------------------------------------------------------
// Transport Trait
// ---------------------------------------------------------------------------

/// What the CMA needs from the network below it.
///
/// Every method is non-blocking: the CMA runs a single-writer reactor and
/// must never stall inside a handler.
pub trait Transport: Send {
    /// Returns the next available datagram's frame sets, or `None` when
    /// nothing is waiting.
    fn try_recv(&mut self) -> Result<Option<(SocketAddr, Vec<FrameSet>)>, TransportError>;

    /// Sends `framesets` to `dest` as one datagram.
    fn send(&mut self, dest: SocketAddr, framesets: Vec<FrameSet>) -> Result<(), TransportError>;

    /// Acknowledges a fully processed inbound frame set.
    fn ack(&mut self, source: SocketAddr, frameset: &FrameSet) -> Result<(), TransportError>;

    /// Tears down the reliable channel to `addr`.
    fn close_connection(&mut self, addr: SocketAddr) -> Result<(), TransportError>;

    /// Secure identities known for each peer.
    fn identities(&self) -> IdentityTable;
}
