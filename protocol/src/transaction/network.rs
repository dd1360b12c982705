//! Outbound command batching.
//!
//! Handlers never write to the socket. They stage [`PacketDescriptor`]s on
//! the [`NetworkTransaction`] opened for the message being processed, and
//! the router flushes the batch only after the handler succeeded. A failed
//! handler aborts the batch, so the drones never see commands whose state
//! change was not persisted.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::codec::{CodecError, FieldValue, Frame, FrameSet, FrameSetKind, FrameType};
use crate::transport::{IdentityTable, Transport, TransportError};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    #[error("no secure identity for {dest}; refusing to send {action}")]
    NoIdentity { dest: SocketAddr, action: FrameSetKind },

    #[error("{0} packets are never sent by the CMA")]
    ForbiddenAction(FrameSetKind),

    #[error("frame conversion failed: {0}")]
    Codec(#[from] CodecError),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Packet Descriptors
// ---------------------------------------------------------------------------

/// One staged outbound command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketDescriptor {
    pub dest: SocketAddr,
    pub action: FrameSetKind,
    pub fields: Vec<(FrameType, FieldValue)>,
}

impl PacketDescriptor {
    /// Builds the concrete frame set for this command.
    pub fn to_frameset(&self) -> Result<FrameSet, CodecError> {
        let mut fs = FrameSet::new(self.action);
        for (frame_type, value) in &self.fields {
            fs.push(Frame::from_field(*frame_type, value)?);
        }
        Ok(fs)
    }
}

/// Timing of network commits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitStats {
    /// Duration of the most recent commit; zero if it had nothing to send.
    pub last_commit: Duration,
    /// Sum of all commit durations.
    pub total_time: Duration,
    /// Number of commits that sent something.
    pub commits: u64,
}

// ---------------------------------------------------------------------------
// NetworkTransaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkTransaction {
    packets: Vec<PacketDescriptor>,
    closes: Vec<SocketAddr>,
    encryption_required: bool,
    #[serde(skip)]
    identities: IdentityTable,
    #[serde(skip)]
    stats: CommitStats,
}

impl NetworkTransaction {
    pub fn new(identities: IdentityTable, encryption_required: bool) -> Self {
        Self {
            packets: Vec::new(),
            closes: Vec::new(),
            encryption_required,
            identities,
            stats: CommitStats::default(),
        }
    }

    /// Stages a command for `dest`.
    ///
    /// Fails when encryption is required and `dest` has no known identity.
    pub fn add_packet(
        &mut self,
        dest: SocketAddr,
        action: FrameSetKind,
        fields: Vec<(FrameType, FieldValue)>,
    ) -> Result<(), TransactionError> {
        if self.encryption_required && !self.identities.has_identity(&dest) {
            return Err(TransactionError::NoIdentity { dest, action });
        }
        trace!(dest = %dest, action = %action, fields = fields.len(), "packet staged");
        self.packets.push(PacketDescriptor {
            dest,
            action,
            fields,
        });
        Ok(())
    }

    /// Stages a teardown of the channel to `addr`, performed after the sends.
    pub fn close_connection(&mut self, addr: SocketAddr) {
        if !self.closes.contains(&addr) {
            self.closes.push(addr);
        }
    }

    pub fn packets(&self) -> &[PacketDescriptor] {
        &self.packets
    }

    pub fn closes(&self) -> &[SocketAddr] {
        &self.closes
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty() && self.closes.is_empty()
    }

    pub fn stats(&self) -> CommitStats {
        self.stats
    }

    /// JSON rendering of the staged work, for logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Sends everything staged, grouped into one datagram per destination
    /// in first-use order, then performs staged closes and resets.
    ///
    /// A failure leaves the staged work in place for the caller to abort.
    pub fn commit(&mut self, transport: &mut dyn Transport) -> Result<(), TransactionError> {
        if self.is_empty() {
            self.stats.last_commit = Duration::ZERO;
            return Ok(());
        }
        let started = Instant::now();

        let mut batches: Vec<(SocketAddr, Vec<FrameSet>)> = Vec::new();
        for packet in &self.packets {
            if packet.action == FrameSetKind::Startup {
                return Err(TransactionError::ForbiddenAction(packet.action));
            }
            let fs = packet.to_frameset()?;
            match batches.iter_mut().find(|(dest, _)| *dest == packet.dest) {
                Some((_, sets)) => sets.push(fs),
                None => batches.push((packet.dest, vec![fs])),
            }
        }

        let sent = self.packets.len();
        for (dest, sets) in batches {
            transport.send(dest, sets)?;
        }
        for addr in &self.closes {
            transport.close_connection(*addr)?;
        }

        let elapsed = started.elapsed();
        self.stats.last_commit = elapsed;
        self.stats.total_time += elapsed;
        self.stats.commits += 1;
        debug!(
            packets = sent,
            closes = self.closes.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "network transaction committed"
        );

        self.packets.clear();
        self.closes.clear();
        Ok(())
    }

    /// Discards everything staged.
    pub fn abort(&mut self) {
        if !self.is_empty() {
            debug!(
                packets = self.packets.len(),
                closes = self.closes.len(),
                "network transaction aborted"
            );
        }
        self.packets.clear();
        self.closes.clear();
    }
}
