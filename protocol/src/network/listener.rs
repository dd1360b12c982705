//! The readiness-driven receive loop.
//!
//! [`PacketListener::handle_readiness`] is the only entry point the runtime
//! calls: when the socket becomes readable it drains every decoded frame set
//! into the [`PacketScheduler`], then dequeues and dispatches one at a time
//! until nothing is left. The transport is drained again before every
//! dequeue so urgent traffic arriving mid-burst still goes first.

use std::net::SocketAddr;
use std::time::Duration;

use tracing::{debug, trace, warn};

use super::router::MessageRouter;
use super::scheduler::PacketScheduler;
use crate::codec::FrameSet;
use crate::context::CmaContext;
use crate::error::CmaResult;
use crate::transport::{IdentityTable, Transport};

/// What one readiness event did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReadinessReport {
    /// Frame sets run through the router.
    pub dispatched: usize,
    /// Frame sets dropped by the encryption gate.
    pub rejected: usize,
    /// Network commit time of every dispatched frame set.
    pub commit_times: Vec<Duration>,
}

pub struct PacketListener<T: Transport> {
    transport: T,
    identities: IdentityTable,
    scheduler: PacketScheduler<FrameSet>,
    router: MessageRouter,
    encryption_required: bool,
}

impl<T: Transport> PacketListener<T> {
    pub fn new(transport: T, router: MessageRouter, encryption_required: bool) -> Self {
        let identities = transport.identities();
        Self {
            transport,
            identities,
            scheduler: PacketScheduler::new(),
            router,
            encryption_required,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    pub fn router_mut(&mut self) -> &mut MessageRouter {
        &mut self.router
    }

    /// Frame sets waiting in the scheduler.
    pub fn queue_depth(&self) -> usize {
        self.scheduler.len()
    }

    /// Drains and dispatches until both the transport and the scheduler are
    /// empty. A handler failure is returned immediately and is fatal.
    pub fn handle_readiness(&mut self, ctx: &mut CmaContext) -> CmaResult<ReadinessReport> {
        let mut report = ReadinessReport::default();
        loop {
            report.rejected += self.drain()?;
            let Some((source, frameset)) = self.scheduler.dequeue() else {
                break;
            };
            let outcome = self
                .router
                .dispatch(ctx, &mut self.transport, source, &frameset)?;
            report.dispatched += 1;
            report.commit_times.push(outcome.network);
        }
        if report.dispatched > 0 || report.rejected > 0 {
            debug!(
                dispatched = report.dispatched,
                rejected = report.rejected,
                "readiness handled"
            );
        }
        Ok(report)
    }

    /// Moves every waiting datagram into the scheduler. Returns how many
    /// frame sets the encryption gate refused.
    fn drain(&mut self) -> CmaResult<usize> {
        let mut rejected = 0;
        while let Some((source, framesets)) = self.transport.try_recv()? {
            for frameset in framesets {
                if self.admit(source, &frameset) {
                    trace!(kind = %frameset.kind, from = %source, "queued");
                    self.scheduler.enqueue(source, frameset);
                } else {
                    rejected += 1;
                }
            }
        }
        Ok(rejected)
    }

    fn admit(&self, source: SocketAddr, frameset: &FrameSet) -> bool {
        match frameset.sender_key_id.as_deref() {
            Some(key_id) => {
                if self.identities.associate(source, key_id) {
                    debug!(from = %source, key_id, "peer identity learned");
                }
                true
            }
            None if self.encryption_required && !frameset.kind.allowed_unencrypted() => {
                warn!(
                    kind = %frameset.kind,
                    from = %source,
                    "unencrypted frame set refused"
                );
                false
            }
            None => true,
        }
    }
}
