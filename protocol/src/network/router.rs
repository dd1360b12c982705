//! Kind-to-handler dispatch.
//!
//! Each inbound frame set is one unit of work:
//!
//! 1. look up the handler for its kind (or the default handler),
//! 2. run it against the shared [`CmaContext`],
//! 3. on success commit the network transaction, then the graph store if
//!    the handler changed anything, then acknowledge the frame set,
//! 4. on failure abort both transactions, log at critical severity and
//!    return [`CmaError::Fatal`]. The frame set is not acknowledged, so
//!    the sender retransmits it to whoever handles it next.

use std::collections::HashMap;
use std::net::SocketAddr;

use tracing::{debug, error, info};

use crate::codec::{FrameSet, FrameSetKind};
use crate::context::{CmaContext, CommitOutcome};
use crate::error::{CmaError, CmaResult};
use crate::transport::Transport;

/// Processes one kind of frame set.
pub trait MessageHandler: Send {
    fn handle(&self, ctx: &mut CmaContext, source: SocketAddr, frameset: &FrameSet)
        -> CmaResult<()>;
}

impl<F> MessageHandler for F
where
    F: Fn(&mut CmaContext, SocketAddr, &FrameSet) -> CmaResult<()> + Send,
{
    fn handle(
        &self,
        ctx: &mut CmaContext,
        source: SocketAddr,
        frameset: &FrameSet,
    ) -> CmaResult<()> {
        self(ctx, source, frameset)
    }
}

fn log_unhandled(_ctx: &mut CmaContext, source: SocketAddr, frameset: &FrameSet) -> CmaResult<()> {
    info!(kind = %frameset.kind, from = %source, frames = %frameset.summary(), "no handler; dropped");
    Ok(())
}

/// Counters kept by the router.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub unhandled: u64,
    pub failures: u64,
}

pub struct MessageRouter {
    handlers: HashMap<FrameSetKind, Box<dyn MessageHandler>>,
    default: Box<dyn MessageHandler>,
    stats: DispatchStats,
}

impl Default for MessageRouter {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
            default: Box::new(log_unhandled),
            stats: DispatchStats::default(),
        }
    }
}

impl MessageRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `kind` to `handler`, replacing any previous registration.
    pub fn register<H>(&mut self, kind: FrameSetKind, handler: H)
    where
        H: MessageHandler + 'static,
    {
        if self.handlers.insert(kind, Box::new(handler)).is_some() {
            debug!(%kind, "handler replaced");
        }
    }

    pub fn is_registered(&self, kind: FrameSetKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Runs one frame set through its handler and the commit protocol.
    pub fn dispatch(
        &mut self,
        ctx: &mut CmaContext,
        transport: &mut dyn Transport,
        source: SocketAddr,
        frameset: &FrameSet,
    ) -> CmaResult<CommitOutcome> {
        let kind = frameset.kind;
        let handler = match self.handlers.get(&kind) {
            Some(handler) => handler.as_ref(),
            None => {
                self.stats.unhandled += 1;
                self.default.as_ref()
            }
        };

        // Leftovers from an earlier failure must never ride along.
        ctx.txn.abort();

        let result = handler
            .handle(ctx, source, frameset)
            .and_then(|()| ctx.commit(transport))
            .and_then(|outcome| {
                transport.ack(source, frameset)?;
                Ok(outcome)
            });

        match result {
            Ok(outcome) => {
                self.stats.dispatched += 1;
                debug!(
                    %kind,
                    from = %source,
                    persisted = outcome.persisted,
                    network_us = outcome.network.as_micros() as u64,
                    "dispatched"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.stats.failures += 1;
                error!(
                    severity = "critical",
                    %kind,
                    from = %source,
                    frames = %frameset.summary(),
                    error = %err.chain(),
                    staged = %ctx.txn.to_json(),
                    "handler failed; aborting"
                );
                if let Err(abort_err) = ctx.abort() {
                    error!(severity = "critical", error = %abort_err.chain(), "abort failed");
                }
                Err(CmaError::Fatal {
                    kind,
                    from: source,
                    source: Box::new(err),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{FieldValue, FrameType};
    use crate::config::CmaConfig;
    use crate::registry::Drone;
    use crate::storage::GraphStore;
    use crate::transport::MemoryTransport;

    fn context(transport: &MemoryTransport) -> CmaContext {
        CmaContext::new(
            CmaConfig::default(),
            GraphStore::open_temporary().unwrap(),
            transport.identities(),
        )
        .unwrap()
    }

    fn source() -> SocketAddr {
        "10.0.0.5:1984".parse().unwrap()
    }

    #[test]
    fn success_commits_both_and_acks() {
        let mut transport = MemoryTransport::new();
        let mut ctx = context(&transport);
        let mut router = MessageRouter::new();
        router.register(FrameSetKind::Ping, |ctx: &mut CmaContext, src: SocketAddr, _: &FrameSet| -> CmaResult<()> {
            ctx.store.save(&Drone::new("pinger", "global"))?;
            ctx.txn
                .add_packet(src, FrameSetKind::Pong, vec![(FrameType::Text, FieldValue::from("pong"))])?;
            Ok(())
        });

        let fs = FrameSet::new(FrameSetKind::Ping);
        let outcome = router.dispatch(&mut ctx, &mut transport, source(), &fs).unwrap();

        assert!(outcome.persisted);
        assert!(!ctx.store.has_pending());
        assert!(ctx.store.load::<Drone>("pinger").unwrap().is_some());
        assert_eq!(transport.sent_framesets()[0].1.kind, FrameSetKind::Pong);
        assert_eq!(transport.acked(), vec![(source(), fs)]);
        assert_eq!(router.stats().dispatched, 1);
    }

    #[test]
    fn read_only_handler_does_not_persist() {
        let mut transport = MemoryTransport::new();
        let mut ctx = context(&transport);
        let mut router = MessageRouter::new();
        router.register(FrameSetKind::Ping, |_: &mut CmaContext, _: SocketAddr, _: &FrameSet| -> CmaResult<()> {
            Ok(())
        });

        let outcome = router
            .dispatch(&mut ctx, &mut transport, source(), &FrameSet::new(FrameSetKind::Ping))
            .unwrap();
        assert!(!outcome.persisted);
        assert_eq!(transport.send_calls(), 0);
        assert_eq!(transport.acked().len(), 1);
    }

    #[test]
    fn failure_aborts_everything_and_withholds_ack() {
        let mut transport = MemoryTransport::new();
        let mut ctx = context(&transport);
        let mut router = MessageRouter::new();
        router.register(FrameSetKind::HbDead, |ctx: &mut CmaContext, src: SocketAddr, fs: &FrameSet| -> CmaResult<()> {
            ctx.store.save(&Drone::new("doomed", "global"))?;
            ctx.txn.add_packet(src, FrameSetKind::Ping, vec![])?;
            Err(CmaError::Malformed {
                kind: fs.kind,
                from: src,
                detail: "boom".into(),
            })
        });

        let err = router
            .dispatch(&mut ctx, &mut transport, source(), &FrameSet::new(FrameSetKind::HbDead))
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(err.chain().contains("boom"));
        assert!(ctx.store.load::<Drone>("doomed").unwrap().is_none());
        assert!(ctx.txn.is_empty());
        assert_eq!(transport.send_calls(), 0);
        assert!(transport.acked().is_empty());
        assert_eq!(router.stats().failures, 1);
    }

    #[test]
    fn unregistered_kind_goes_to_default() {
        let mut transport = MemoryTransport::new();
        let mut ctx = context(&transport);
        let mut router = MessageRouter::new();
        assert!(!router.is_registered(FrameSetKind::SeqPing));

        router
            .dispatch(&mut ctx, &mut transport, source(), &FrameSet::new(FrameSetKind::SeqPing))
            .unwrap();
        assert_eq!(router.stats().unhandled, 1);
        assert_eq!(transport.acked().len(), 1);
    }
}
