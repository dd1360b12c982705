//! The state shared by every handler.
//!
//! One [`CmaContext`] is built at start-up and threaded through the
//! listener, router and handlers. It is only ever touched by the dispatch
//! path, one message at a time, so nothing in it is locked.

use std::time::Duration;

use tracing::debug;

use crate::config::CmaConfig;
use crate::error::CmaResult;
use crate::registry::NodeRegistry;
use crate::storage::GraphStore;
use crate::transaction::NetworkTransaction;
use crate::transport::{IdentityTable, Transport};

pub struct CmaContext {
    pub config: CmaConfig,
    pub store: GraphStore,
    pub registry: NodeRegistry,
    /// Outbound work for the message being processed.
    pub txn: NetworkTransaction,
}

/// What a successful commit did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    /// Time spent sending; zero when nothing was staged.
    pub network: Duration,
    /// Whether graph mutations were persisted.
    pub persisted: bool,
}

impl CmaContext {
    /// Loads the registry from `store`, re-associates the stored key ids in
    /// `identities` and prepares an empty transaction.
    pub fn new(config: CmaConfig, mut store: GraphStore, identities: IdentityTable) -> CmaResult<Self> {
        let registry = NodeRegistry::load(&mut store, &config)?;
        // Rings created for the configured names are durable from the start.
        store.commit()?;
        registry.restore_identities(&identities);
        let txn = NetworkTransaction::new(identities, config.encryption_required);
        Ok(Self {
            config,
            store,
            registry,
            txn,
        })
    }

    /// Commits the network transaction, then the graph transaction if it
    /// holds any mutation.
    pub fn commit(&mut self, transport: &mut dyn Transport) -> CmaResult<CommitOutcome> {
        self.txn.commit(transport)?;
        let persisted = self.store.has_pending();
        if persisted {
            self.store.commit()?;
        } else {
            self.store.abort();
        }
        Ok(CommitOutcome {
            network: self.txn.stats().last_commit,
            persisted,
        })
    }

    /// Discards both transactions and resynchronises the registry with the
    /// last committed graph.
    pub fn abort(&mut self) -> CmaResult<()> {
        self.txn.abort();
        if self.store.has_pending() {
            debug!(mutations = self.store.pending_count(), "discarding graph mutations");
        }
        self.store.abort();
        self.registry.reload(&mut self.store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MemoryTransport;

    #[test]
    fn fresh_context_has_nothing_pending() {
        let transport = MemoryTransport::new();
        let ctx = CmaContext::new(
            CmaConfig::default(),
            GraphStore::open_temporary().unwrap(),
            transport.identities(),
        )
        .unwrap();
        assert!(!ctx.store.has_pending());
        assert!(ctx.txn.is_empty());
        assert_eq!(ctx.registry.rings().count(), 1);
    }

    #[test]
    fn empty_commit_touches_nothing() {
        let mut transport = MemoryTransport::new();
        let mut ctx = CmaContext::new(
            CmaConfig::default(),
            GraphStore::open_temporary().unwrap(),
            transport.identities(),
        )
        .unwrap();
        let outcome = ctx.commit(&mut transport).unwrap();
        assert_eq!(outcome.network, Duration::ZERO);
        assert!(!outcome.persisted);
        assert_eq!(transport.send_calls(), 0);
    }
}
