//! Address to secure-identity association.
//!
//! Shared between the transport (which learns key ids from signed inbound
//! frame sets) and the network transaction (which refuses to stage packets
//! for unidentified destinations when encryption is required).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::RwLock;

/// Key ids known for each peer address. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct IdentityTable {
    inner: Arc<RwLock<HashMap<SocketAddr, String>>>,
}

impl IdentityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associates `key_id` with `addr`, replacing any previous association.
    /// Returns `true` when the association changed.
    pub fn associate(&self, addr: SocketAddr, key_id: &str) -> bool {
        let mut map = self.inner.write();
        match map.get(&addr) {
            Some(existing) if existing == key_id => false,
            _ => {
                map.insert(addr, key_id.to_string());
                true
            }
        }
    }

    pub fn key_id(&self, addr: &SocketAddr) -> Option<String> {
        self.inner.read().get(addr).cloned()
    }

    pub fn has_identity(&self, addr: &SocketAddr) -> bool {
        self.inner.read().contains_key(addr)
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }
}
