//! In-memory transport for tests.
//!
//! Inbound datagrams are scripted with [`MemoryTransport::inject`]; every
//! send, ack and close is recorded. Clones share state, so a test can keep a
//! handle while the listener owns another.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{IdentityTable, Transport, TransportError};
use crate::codec::FrameSet;

#[derive(Debug, Default)]
struct MemoryState {
    inbound: VecDeque<(SocketAddr, Vec<FrameSet>)>,
    sent: Vec<(SocketAddr, Vec<FrameSet>)>,
    acked: Vec<(SocketAddr, FrameSet)>,
    closed: Vec<SocketAddr>,
    send_calls: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
    identities: IdentityTable,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a datagram as if it had arrived from `source`.
    pub fn inject(&self, source: SocketAddr, framesets: Vec<FrameSet>) {
        self.state.lock().inbound.push_back((source, framesets));
    }

    /// Everything sent so far, one entry per datagram.
    pub fn sent(&self) -> Vec<(SocketAddr, Vec<FrameSet>)> {
        self.state.lock().sent.clone()
    }

    /// Sent frame sets flattened, in send order.
    pub fn sent_framesets(&self) -> Vec<(SocketAddr, FrameSet)> {
        self.state
            .lock()
            .sent
            .iter()
            .flat_map(|(dest, sets)| sets.iter().map(move |fs| (*dest, fs.clone())))
            .collect()
    }

    pub fn acked(&self) -> Vec<(SocketAddr, FrameSet)> {
        self.state.lock().acked.clone()
    }

    pub fn closed(&self) -> Vec<SocketAddr> {
        self.state.lock().closed.clone()
    }

    /// Number of `send` calls made.
    pub fn send_calls(&self) -> usize {
        self.state.lock().send_calls
    }

    pub fn pending_inbound(&self) -> usize {
        self.state.lock().inbound.len()
    }

    /// Forgets recorded outbound traffic, keeping the inbound script.
    pub fn clear_recorded(&self) {
        let mut state = self.state.lock();
        state.sent.clear();
        state.acked.clear();
        state.closed.clear();
        state.send_calls = 0;
    }
}

impl Transport for MemoryTransport {
    fn try_recv(&mut self) -> Result<Option<(SocketAddr, Vec<FrameSet>)>, TransportError> {
        Ok(self.state.lock().inbound.pop_front())
    }

    fn send(&mut self, dest: SocketAddr, framesets: Vec<FrameSet>) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.send_calls += 1;
        state.sent.push((dest, framesets));
        Ok(())
    }

    fn ack(&mut self, source: SocketAddr, frameset: &FrameSet) -> Result<(), TransportError> {
        self.state.lock().acked.push((source, frameset.clone()));
        Ok(())
    }

    fn close_connection(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        self.state.lock().closed.push(addr);
        Ok(())
    }

    fn identities(&self) -> IdentityTable {
        self.identities.clone()
    }
}
