//! UDP transport on a non-blocking tokio socket.
//!
//! The socket is shared through an `Arc` so the daemon can await
//! readiness on it while the listener drains it with `try_recv_from`.

use std::collections::HashSet;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{debug, warn};

use super::{IdentityTable, Transport, TransportError};
use crate::codec::{BincodeCodec, FrameCodec, FrameSet, FrameSetKind};
use crate::config::MAX_DATAGRAM_SIZE;

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    codec: Arc<dyn FrameCodec>,
    identities: IdentityTable,
    /// Peers we currently hold a channel open with.
    peers: HashSet<SocketAddr>,
    buf: Vec<u8>,
}

impl UdpTransport {
    /// Binds a new socket at `addr` using the bincode codec.
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(Arc::new(socket), Arc::new(BincodeCodec)))
    }

    pub fn from_socket(socket: Arc<UdpSocket>, codec: Arc<dyn FrameCodec>) -> Self {
        Self {
            socket,
            codec,
            identities: IdentityTable::new(),
            peers: HashSet::new(),
            buf: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// The underlying socket, for readiness polling.
    pub fn socket(&self) -> Arc<UdpSocket> {
        Arc::clone(&self.socket)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    fn send_datagram(&mut self, dest: SocketAddr, framesets: &[FrameSet]) -> Result<(), TransportError> {
        let bytes = self.codec.encode(framesets)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::Oversized {
                dest,
                size: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        match self.socket.try_send_to(&bytes, dest) {
            Ok(_) => Ok(()),
            // The reliable layer above retransmits unacknowledged packets.
            Err(e) if e.kind() == ErrorKind::WouldBlock => {
                warn!(dest = %dest, "send buffer full, datagram dropped");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for UdpTransport {
    fn try_recv(&mut self) -> Result<Option<(SocketAddr, Vec<FrameSet>)>, TransportError> {
        loop {
            let (len, source) = match self.socket.try_recv_from(&mut self.buf) {
                Ok(received) => received,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(None),
                Err(e) => return Err(e.into()),
            };
            match self.codec.decode(&self.buf[..len]) {
                Ok(framesets) => {
                    self.peers.insert(source);
                    return Ok(Some((source, framesets)));
                }
                Err(e) => {
                    warn!(from = %source, bytes = len, error = %e, "dropping undecodable datagram");
                }
            }
        }
    }

    fn send(&mut self, dest: SocketAddr, framesets: Vec<FrameSet>) -> Result<(), TransportError> {
        self.peers.insert(dest);
        self.send_datagram(dest, &framesets)
    }

    fn ack(&mut self, source: SocketAddr, frameset: &FrameSet) -> Result<(), TransportError> {
        debug!(to = %source, kind = %frameset.kind, "acknowledging");
        let ack = FrameSet::new(FrameSetKind::Ack);
        self.send_datagram(source, &[ack])
    }

    fn close_connection(&mut self, addr: SocketAddr) -> Result<(), TransportError> {
        if self.peers.remove(&addr) {
            debug!(peer = %addr, "connection closed");
        }
        Ok(())
    }

    fn identities(&self) -> IdentityTable {
        self.identities.clone()
    }
}
