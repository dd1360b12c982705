//! The error type handlers and the dispatch path return.

use std::net::SocketAddr;

use thiserror::Error;

use crate::codec::{CodecError, FrameSetKind};
use crate::storage::StoreError;
use crate::topology::RingError;
use crate::transaction::TransactionError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum CmaError {
    #[error("graph store failure")]
    Store(#[from] StoreError),

    #[error("frame codec failure")]
    Codec(#[from] CodecError),

    #[error("transport failure")]
    Transport(#[from] TransportError),

    #[error("network transaction failure")]
    Transaction(#[from] TransactionError),

    #[error("ring maintenance failure")]
    Ring(#[from] RingError),

    /// A frame set was missing something its handler needs.
    #[error("malformed {kind} from {from}: {detail}")]
    Malformed {
        kind: FrameSetKind,
        from: SocketAddr,
        detail: String,
    },

    /// A handler failed; the CMA must not continue.
    #[error("processing {kind} from {from} failed")]
    Fatal {
        kind: FrameSetKind,
        from: SocketAddr,
        #[source]
        source: Box<CmaError>,
    },
}

impl CmaError {
    /// The error and all of its causes, outermost first, joined by `": "`.
    pub fn chain(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            out.push_str(": ");
            out.push_str(&err.to_string());
            cause = err.source();
        }
        out
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }
}

pub type CmaResult<T> = Result<T, CmaError>;
