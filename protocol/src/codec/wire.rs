//! Datagram encoding.
//!
//! One UDP datagram carries a list of frame sets. [`BincodeCodec`] lays the
//! list out as a bincode `Vec<FrameSet>`; signing, encryption and
//! compression are applied by the nanoprobe library outside this crate.

use bytes::Bytes;

use super::frames::{FrameSet, FrameType};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors raised while encoding, decoding or building frames.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("malformed datagram: {0}")]
    Malformed(String),

    #[error("encoding failed: {0}")]
    Encode(String),

    #[error("value {value} cannot be carried by a {frame_type:?} frame")]
    FieldMismatch { frame_type: FrameType, value: String },
}

// ---------------------------------------------------------------------------
// Codec Trait
// ---------------------------------------------------------------------------

/// Converts between datagrams and frame sets.
pub trait FrameCodec: Send + Sync {
    fn decode(&self, datagram: &[u8]) -> Result<Vec<FrameSet>, CodecError>;

    fn encode(&self, framesets: &[FrameSet]) -> Result<Bytes, CodecError>;
}

/// Bincode list-of-frame-sets codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodeCodec;

impl FrameCodec for BincodeCodec {
    fn decode(&self, datagram: &[u8]) -> Result<Vec<FrameSet>, CodecError> {
        bincode::deserialize(datagram).map_err(|e| CodecError::Malformed(e.to_string()))
    }

    fn encode(&self, framesets: &[FrameSet]) -> Result<Bytes, CodecError> {
        bincode::serialize(framesets)
            .map(Bytes::from)
            .map_err(|e| CodecError::Encode(e.to_string()))
    }
}
