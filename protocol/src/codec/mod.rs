//! # Frame Codec
//!
//! The message vocabulary shared with the nanoprobes: frame-set kinds and
//! their priorities, typed frames, and the datagram codec.

pub mod frames;
pub mod kinds;
pub mod wire;

pub use frames::{FieldValue, Frame, FrameSet, FrameType};
pub use kinds::FrameSetKind;
pub use wire::{BincodeCodec, CodecError, FrameCodec};
