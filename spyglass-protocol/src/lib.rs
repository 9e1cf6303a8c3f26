//! # spyglass-protocol
//!
//! Wire protocol implementation for spyglass (SOP - Spyglass Object Protocol).
//!
//! This crate provides:
//! - Binary framing with length prefix and CRC32C validation
//! - Msgpack message serialization/deserialization (binary-safe)
//! - The three message kinds (CALL, RETURN, ERROR) and the tagged value
//!   envelope that distinguishes plain values from remote-object references

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder};
pub use error::ProtocolError;
pub use frame::{Frame, FrameFlags, FRAME_HEADER_SIZE, MAGIC};
pub use message::{CaptureBlob, CaptureKind, FreeVar, FreeVarSlot, Message, WireValue};

/// Protocol version supported by this implementation.
pub const PROTOCOL_VERSION: u16 = 1;

/// Default port for a spyglass server.
pub const DEFAULT_PORT: u16 = 7462;

/// Maximum frame payload size (16 MiB).
pub const MAX_PAYLOAD_SIZE: u32 = 16 * 1024 * 1024;
