//! Protocol module - Defines the message catalog and its wire form
//!
//! Every message on the bus is an envelope frame:
//! - 4 bytes magic, 1 byte frame version, 1 byte flags
//! - tag (u16 length + UTF-8)
//! - optional 16-byte correlation id and reply-to topic
//! - body (u32 length + serialized field set)

mod codec;
mod message;
mod shape;

pub use codec::*;
pub use message::*;
pub use shape::*;

/// Envelope frame version for compatibility checking
pub const FRAME_VERSION: u8 = 1;

/// Magic bytes for frame identification
pub const MAGIC_BYTES: [u8; 4] = [0x42, 0x44, 0x4D, 0x42]; // "BDMB"
