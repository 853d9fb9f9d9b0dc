//! Error types for the NGT wire format.
//!
//! Decoding and encoding fail for different reasons and are handled
//! differently by callers, so they are kept as two separate types:
//!
//! - [`DecodeError`]: inbound bytes are malformed. The packet is dropped and
//!   never answered.
//! - [`EncodeError`]: the caller built an invalid packet. Nothing reaches the
//!   wire.

use thiserror::Error;

/// Reasons an inbound buffer is rejected by the header codec.
///
/// Variants are listed in validation order. When a buffer has several
/// defects, the first one in this order is reported.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    /// Buffer is shorter than the fixed header, or than the body the header
    /// claims
    #[error("packet truncated: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Bytes required to hold the header (and its claimed body)
        expected: usize,
        /// Bytes actually available
        actual: usize,
    },

    /// First four bytes are not the NGT identifier
    #[error("invalid magic number: expected 0x004E4754 (\"NGT\")")]
    BadMagic,

    /// Stored checksum does not match the recomputed one
    #[error("checksum mismatch: header stores {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Value carried in the checksum field
        stored: u32,
        /// Value recomputed over the other header fields
        computed: u32,
    },

    /// Header type byte is not one of the four defined types
    #[error("unknown header type: {0:#04x}")]
    UnknownType(u8),
}

/// Reasons a packet cannot be built for sending.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    /// Body does not fit the 16-bit length field
    #[error("body too large: {size} bytes exceeds maximum {max}")]
    BodyTooLarge {
        /// Actual body size
        size: usize,
        /// Largest encodable body
        max: usize,
    },

    /// Capability byte has reserved bits (1-7) set
    #[error("reserved capability bits set: {0:#010b}")]
    ReservedCapabilityBitsSet(u8),
}
