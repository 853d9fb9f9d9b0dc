//! # NGT Protocol: Wire Format
//!
//! This crate implements the packet layer of NGT, a small connection-oriented
//! protocol that runs directly above a datagram transport.
//!
//! ## Packet Layout
//!
//! Every datagram carries exactly one packet:
//! - **Header**: 15 bytes, packed, every integer Little Endian
//! - **Body**: `length` opaque bytes (always empty for `Open`)
//!
//! ```text
//! 0      4          8        10       12     13     14     15
//! ┌──────┬──────────┬────────┬────────┬──────┬──────┬──────┬─────────┐
//! │magic │ checksum │channel │ length │ caps │ type │ seq  │ body... │
//! └──────┴──────────┴────────┴────────┴──────┴──────┴──────┴─────────┘
//! ```
//!
//! ## Implementation Notes
//!
//! - **Zero-Copy Parsing**: [`Header::parse`] casts network bytes with
//!   [`zerocopy`] and borrows the body from the same buffer. [`Packet`] owns a
//!   copy for the state machines.
//!
//! - **Explicit Byte Order**: Fields are stored as byte arrays and converted
//!   with `from_le_bytes`/`to_le_bytes`. Host byte order never leaks onto the
//!   wire.
//!
//! - **Weak Integrity**: The checksum is a shifted sum of the other header
//!   fields. It catches transmission corruption, not tampering.
//!
//! ## Validation Order
//!
//! Decoding validates size, magic, checksum, length and type, in that order.
//! The resulting [`DecodeError`] precedence is part of the protocol contract:
//! a buffer with a foreign magic is never checksummed.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod capabilities;
pub mod errors;
pub mod header;
pub mod header_type;
pub mod packet;

pub use capabilities::{Capabilities, negotiate};
pub use errors::{DecodeError, EncodeError};
pub use header::Header;
pub use header_type::HeaderType;
pub use packet::Packet;
