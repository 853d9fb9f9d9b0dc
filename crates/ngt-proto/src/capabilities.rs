//! Capability flags and negotiation.
//!
//! A peer requests a set of optional features in its `Open` header. The
//! server answers with the intersection of that request and what it supports.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Capability flags (8 bits)
    ///
    /// ```text
    /// bit  0 1 2 3 4 5 6 7
    ///      P R R R R R R R
    /// ```
    ///
    /// `P` is periodic connection checking. `R` bits are reserved and must be
    /// zero on every packet this implementation sends.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct Capabilities: u8 {
        /// Peer can periodically check that the connection is alive
        const PERIODIC_CHECK = 0b0000_0001;
    }
}

impl Capabilities {
    /// Mask of the reserved bits (1-7)
    pub const RESERVED_MASK: u8 = !Self::all().bits();

    /// Create capabilities from a raw byte, keeping reserved bits.
    ///
    /// Inbound headers are parsed with this so the checksum can be verified
    /// over the exact bytes received. Reserved bits are stripped later by
    /// [`negotiate`].
    #[must_use]
    pub const fn from_byte(byte: u8) -> Self {
        Self::from_bits_retain(byte)
    }

    /// Convert to raw byte value
    #[must_use]
    pub const fn to_byte(self) -> u8 {
        self.bits()
    }

    /// Reserved bits that are set, if any
    #[must_use]
    pub const fn reserved_bits(self) -> u8 {
        self.bits() & Self::RESERVED_MASK
    }

    /// Drop every reserved bit
    #[must_use]
    pub const fn defined(self) -> Self {
        Self::from_bits_truncate(self.bits())
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::empty()
    }
}

/// Compute the effective capability set for a connection.
///
/// Returns `requested & supported`, restricted to defined bits. Total and
/// commutative. A peer that shares nothing with the server still gets a
/// connection, just with no optional features.
#[must_use]
pub const fn negotiate(requested: Capabilities, supported: Capabilities) -> Capabilities {
    Capabilities::from_bits_truncate(requested.bits() & supported.bits())
}
