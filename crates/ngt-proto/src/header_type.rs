//! Header types for NGT packets.
//!
//! The type byte identifies the purpose of a packet. The values are the
//! ASCII letters of the protocol constants, so a hex dump of a
//! header reads `O`, `A`, `X` or `K` at offset 13.

use serde_repr::{Deserialize_repr, Serialize_repr};

/// Packet header type
///
/// # Representation
///
/// Serialized as a single byte at offset 13 of the header. The
/// `#[repr(u8)]` keeps the numeric values stable for wire compatibility.
///
/// # Security
///
/// [`HeaderType::from_u8`] returns `None` for unknown values. Packets with an
/// unknown type are rejected by the decoder with
/// [`DecodeError::UnknownType`](crate::DecodeError::UnknownType) and never
/// reach a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize_repr, Deserialize_repr)]
#[repr(u8)]
pub enum HeaderType {
    /// Request to open a connection (`'O'`)
    Open = b'O',
    /// Server accepted the connection (`'A'`)
    Accept = b'A',
    /// Data exchange on an open connection (`'X'`)
    DataExchange = b'X',
    /// Unacknowledged connection termination (`'K'`)
    Kill = b'K',
}

impl HeaderType {
    /// All header types, in handshake order
    pub const ALL: [Self; 4] = [Self::Open, Self::Accept, Self::DataExchange, Self::Kill];

    /// Convert to raw byte value
    #[must_use]
    pub const fn to_u8(self) -> u8 {
        self as u8
    }

    /// Convert from raw byte value
    ///
    /// Returns `None` if the byte is not a defined header type.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            b'O' => Some(Self::Open),
            b'A' => Some(Self::Accept),
            b'X' => Some(Self::DataExchange),
            b'K' => Some(Self::Kill),
            _ => None,
        }
    }
}
