//! Error types for the NGT protocol core.
//!
//! Three kinds of failure are kept apart:
//! - [`ProtocolViolation`]: the peer broke the protocol. Answered with a Kill
//!   where a connection exists, dropped otherwise.
//! - [`CloseReason`]: why a connection reached a terminal state, surfaced to
//!   the application.
//! - [`ConnectionError`]: the local caller misused the API. Nothing is sent.

use std::{fmt, io};

use ngt_proto::{DecodeError, EncodeError, HeaderType};
use thiserror::Error;

use crate::connection::ConnectionState;

/// Peer behavior that the protocol forbids.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Open for a channel that already has an active connection
    #[error("duplicate open on active channel {channel}")]
    DuplicateOpen {
        /// Occupied channel
        channel: u16,
    },

    /// DataExchange sequence number is neither next nor a retransmission
    #[error("sequence reordered: expected {expected}, received {received}")]
    SequenceReordered {
        /// Next sequence number the connection would accept
        expected: u8,
        /// Sequence number that arrived
        received: u8,
    },

    /// Open header carrying a body
    #[error("open must carry an empty body, got length {length}")]
    OpenWithBody {
        /// Length claimed by the header
        length: u16,
    },

    /// Accept does not echo the Open's sequence number
    #[error("accept does not echo open sequence: expected {expected}, received {received}")]
    AcceptSequenceMismatch {
        /// Sequence number of the Open sent
        expected: u8,
        /// Sequence number carried by the Accept
        received: u8,
    },

    /// Header type is not valid in the connection's current state
    #[error("unexpected {header_type:?} header in state {state:?}")]
    UnexpectedHeader {
        /// State when the header arrived
        state: ConnectionState,
        /// Type of the offending header
        header_type: HeaderType,
    },

    /// Server already holds its maximum number of connections
    #[error("connection limit of {limit} reached")]
    ChannelLimitReached {
        /// Configured maximum
        limit: usize,
    },
}

/// Why a connection reached `Closed` or `Rejected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Local side sent a Kill on an open connection
    LocalKill,
    /// Peer sent a Kill on an open or pending connection
    PeerKill,
    /// Local side declined the handshake
    LocalReject,
    /// Peer declined the handshake
    PeerReject,
    /// Peer broke the protocol
    Violation(ProtocolViolation),
    /// Datagram failed to decode while the connection was active
    Malformed(DecodeError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LocalKill => write!(f, "closed locally"),
            Self::PeerKill => write!(f, "killed by peer"),
            Self::LocalReject => write!(f, "rejected locally"),
            Self::PeerReject => write!(f, "rejected by peer"),
            Self::Violation(violation) => write!(f, "protocol violation: {violation}"),
            Self::Malformed(err) => write!(f, "malformed datagram: {err}"),
        }
    }
}

/// Errors returned to the local caller by connection operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// Operation is not valid in the current state
    InvalidState {
        /// Current state when error occurred
        state: ConnectionState,
        /// Operation that was attempted
        operation: &'static str,
    },

    /// Outgoing packet could not be built
    Encode(EncodeError),

    /// No connection is bound to this channel
    UnknownChannel(u16),
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidState { state, operation } => {
                write!(f, "invalid state transition: cannot {} from {:?}", operation, state)
            },
            Self::Encode(err) => write!(f, "encode error: {}", err),
            Self::UnknownChannel(channel) => write!(f, "no connection on channel {}", channel),
        }
    }
}

impl std::error::Error for ConnectionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Encode(err) => Some(err),
            Self::InvalidState { .. } | Self::UnknownChannel(_) => None,
        }
    }
}

impl From<EncodeError> for ConnectionError {
    fn from(err: EncodeError) -> Self {
        Self::Encode(err)
    }
}

impl ConnectionError {
    /// Returns true if the connection this error came from is gone for good.
    ///
    /// Misuse of a live connection (wrong state, oversized body) leaves it
    /// untouched and the caller may carry on. A terminal or missing
    /// connection will never accept another operation.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::InvalidState { state, .. } => state.is_terminal(),
            Self::UnknownChannel(_) => true,
            Self::Encode(_) => false,
        }
    }
}

/// Convert ConnectionError to io::Error for compatibility with async I/O APIs.
///
/// This is only for boundary conversion - internally we use ConnectionError.
impl From<ConnectionError> for io::Error {
    fn from(err: ConnectionError) -> Self {
        let kind = match &err {
            ConnectionError::InvalidState { state, .. } if state.is_terminal() => {
                io::ErrorKind::NotConnected
            },
            ConnectionError::InvalidState { .. } => io::ErrorKind::InvalidInput,
            ConnectionError::Encode(_) => io::ErrorKind::InvalidInput,
            ConnectionError::UnknownChannel(_) => io::ErrorKind::NotFound,
        };
        io::Error::new(kind, err.to_string())
    }
}
