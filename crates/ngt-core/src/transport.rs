//! Transport abstraction for datagram I/O.
//!
//! NGT runs directly above an unreliable datagram service. Each call to
//! [`DatagramTransport::send`] carries exactly one encoded packet, and each
//! [`DatagramTransport::receive`] yields exactly one datagram. Nothing here
//! fragments, orders or retransmits.
//!
//! # Implementations
//!
//! - **`UdpTransport`** (production): tokio UDP sockets. Clients connect the
//!   socket to the server address.
//! - **`SimTransport`** (testing): Turmoil UDP sockets with virtual time and
//!   fault injection.
//!
//! The peer identity is opaque to the protocol engine. It is only compared
//! for equality and handed back to the transport when replying.

use std::{fmt, hash::Hash, io};

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Errors surfaced by a datagram transport.
#[derive(Error, Debug)]
pub enum TransportError {
    /// Underlying socket failed
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    /// Transport has been shut down
    #[error("transport closed")]
    Closed,
}

/// Abstract datagram transport.
///
/// # Lifecycle
///
/// ```text
/// Server:                      Client:
/// bind()                       bind()
///   ↓                            ↓
/// receive() ← Open ──────────── send(server, Open)
///   ↓                            ↓
/// send(peer, Accept) ─────────→ receive()
/// ```
#[async_trait]
pub trait DatagramTransport: Send + Sync + 'static {
    /// Identity of a remote endpoint (e.g. a socket address)
    type Peer: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;

    /// Send one datagram to `peer`.
    ///
    /// Delivery is not guaranteed. Success only means the datagram was handed
    /// to the network.
    async fn send(&self, peer: &Self::Peer, datagram: &[u8]) -> Result<(), TransportError>;

    /// Receive the next datagram and the peer that sent it.
    ///
    /// Blocks until a datagram arrives.
    async fn receive(&self) -> Result<(Self::Peer, Bytes), TransportError>;
}
