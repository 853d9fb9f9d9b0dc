//! Turmoil-based datagram transports.

use std::{
    io,
    net::SocketAddr,
    sync::atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;
use ngt_core::{DatagramTransport, TransportError};
use ngt_proto::Header;
use tracing::trace;
use turmoil::net::UdpSocket;

/// Largest datagram the transport will read: a full header plus the largest
/// body the length field can describe.
pub const MAX_DATAGRAM_SIZE: usize = Header::SIZE + Header::MAX_BODY_SIZE;

/// Simulation transport over Turmoil's UDP sockets.
///
/// - **Deterministic delivery**: Turmoil controls ordering and timing
/// - **Fault injection**: `fail_rate`, latency and partitions apply to every
///   datagram
/// - **Datagram semantics**: One `send` is one UDP datagram, nothing is
///   retransmitted below the protocol engine
pub struct SimTransport {
    socket: UdpSocket,
}

impl SimTransport {
    /// Binds a UDP socket on the current simulated host.
    ///
    /// # Errors
    ///
    /// Returns error if the address is already in use or cannot be parsed.
    pub async fn bind(address: &str) -> io::Result<Self> {
        let socket = UdpSocket::bind(address).await?;
        Ok(Self { socket })
    }

    /// Address this transport is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

/// Resolve a simulated host name and port to a peer address.
///
/// # Panics
///
/// Panics outside a Turmoil simulation or if `host` is not registered.
pub fn peer_address(host: &str, port: u16) -> SocketAddr {
    SocketAddr::new(turmoil::lookup(host), port)
}

#[async_trait]
impl DatagramTransport for SimTransport {
    type Peer = SocketAddr;

    async fn send(&self, peer: &SocketAddr, datagram: &[u8]) -> Result<(), TransportError> {
        self.socket.send_to(datagram, *peer).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<(SocketAddr, Bytes), TransportError> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, peer) = self.socket.recv_from(&mut buffer).await?;
        buffer.truncate(len);
        Ok((peer, Bytes::from(buffer)))
    }
}

/// Wrapper that silently drops the first `n` outgoing datagrams.
///
/// Turmoil's `fail_rate` is random. This gives a test an exact loss pattern,
/// e.g. "the first Open never arrives".
pub struct LossyTransport<T> {
    inner: T,
    remaining: AtomicUsize,
    dropped: AtomicUsize,
}

impl<T> LossyTransport<T> {
    /// Wrap `inner`, dropping its first `drop_first` sends
    pub fn new(inner: T, drop_first: usize) -> Self {
        Self { inner, remaining: AtomicUsize::new(drop_first), dropped: AtomicUsize::new(0) }
    }

    /// Number of datagrams dropped so far
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Unwrap the inner transport
    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[async_trait]
impl<T: DatagramTransport> DatagramTransport for LossyTransport<T> {
    type Peer = T::Peer;

    async fn send(&self, peer: &T::Peer, datagram: &[u8]) -> Result<(), TransportError> {
        let lose = self
            .remaining
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok();

        if lose {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!(?peer, len = datagram.len(), "lossy transport dropped datagram");
            return Ok(());
        }

        self.inner.send(peer, datagram).await
    }

    async fn receive(&self) -> Result<(T::Peer, Bytes), TransportError> {
        self.inner.receive().await
    }
}
