//! Datagram transport over real UDP sockets.

use std::{
    io,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr},
};

use async_trait::async_trait;
use bytes::Bytes;
use ngt_core::{DatagramTransport, TransportError};
use tokio::net::{ToSocketAddrs, UdpSocket};
use tracing::{debug, trace};

use crate::sim_transport::MAX_DATAGRAM_SIZE;

/// Production transport over a tokio UDP socket.
///
/// A server binds a known address with [`UdpTransport::bind`] and talks to
/// every client through it. A client uses [`UdpTransport::connect`], which
/// binds an ephemeral port and connects the socket to the server, so the
/// kernel filters out datagrams from anyone else.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    connected: Option<SocketAddr>,
}

impl UdpTransport {
    /// Bind a socket to `address`.
    ///
    /// # Errors
    ///
    /// Returns error if the address is in use or does not resolve.
    pub async fn bind(address: impl ToSocketAddrs) -> io::Result<Self> {
        let socket = UdpSocket::bind(address).await?;
        debug!(local = ?socket.local_addr()?, "bound udp transport");
        Ok(Self { socket, connected: None })
    }

    /// Bind an ephemeral port of the same address family as `server` and
    /// connect the socket to it.
    ///
    /// # Errors
    ///
    /// Returns error if binding or connecting the socket fails.
    pub async fn connect(server: SocketAddr) -> io::Result<Self> {
        let local = match server {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(server).await?;
        debug!(local = ?socket.local_addr()?, %server, "connected udp transport");
        Ok(Self { socket, connected: Some(server) })
    }

    /// Address this transport is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Server this transport is connected to, if any.
    pub fn server(&self) -> Option<SocketAddr> {
        self.connected
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    type Peer = SocketAddr;

    async fn send(&self, peer: &SocketAddr, datagram: &[u8]) -> Result<(), TransportError> {
        trace!(%peer, len = datagram.len(), "udp send");
        match self.connected {
            Some(server) if server == *peer => self.socket.send(datagram).await?,
            _ => self.socket.send_to(datagram, *peer).await?,
        };
        Ok(())
    }

    async fn receive(&self) -> Result<(SocketAddr, Bytes), TransportError> {
        let mut buffer = vec![0u8; MAX_DATAGRAM_SIZE];
        let (len, peer) = self.socket.recv_from(&mut buffer).await?;
        buffer.truncate(len);
        trace!(%peer, len, "udp receive");
        Ok((peer, Bytes::from(buffer)))
    }
}
