//! Channel Registry
//!
//! Server-side map from channel to the responder connection handling it.
//!
//! ## Architecture
//!
//! ```text
//! Server driver
//!   ├─ DatagramTransport (bytes in/out)
//!   ├─ ChannelRegistry ← THIS MODULE
//!   │   └─ Connection (one responder per channel)
//!   └─ ChannelService (application decisions and payloads)
//! ```
//!
//! ## Responsibilities
//!
//! 1. **Routing**: Find the connection bound to a channel
//! 2. **Admission**: Create a connection for an Open on a free channel,
//!    refuse an Open on an occupied one
//! 3. **Release**: Drop connections as soon as they reach a terminal state
//! 4. **Action Generation**: Return actions for the driver to execute
//!
//! ## Design Decisions
//!
//! - **One connection per channel**: An Open for an occupied channel is
//!   answered with a Kill and the existing connection is left untouched
//! - **Peer binding**: A channel is bound to the peer that opened it. Packets
//!   from anyone else are dropped without an answer
//! - **Sans-IO**: All methods return actions, no direct I/O
//! - **Generic over peer**: The registry never interprets peer identities

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use bytes::Bytes;
use ngt_proto::{Capabilities, DecodeError, Header, HeaderType, Packet};
use tracing::{debug, warn};

use crate::{
    connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState},
    error::{CloseReason, ConnectionError, ProtocolViolation},
};

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capabilities this server supports
    pub supported: Capabilities,
    /// Maximum number of concurrently bound channels
    pub max_connections: usize,
    /// Configuration for each responder connection
    pub connection: ConnectionConfig,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            supported: Capabilities::PERIODIC_CHECK,
            max_connections: 1024,
            connection: ConnectionConfig::default(),
        }
    }
}

/// Why an inbound datagram produced no protocol activity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Datagram failed to decode
    Decode(DecodeError),
    /// Protocol violation with no connection to kill
    Violation(ProtocolViolation),
    /// Non-Open packet for a channel nobody holds
    NoConnection {
        /// Channel the packet was addressed to
        channel: u16,
    },
    /// Packet for a channel bound to a different peer
    PeerMismatch {
        /// Channel the packet was addressed to
        channel: u16,
    },
}

/// Actions returned by the registry for the driver to execute.
///
/// Generic over `P` (peer identity) so any transport addressing works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryAction<P> {
    /// Send this packet to `peer`
    Send {
        /// Destination
        peer: P,
        /// Packet to encode and send
        packet: Packet,
    },

    /// A peer wants to open `channel`. Answer with `accept` or `reject`.
    OpenRequested {
        /// Channel now awaiting a decision
        channel: u16,
        /// Peer that sent the Open
        peer: P,
        /// Requested capabilities
        requested: Capabilities,
    },

    /// Connection on `channel` is open
    Established {
        /// Channel of the connection
        channel: u16,
        /// Negotiated capabilities
        capabilities: Capabilities,
    },

    /// Application data arrived on `channel`
    Deliver {
        /// Channel of the connection
        channel: u16,
        /// Opaque payload
        body: Bytes,
    },

    /// Connection on `channel` ended and was removed from the registry
    Released {
        /// Channel that is free again
        channel: u16,
        /// Terminal state reached
        state: ConnectionState,
        /// Why it ended
        reason: CloseReason,
    },

    /// An Open was refused with a Kill. Any existing connection is untouched.
    Refused {
        /// Channel the Open asked for
        channel: u16,
        /// Peer that sent the Open
        peer: P,
        /// Why it was refused
        violation: ProtocolViolation,
    },

    /// Datagram was dropped without an answer
    Dropped {
        /// Why it was dropped
        reason: DropReason,
    },
}

#[derive(Debug)]
struct Binding<P> {
    peer: P,
    connection: Connection,
}

/// Maps channels to their responder connections.
#[derive(Debug)]
pub struct ChannelRegistry<P> {
    config: RegistryConfig,
    bindings: HashMap<u16, Binding<P>>,
}

impl<P> ChannelRegistry<P>
where
    P: Clone + Eq + fmt::Debug,
{
    /// Create an empty registry
    #[must_use]
    pub fn new(config: RegistryConfig) -> Self {
        Self { config, bindings: HashMap::new() }
    }

    /// Get configuration
    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// Connection bound to `channel`, if any
    #[must_use]
    pub fn route(&self, channel: u16) -> Option<&Connection> {
        self.bindings.get(&channel).map(|binding| &binding.connection)
    }

    /// Mutable access to the connection bound to `channel`.
    ///
    /// Actions produced through this reference bypass the registry, so a
    /// connection driven to a terminal state here stays bound until
    /// [`ChannelRegistry::release`] is called.
    pub fn route_mut(&mut self, channel: u16) -> Option<&mut Connection> {
        self.bindings.get_mut(&channel).map(|binding| &mut binding.connection)
    }

    /// Peer bound to `channel`, if any
    #[must_use]
    pub fn peer(&self, channel: u16) -> Option<&P> {
        self.bindings.get(&channel).map(|binding| &binding.peer)
    }

    /// Returns true if `channel` has a bound connection
    #[must_use]
    pub fn contains(&self, channel: u16) -> bool {
        self.bindings.contains_key(&channel)
    }

    /// Number of bound channels
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Returns true if no channel is bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bound channels, in no particular order
    pub fn channels(&self) -> impl Iterator<Item = u16> + '_ {
        self.bindings.keys().copied()
    }

    /// Process a raw datagram from `peer`.
    ///
    /// A datagram that fails to decode is never answered. If it carries the
    /// NGT magic and names a channel bound to `peer`, that connection moves to
    /// `Rejected` and is released. Anything else is dropped without touching
    /// a connection.
    pub fn handle_datagram(&mut self, peer: &P, datagram: &[u8]) -> Vec<RegistryAction<P>> {
        let err = match Packet::decode(datagram) {
            Ok(packet) => return self.handle_packet(peer, &packet),
            Err(err) => err,
        };

        let owned = Header::peek_channel(datagram).filter(|&c| self.peer(c) == Some(peer));
        let Some(channel) = owned else {
            debug!(?peer, %err, "dropping undecodable datagram");
            return vec![RegistryAction::Dropped { reason: DropReason::Decode(err) }];
        };

        let actions = match self.bindings.get_mut(&channel) {
            Some(binding) => binding.connection.handle_datagram(datagram),
            None => Vec::new(),
        };
        if actions.is_empty() {
            return vec![RegistryAction::Dropped { reason: DropReason::Decode(err) }];
        }
        warn!(channel, ?peer, %err, "malformed datagram on bound channel");
        self.finish(channel, actions)
    }

    /// Process a decoded packet from `peer`.
    pub fn handle_packet(&mut self, peer: &P, packet: &Packet) -> Vec<RegistryAction<P>> {
        if packet.header_type() == Some(HeaderType::Open) {
            return self.handle_open(peer, packet);
        }

        let channel = packet.channel();
        let Some(binding) = self.bindings.get_mut(&channel) else {
            debug!(channel, ?peer, "dropping packet for unbound channel");
            return vec![RegistryAction::Dropped { reason: DropReason::NoConnection { channel } }];
        };

        if binding.peer != *peer {
            debug!(channel, ?peer, bound = ?binding.peer, "dropping packet from foreign peer");
            return vec![RegistryAction::Dropped { reason: DropReason::PeerMismatch { channel } }];
        }

        let actions = binding.connection.handle_packet(packet);
        self.finish(channel, actions)
    }

    fn handle_open(&mut self, peer: &P, packet: &Packet) -> Vec<RegistryAction<P>> {
        let channel = packet.channel();

        let length = packet.header().length();
        if length != 0 {
            let violation = ProtocolViolation::OpenWithBody { length };
            warn!(channel, ?peer, %violation, "dropping open");
            return vec![RegistryAction::Dropped { reason: DropReason::Violation(violation) }];
        }

        if let Some(binding) = self.bindings.get_mut(&channel) {
            if binding.peer == *peer && binding.connection.is_retransmitted_open(packet.header()) {
                let actions = binding.connection.handle_packet(packet);
                return self.finish(channel, actions);
            }
            return self.refuse(peer, packet, ProtocolViolation::DuplicateOpen { channel });
        }

        if self.bindings.len() >= self.config.max_connections {
            let limit = self.config.max_connections;
            return self.refuse(peer, packet, ProtocolViolation::ChannelLimitReached { limit });
        }

        let mut connection = Connection::new_responder(channel, self.config.connection.clone());
        let actions = connection.handle_packet(packet);
        debug!(channel, ?peer, "bound channel");
        self.bindings.insert(channel, Binding { peer: peer.clone(), connection });
        self.finish(channel, actions)
    }

    fn refuse(
        &self,
        peer: &P,
        packet: &Packet,
        violation: ProtocolViolation,
    ) -> Vec<RegistryAction<P>> {
        warn!(channel = packet.channel(), ?peer, %violation, "refusing open");
        let kill = Packet::control(packet.header().with_header_type(HeaderType::Kill));
        vec![
            RegistryAction::Send { peer: peer.clone(), packet: kill },
            RegistryAction::Refused { channel: packet.channel(), peer: peer.clone(), violation },
        ]
    }

    /// Accept the pending Open on `channel`, negotiating against
    /// [`RegistryConfig::supported`].
    ///
    /// # Errors
    ///
    /// - `UnknownChannel` if nothing is bound to `channel`
    /// - `InvalidState` if the connection is not awaiting a decision
    pub fn accept(&mut self, channel: u16) -> Result<Vec<RegistryAction<P>>, ConnectionError> {
        let supported = self.config.supported;
        self.drive(channel, |connection| connection.accept(supported))
    }

    /// Reject the pending Open on `channel`.
    ///
    /// # Errors
    ///
    /// - `UnknownChannel` if nothing is bound to `channel`
    /// - `InvalidState` if the connection is not awaiting a decision
    pub fn reject(&mut self, channel: u16) -> Result<Vec<RegistryAction<P>>, ConnectionError> {
        self.drive(channel, Connection::reject)
    }

    /// Send application data on `channel`.
    ///
    /// # Errors
    ///
    /// - `UnknownChannel` if nothing is bound to `channel`
    /// - `InvalidState` if the connection is not open
    /// - `Encode` if the body does not fit one packet
    pub fn send_data(
        &mut self,
        channel: u16,
        body: impl Into<Bytes>,
    ) -> Result<Vec<RegistryAction<P>>, ConnectionError> {
        self.drive(channel, |connection| connection.send_data(body))
    }

    /// Terminate the connection on `channel`.
    ///
    /// # Errors
    ///
    /// - `UnknownChannel` if nothing is bound to `channel`
    pub fn kill(&mut self, channel: u16) -> Result<Vec<RegistryAction<P>>, ConnectionError> {
        self.drive(channel, Connection::kill)
    }

    /// Remove the connection on `channel` if it has terminated.
    ///
    /// Every registry operation already releases the connections it
    /// terminates, so after those this returns `None`. Only a connection
    /// driven through [`ChannelRegistry::route_mut`] can be waiting here.
    pub fn release(&mut self, channel: u16) -> Option<Connection> {
        let terminal = self.route(channel).is_some_and(|c| c.state().is_terminal());
        if !terminal {
            return None;
        }
        debug!(channel, "released channel");
        self.bindings.remove(&channel).map(|binding| binding.connection)
    }

    fn drive<F>(&mut self, channel: u16, op: F) -> Result<Vec<RegistryAction<P>>, ConnectionError>
    where
        F: FnOnce(&mut Connection) -> Result<Vec<ConnectionAction>, ConnectionError>,
    {
        let binding =
            self.bindings.get_mut(&channel).ok_or(ConnectionError::UnknownChannel(channel))?;
        let actions = op(&mut binding.connection)?;
        Ok(self.finish(channel, actions))
    }

    /// Attach peers to connection actions and release the binding if the
    /// connection terminated.
    fn finish(&mut self, channel: u16, actions: Vec<ConnectionAction>) -> Vec<RegistryAction<P>> {
        let Some(binding) = self.bindings.get(&channel) else {
            return Vec::new();
        };
        let peer = binding.peer.clone();

        let converted = actions
            .into_iter()
            .map(|action| match action {
                ConnectionAction::Send(packet) => {
                    RegistryAction::Send { peer: peer.clone(), packet }
                },
                ConnectionAction::OpenRequested { channel, requested } => {
                    RegistryAction::OpenRequested { channel, peer: peer.clone(), requested }
                },
                ConnectionAction::Established { channel, capabilities } => {
                    RegistryAction::Established { channel, capabilities }
                },
                ConnectionAction::Deliver { channel, body } => {
                    RegistryAction::Deliver { channel, body }
                },
                ConnectionAction::Closed { channel, state, reason } => {
                    RegistryAction::Released { channel, state, reason }
                },
            })
            .collect();

        if binding.connection.state().is_terminal() {
            debug!(channel, state = ?binding.connection.state(), "released channel");
            self.bindings.remove(&channel);
        }

        converted
    }
}

/// Registry shared between dispatcher threads.
///
/// Each call takes the lock for the duration of one registry operation. The
/// registry never calls back into application code, so holding it cannot
/// deadlock.
#[derive(Debug)]
pub struct SharedRegistry<P> {
    inner: Arc<Mutex<ChannelRegistry<P>>>,
}

impl<P> Clone for SharedRegistry<P> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<P> SharedRegistry<P>
where
    P: Clone + Eq + fmt::Debug,
{
    /// Wrap a registry for shared access
    #[must_use]
    pub fn new(registry: ChannelRegistry<P>) -> Self {
        Self { inner: Arc::new(Mutex::new(registry)) }
    }

    /// Run `f` with exclusive access to the registry.
    ///
    /// A panic in another holder does not poison the registry: every
    /// operation leaves it consistent before it can panic.
    pub fn with<R>(&self, f: impl FnOnce(&mut ChannelRegistry<P>) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Process a raw datagram from `peer`
    pub fn handle_datagram(&self, peer: &P, datagram: &[u8]) -> Vec<RegistryAction<P>> {
        self.with(|registry| registry.handle_datagram(peer, datagram))
    }
}
