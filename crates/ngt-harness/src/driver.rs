//! Async drivers that run the sans-IO engine over a datagram transport.
//!
//! The drivers own everything the core leaves out: the socket, retransmission
//! of the Open, and timeouts. They execute the actions returned by
//! [`Connection`] and [`ChannelRegistry`] and nothing else.
//!
//! ```text
//! ClientDriver::connect           ServerDriver::step
//!   open() → send ─────────────────→ receive → handle_datagram
//!   sleep(retransmit_interval)         ↓
//!   retransmit_open() → send          dispatch(service)
//!   receive ←─────────────────────── send(Accept)
//!   Established                       sleep(idle_timeout) → kill
//! ```

use std::{
    collections::{HashMap, VecDeque},
    time::Duration,
};

use bytes::Bytes;
use ngt_core::{
    ChannelRegistry, ChannelService, CloseReason, Connection, ConnectionAction, ConnectionConfig,
    ConnectionError, DatagramTransport, Environment, Outgoing, RegistryConfig, TransportError,
    dispatch,
};
use ngt_proto::{Capabilities, Header, Packet};
use thiserror::Error;
use tracing::{debug, warn};

/// Timing knobs for the drivers
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Delay between Open retransmissions
    pub retransmit_interval: Duration,
    /// Total Open transmissions before giving up
    pub max_open_attempts: u32,
    /// How long `recv` waits for a datagram, and how long a server channel
    /// may stay silent before it is killed
    pub idle_timeout: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            retransmit_interval: Duration::from_millis(200),
            max_open_attempts: 5,
            idle_timeout: Duration::from_secs(10),
        }
    }
}

/// Errors surfaced by the drivers
#[derive(Error, Debug)]
pub enum DriverError {
    /// Transport failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Local operation refused by the connection
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// No answer to any Open transmission
    #[error("handshake timed out after {attempts} open attempts")]
    HandshakeTimeout {
        /// Opens sent
        attempts: u32,
    },

    /// Connection ended in `Rejected`
    #[error("connection rejected: {0}")]
    Rejected(CloseReason),

    /// Connection ended in `Closed`
    #[error("connection closed")]
    Closed,

    /// Nothing arrived within the idle timeout
    #[error("no datagram within {0:?}")]
    IdleTimeout(Duration),
}

impl DriverError {
    fn from_close(reason: CloseReason) -> Self {
        match reason {
            CloseReason::LocalKill | CloseReason::PeerKill => Self::Closed,
            other => Self::Rejected(other),
        }
    }
}

enum Progress {
    Established(Capabilities),
    Closed(CloseReason),
}

/// Client side: one connection to one server.
pub struct ClientDriver<T: DatagramTransport, E> {
    transport: T,
    env: E,
    server: T::Peer,
    connection: Connection,
    config: DriverConfig,
    inbox: VecDeque<Bytes>,
}

impl<T, E> ClientDriver<T, E>
where
    T: DatagramTransport,
    E: Environment,
{
    /// Create a driver for `channel` on `server`.
    ///
    /// The initial sequence number is drawn from `env`.
    pub fn new(transport: T, env: E, server: T::Peer, channel: u16, config: DriverConfig) -> Self {
        let initial_sequence = env.random_u8();
        let connection =
            Connection::new_initiator(channel, ConnectionConfig { initial_sequence });
        Self { transport, env, server, connection, config, inbox: VecDeque::new() }
    }

    /// Underlying connection
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Underlying transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Open the connection, retransmitting the Open until it is answered.
    ///
    /// Returns the negotiated capabilities.
    ///
    /// # Errors
    ///
    /// - `HandshakeTimeout` after `max_open_attempts` unanswered Opens. The
    ///   connection is killed locally.
    /// - `Rejected` if the server answered with a Kill
    /// - `Transport` if the socket failed
    pub async fn connect(&mut self, requested: Capabilities) -> Result<Capabilities, DriverError> {
        let actions = self.connection.open(requested)?;
        self.execute(actions).await?;

        let mut attempts = 1;
        loop {
            let env = self.env.clone();
            let timer = env.sleep(self.config.retransmit_interval);
            tokio::pin!(timer);

            let progress = loop {
                tokio::select! {
                    _ = &mut timer => break None,
                    received = self.transport.receive() => {
                        if let Some(progress) = self.on_receive(received?).await? {
                            break Some(progress);
                        }
                    }
                }
            };

            match progress {
                Some(Progress::Established(capabilities)) => return Ok(capabilities),
                Some(Progress::Closed(reason)) => return Err(DriverError::from_close(reason)),
                None if attempts >= self.config.max_open_attempts => {
                    warn!(channel = self.connection.channel(), attempts, "open never answered");
                    let actions = self.connection.kill()?;
                    self.execute(actions).await?;
                    return Err(DriverError::HandshakeTimeout { attempts });
                },
                None => {
                    attempts += 1;
                    let channel = self.connection.channel();
                    debug!(channel, attempt = attempts, "retransmitting open");
                    let actions = self.connection.retransmit_open()?;
                    self.execute(actions).await?;
                },
            }
        }
    }

    /// Send one DataExchange packet.
    ///
    /// # Errors
    ///
    /// `Connection` if the connection is not open or the body is too large.
    pub async fn send(&mut self, body: impl Into<Bytes>) -> Result<(), DriverError> {
        let actions = self.connection.send_data(body)?;
        self.execute(actions).await?;
        Ok(())
    }

    /// Wait for the next fresh payload from the server.
    ///
    /// # Errors
    ///
    /// - `IdleTimeout` if nothing usable arrives within `idle_timeout`
    /// - `Closed` or `Rejected` if the connection ends first
    pub async fn recv(&mut self) -> Result<Bytes, DriverError> {
        if let Some(body) = self.inbox.pop_front() {
            return Ok(body);
        }
        if self.connection.state().is_terminal() {
            return Err(DriverError::Closed);
        }

        let env = self.env.clone();
        let timer = env.sleep(self.config.idle_timeout);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                _ = &mut timer => return Err(DriverError::IdleTimeout(self.config.idle_timeout)),
                received = self.transport.receive() => {
                    let progress = self.on_receive(received?).await?;
                    if let Some(body) = self.inbox.pop_front() {
                        return Ok(body);
                    }
                    if let Some(Progress::Closed(reason)) = progress {
                        return Err(DriverError::from_close(reason));
                    }
                }
            }
        }
    }

    /// Kill the connection.
    ///
    /// # Errors
    ///
    /// `Connection` if there is nothing to kill.
    pub async fn close(&mut self) -> Result<(), DriverError> {
        let actions = self.connection.kill()?;
        self.execute(actions).await?;
        Ok(())
    }

    async fn on_receive(
        &mut self,
        (peer, datagram): (T::Peer, Bytes),
    ) -> Result<Option<Progress>, DriverError> {
        if peer != self.server {
            debug!(?peer, "ignoring datagram from unknown peer");
            return Ok(None);
        }
        let actions = self.connection.handle_datagram(&datagram);
        self.execute(actions).await
    }

    async fn execute(
        &mut self,
        actions: Vec<ConnectionAction>,
    ) -> Result<Option<Progress>, DriverError> {
        let mut progress = None;
        for action in actions {
            match action {
                ConnectionAction::Send(packet) => {
                    self.transport.send(&self.server, &packet.to_bytes()).await?;
                },
                ConnectionAction::Established { capabilities, .. } => {
                    progress = Some(Progress::Established(capabilities));
                },
                ConnectionAction::Deliver { body, .. } => self.inbox.push_back(body),
                ConnectionAction::Closed { reason, .. } => {
                    progress = Some(Progress::Closed(reason));
                },
                ConnectionAction::OpenRequested { channel, .. } => {
                    debug!(channel, "client ignoring open request");
                },
            }
        }
        Ok(progress)
    }
}

/// Server side: a channel registry fed from one transport.
///
/// A channel whose peer has sent nothing for `idle_timeout` is killed, so a
/// client that vanished without a Kill does not hold its channel forever.
pub struct ServerDriver<T: DatagramTransport, S, E: Environment> {
    transport: T,
    env: E,
    registry: ChannelRegistry<T::Peer>,
    service: S,
    config: DriverConfig,
    last_heard: HashMap<u16, E::Instant>,
}

impl<T, S, E> ServerDriver<T, S, E>
where
    T: DatagramTransport,
    S: ChannelService,
    E: Environment,
{
    /// Create a server with an empty registry
    pub fn new(
        transport: T,
        env: E,
        registry: RegistryConfig,
        config: DriverConfig,
        service: S,
    ) -> Self {
        Self {
            transport,
            env,
            registry: ChannelRegistry::new(registry),
            service,
            config,
            last_heard: HashMap::new(),
        }
    }

    /// Registry state
    pub fn registry(&self) -> &ChannelRegistry<T::Peer> {
        &self.registry
    }

    /// Application service
    pub fn service(&self) -> &S {
        &self.service
    }

    /// Wait for one datagram or the next idle deadline, whichever comes
    /// first, and send the resulting packets.
    ///
    /// A datagram runs through the registry and the service. A deadline kills
    /// every channel that has been idle for `idle_timeout`.
    ///
    /// Returns how many packets were sent.
    ///
    /// # Errors
    ///
    /// `Transport` if the socket failed.
    pub async fn step(&mut self) -> Result<usize, DriverError> {
        let env = self.env.clone();
        let timer = env.sleep(self.until_next_expiry());
        tokio::pin!(timer);

        tokio::select! {
            _ = &mut timer => self.expire_idle().await,
            received = self.transport.receive() => {
                let (peer, datagram) = received?;
                self.on_receive(&peer, &datagram).await
            }
        }
    }

    /// Serve until the transport fails.
    ///
    /// # Errors
    ///
    /// `Transport` if the socket failed.
    pub async fn run(&mut self) -> Result<(), DriverError> {
        loop {
            self.step().await?;
        }
    }

    async fn on_receive(&mut self, peer: &T::Peer, datagram: &[u8]) -> Result<usize, DriverError> {
        let actions = self.registry.handle_datagram(peer, datagram);

        // Only traffic from the bound peer keeps a channel alive
        if let Some(channel) = Header::peek_channel(datagram) {
            if self.registry.peer(channel) == Some(peer) {
                self.last_heard.insert(channel, self.env.now());
            }
        }

        let outgoing = dispatch(&mut self.registry, &mut self.service, actions);
        self.flush(outgoing).await
    }

    fn until_next_expiry(&mut self) -> Duration {
        let registry = &self.registry;
        self.last_heard.retain(|channel, _| registry.contains(*channel));

        let now = self.env.now();
        let idle = self.config.idle_timeout;
        self.last_heard
            .values()
            .map(|&last| idle.saturating_sub(now - last))
            .min()
            .unwrap_or(idle)
    }

    async fn expire_idle(&mut self) -> Result<usize, DriverError> {
        let now = self.env.now();
        let idle = self.config.idle_timeout;
        let expired: Vec<u16> = self
            .last_heard
            .iter()
            .filter_map(|(&channel, &last)| (now - last >= idle).then_some(channel))
            .collect();

        let mut outgoing = Vec::new();
        for channel in expired {
            self.last_heard.remove(&channel);
            match self.registry.kill(channel) {
                Ok(actions) => {
                    warn!(channel, ?idle, "killing idle channel");
                    outgoing.extend(dispatch(&mut self.registry, &mut self.service, actions));
                },
                Err(err) => debug!(channel, %err, "idle channel already released"),
            }
        }
        self.flush(outgoing).await
    }

    async fn flush(&self, outgoing: Vec<Outgoing<T::Peer>>) -> Result<usize, DriverError> {
        let sent = outgoing.len();
        for out in outgoing {
            self.send(&out.peer, &out.packet).await?;
        }
        Ok(sent)
    }

    async fn send(&self, peer: &T::Peer, packet: &Packet) -> Result<(), DriverError> {
        self.transport.send(peer, &packet.to_bytes()).await?;
        Ok(())
    }
}
