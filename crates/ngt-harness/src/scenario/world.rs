//! World state for scenario execution.
//!
//! The World holds any number of client connections and one server
//! registry, joined by an in-memory network. Every datagram passes through
//! the network as encoded bytes, so faults act on the wire format exactly as
//! a real link would.
//!
//! Client `i` is peer `i` from the registry's point of view.

use std::collections::VecDeque;

use bytes::{Bytes, BytesMut};
use ngt_core::{
    ChannelRegistry, ChannelService, CloseReason, Connection, ConnectionAction, ConnectionError,
    ConnectionState, OpenDecision, RegistryAction, RegistryConfig, dispatch,
};
use ngt_proto::Capabilities;
use tracing::trace;

/// One side of the in-memory network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// The server registry
    Server,
    /// Client connection by index
    Client(usize),
}

/// A datagram in flight
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Sender
    pub from: Endpoint,
    /// Receiver
    pub to: Endpoint,
    /// Encoded packet
    pub bytes: Bytes,
}

/// Fault applied to one datagram as it enters the network
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Never delivered
    Drop,
    /// Delivered twice in a row
    Duplicate,
    /// `bytes[offset] ^= mask` before delivery. Ignored past the end.
    Corrupt {
        /// Byte to damage
        offset: usize,
        /// Bits to flip
        mask: u8,
    },
    /// Held back until the next datagram has been delivered
    Delay,
}

/// Server-side application used by scenarios.
///
/// Answers every Open with a fixed decision and records what it saw.
#[derive(Debug)]
pub struct RecordingService {
    decision: OpenDecision,
    echo: bool,
    opened: Vec<(u16, Capabilities)>,
    delivered: Vec<(u16, Bytes)>,
    closed: Vec<(u16, CloseReason)>,
}

impl RecordingService {
    pub(crate) fn new(decision: OpenDecision, echo: bool) -> Self {
        Self { decision, echo, opened: Vec::new(), delivered: Vec::new(), closed: Vec::new() }
    }

    /// Established channels with their negotiated capabilities
    pub fn opened(&self) -> &[(u16, Capabilities)] {
        &self.opened
    }

    /// Payloads delivered to the server, in order
    pub fn delivered(&self) -> &[(u16, Bytes)] {
        &self.delivered
    }

    /// Connections the server saw end
    pub fn closed(&self) -> &[(u16, CloseReason)] {
        &self.closed
    }
}

impl ChannelService for RecordingService {
    fn on_open(&mut self, _channel: u16, _requested: Capabilities) -> OpenDecision {
        self.decision
    }

    fn on_established(&mut self, channel: u16, capabilities: Capabilities) {
        self.opened.push((channel, capabilities));
    }

    fn on_data(&mut self, channel: u16, body: Bytes) -> Option<Bytes> {
        self.delivered.push((channel, body.clone()));
        self.echo.then_some(body)
    }

    fn on_closed(&mut self, channel: u16, reason: CloseReason) {
        self.closed.push((channel, reason));
    }
}

/// World state: clients, server, network and counters.
pub struct World {
    clients: Vec<Connection>,
    client_events: Vec<Vec<ConnectionAction>>,
    registry: ChannelRegistry<usize>,
    service: RecordingService,
    server_actions: Vec<RegistryAction<usize>>,
    network: VecDeque<Datagram>,
    held: Vec<Datagram>,
    faults: Vec<(usize, Fault)>,
    datagrams_sent: usize,
    datagrams_delivered: usize,
    datagrams_dropped: usize,
    server_datagrams_sent: usize,
}

impl World {
    pub(crate) fn new(config: RegistryConfig, service: RecordingService) -> Self {
        Self {
            clients: Vec::new(),
            client_events: Vec::new(),
            registry: ChannelRegistry::new(config),
            service,
            server_actions: Vec::new(),
            network: VecDeque::new(),
            held: Vec::new(),
            faults: Vec::new(),
            datagrams_sent: 0,
            datagrams_delivered: 0,
            datagrams_dropped: 0,
            server_datagrams_sent: 0,
        }
    }

    pub(crate) fn add_client(&mut self, connection: Connection) {
        self.clients.push(connection);
        self.client_events.push(Vec::new());
    }

    pub(crate) fn set_faults(&mut self, faults: Vec<(usize, Fault)>) {
        self.faults = faults;
    }

    /// Client connection `index`.
    ///
    /// Panics if there is no such client.
    pub fn client(&self, index: usize) -> &Connection {
        &self.clients[index]
    }

    pub(crate) fn client_mut(&mut self, index: usize) -> &mut Connection {
        &mut self.clients[index]
    }

    /// All client connections
    pub fn clients(&self) -> &[Connection] {
        &self.clients
    }

    /// Non-send actions client `index` produced, in order.
    ///
    /// Panics if there is no such client.
    pub fn client_events(&self, index: usize) -> &[ConnectionAction] {
        &self.client_events[index]
    }

    /// Payloads delivered to client `index`, in order
    pub fn client_delivered(&self, index: usize) -> Vec<Bytes> {
        self.client_events(index)
            .iter()
            .filter_map(|event| match event {
                ConnectionAction::Deliver { body, .. } => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    /// Server registry
    pub fn registry(&self) -> &ChannelRegistry<usize> {
        &self.registry
    }

    /// Server application
    pub fn service(&self) -> &RecordingService {
        &self.service
    }

    /// Every action the registry returned for inbound datagrams, in order
    pub fn server_actions(&self) -> &[RegistryAction<usize>] {
        &self.server_actions
    }

    /// Datagrams that entered the network
    pub fn datagrams_sent(&self) -> usize {
        self.datagrams_sent
    }

    /// Datagrams handed to a receiver, duplicates included
    pub fn datagrams_delivered(&self) -> usize {
        self.datagrams_delivered
    }

    /// Datagrams lost to a `Drop` fault
    pub fn datagrams_dropped(&self) -> usize {
        self.datagrams_dropped
    }

    /// Datagrams the server put on the network
    pub fn server_datagrams_sent(&self) -> usize {
        self.server_datagrams_sent
    }

    /// True if every client and its registry entry are `Open`
    pub fn all_open(&self) -> bool {
        self.clients.iter().all(|client| {
            client.state() == ConnectionState::Open
                && self
                    .registry
                    .route(client.channel())
                    .is_some_and(|server| server.state() == ConnectionState::Open)
        })
    }

    /// Run client-side actions: sends go on the network, the rest is recorded
    pub(crate) fn client_actions(&mut self, index: usize, actions: Vec<ConnectionAction>) {
        for action in actions {
            match action {
                ConnectionAction::Send(packet) => self.transmit(Datagram {
                    from: Endpoint::Client(index),
                    to: Endpoint::Server,
                    bytes: packet.to_bytes(),
                }),
                other => self.client_events[index].push(other),
            }
        }
    }

    /// Put raw bytes on the network as if client `index` sent them
    pub(crate) fn inject(&mut self, index: usize, bytes: Bytes) {
        self.transmit(Datagram { from: Endpoint::Client(index), to: Endpoint::Server, bytes });
    }

    fn transmit(&mut self, mut datagram: Datagram) {
        let index = self.datagrams_sent;
        self.datagrams_sent += 1;

        let fault = self.faults.iter().find(|(at, _)| *at == index).map(|(_, fault)| *fault);
        trace!(index, from = ?datagram.from, to = ?datagram.to, ?fault, "datagram sent");

        match fault {
            None => self.network.push_back(datagram),
            Some(Fault::Drop) => self.datagrams_dropped += 1,
            Some(Fault::Duplicate) => {
                self.network.push_back(datagram.clone());
                self.network.push_back(datagram);
            },
            Some(Fault::Corrupt { offset, mask }) => {
                let mut bytes = BytesMut::from(datagram.bytes.as_ref());
                if let Some(byte) = bytes.get_mut(offset) {
                    *byte ^= mask;
                }
                datagram.bytes = bytes.freeze();
                self.network.push_back(datagram);
            },
            Some(Fault::Delay) => self.held.push(datagram),
        }
    }

    /// Deliver datagrams until the network is quiet.
    ///
    /// Held datagrams are released after the next delivery, or at the end if
    /// nothing else is in flight.
    pub(crate) fn run_network(&mut self) {
        loop {
            let Some(datagram) = self.network.pop_front() else {
                if self.held.is_empty() {
                    return;
                }
                self.network.extend(self.held.drain(..));
                continue;
            };

            self.deliver(datagram);
            self.network.extend(self.held.drain(..));
        }
    }

    /// Kill the server side of `channel`
    pub(crate) fn server_kill(&mut self, channel: u16) -> Result<(), ConnectionError> {
        let actions = self.registry.kill(channel)?;
        self.server_dispatch(actions);
        Ok(())
    }

    fn server_dispatch(&mut self, actions: Vec<RegistryAction<usize>>) {
        for out in dispatch(&mut self.registry, &mut self.service, actions) {
            self.server_datagrams_sent += 1;
            self.transmit(Datagram {
                from: Endpoint::Server,
                to: Endpoint::Client(out.peer),
                bytes: out.packet.to_bytes(),
            });
        }
    }

    fn deliver(&mut self, datagram: Datagram) {
        self.datagrams_delivered += 1;

        match (datagram.from, datagram.to) {
            (Endpoint::Client(peer), Endpoint::Server) => {
                let actions = self.registry.handle_datagram(&peer, &datagram.bytes);
                self.server_actions.extend(actions.iter().cloned());
                self.server_dispatch(actions);
            },
            (Endpoint::Server, Endpoint::Client(index)) => {
                let actions = self.clients[index].handle_datagram(&datagram.bytes);
                self.client_actions(index, actions);
            },
            (from, to) => trace!(?from, ?to, "no route between endpoints"),
        }
    }
}
