//! Connection state machine for the NGT protocol.
//!
//! One [`Connection`] drives a single logical session on one channel, in
//! either the initiator (client) or responder (server) role.
//!
//! # Architecture: Action-Based State Machine
//!
//! - Methods never perform I/O and never block
//! - Local operations return `Result<Vec<ConnectionAction>, ConnectionError>`
//! - Inbound packets return `Vec<ConnectionAction>`: a peer can break the
//!   protocol, but that is an event to report, not a local error
//! - Driver code executes actions (send packets, notify the application)
//!
//! # State Machine
//!
//! ```text
//!              Initiator                           Responder
//!
//! ┌──────┐ open() ┌─────────┐          ┌──────┐ Open ┌──────────────────┐
//! │ Idle │───────>│ Opening │          │ Idle │─────>│ AwaitingDecision │
//! └──────┘        └─────────┘          └──────┘      └──────────────────┘
//!                  │       │                            │            │
//!           Accept │       │ Kill                accept()│            │ reject()
//!                  ↓       ↓                            ↓            ↓
//!             ┌──────┐ ┌──────────┐                 ┌──────┐   ┌──────────┐
//!             │ Open │ │ Rejected │                 │ Open │   │ Rejected │
//!             └──────┘ └──────────┘                 └──────┘   └──────────┘
//!                │ Kill (either side)                  │
//!                ↓                                     ↓
//!             ┌────────┐                           ┌────────┐
//!             │ Closed │                           │ Closed │
//!             └────────┘                           └────────┘
//! ```
//!
//! # Failure Semantics
//!
//! - Datagrams that fail to decode are never answered. An active connection
//!   that receives one moves to `Rejected` silently.
//! - Protocol violations on an existing connection are answered with a Kill
//!   and move it to `Rejected`.
//! - Kill is never acknowledged.
//! - Nothing is retried here. [`Connection::retransmit_open`] exists for a
//!   driver that wants to resend an unanswered Open after a timeout.

use bytes::Bytes;
use ngt_proto::{Capabilities, Header, HeaderType, Packet, negotiate};
use tracing::{debug, warn};

use crate::{
    error::{CloseReason, ConnectionError, ProtocolViolation},
    sequence::{SequenceClass, SequenceTracker},
};

/// Actions returned by the connection state machine.
///
/// The driver executes these in order:
/// - `Send`: Encode the packet and hand it to the transport
/// - Everything else: Surface to the application layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Send this packet to the peer
    Send(Packet),

    /// Peer asked to open a connection. Answer with `accept` or `reject`.
    OpenRequested {
        /// Channel the peer wants to open
        channel: u16,
        /// Capabilities the peer asked for, reserved bits removed
        requested: Capabilities,
    },

    /// Handshake complete, data exchange permitted
    Established {
        /// Channel of the connection
        channel: u16,
        /// Negotiated capability set
        capabilities: Capabilities,
    },

    /// Body of a fresh DataExchange packet
    Deliver {
        /// Channel of the connection
        channel: u16,
        /// Opaque application payload
        body: Bytes,
    },

    /// Connection reached a terminal state
    Closed {
        /// Channel of the connection
        channel: u16,
        /// `Closed` or `Rejected`
        state: ConnectionState,
        /// Why it ended
        reason: CloseReason,
    },
}

/// Which side of the handshake a connection plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends the Open (client)
    Initiator,
    /// Receives the Open and decides (server)
    Responder,
}

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// No handshake traffic yet
    Idle,
    /// Initiator sent Open, waiting for Accept or Kill
    Opening,
    /// Responder received Open, waiting for the local decision
    AwaitingDecision,
    /// Handshake complete
    Open,
    /// Terminated after being open
    Closed,
    /// Handshake failed or protocol violated
    Rejected,
}

impl ConnectionState {
    /// `Closed` or `Rejected`
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Rejected)
    }

    /// Handshake in progress or complete, not yet terminated
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Opening | Self::AwaitingDecision | Self::Open)
    }
}

/// Connection configuration
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    /// Sequence number carried by the first header this side sends
    pub initial_sequence: u8,
}

/// Connection state machine
///
/// This is a pure state machine: no I/O, no clock, no randomness. A driver
/// that wants a random initial sequence picks it and passes it through
/// [`ConnectionConfig`].
#[derive(Debug, Clone)]
pub struct Connection {
    role: Role,
    channel: u16,
    state: ConnectionState,
    sequence: SequenceTracker,
    requested: Capabilities,
    negotiated: Capabilities,
    /// Initiator: Open sent. Responder: Open received.
    open_header: Option<Header>,
    /// Responder: Accept sent, replayed for retransmitted Opens
    accept: Option<Packet>,
}

impl Connection {
    /// Create a client-side connection in [`ConnectionState::Idle`]
    #[must_use]
    pub fn new_initiator(channel: u16, config: ConnectionConfig) -> Self {
        Self::new(Role::Initiator, channel, config)
    }

    /// Create a server-side connection in [`ConnectionState::Idle`]
    #[must_use]
    pub fn new_responder(channel: u16, config: ConnectionConfig) -> Self {
        Self::new(Role::Responder, channel, config)
    }

    fn new(role: Role, channel: u16, config: ConnectionConfig) -> Self {
        Self {
            role,
            channel,
            state: ConnectionState::Idle,
            sequence: SequenceTracker::new(config.initial_sequence),
            requested: Capabilities::empty(),
            negotiated: Capabilities::empty(),
            open_header: None,
            accept: None,
        }
    }

    /// Get role
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// Get channel
    #[must_use]
    pub fn channel(&self) -> u16 {
        self.channel
    }

    /// Get current state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Capabilities requested in the Open
    #[must_use]
    pub fn requested(&self) -> Capabilities {
        self.requested
    }

    /// Negotiated capabilities (empty until `Open`)
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.negotiated
    }

    /// Sequence bookkeeping
    #[must_use]
    pub fn sequence(&self) -> &SequenceTracker {
        &self.sequence
    }

    /// Sequence number of the Open that started this connection
    #[must_use]
    pub fn open_sequence(&self) -> Option<u8> {
        self.open_header.map(|header| header.sequence())
    }

    /// Returns true if `header` is a resend of the Open this connection
    /// already answered or is deciding on.
    #[must_use]
    pub fn is_retransmitted_open(&self, header: &Header) -> bool {
        self.role == Role::Responder
            && matches!(self.state, ConnectionState::AwaitingDecision | ConnectionState::Open)
            && self.open_header.as_ref() == Some(header)
    }

    fn transition(&mut self, to: ConnectionState) {
        debug!(channel = self.channel, role = ?self.role, from = ?self.state, ?to, "connection state change");
        self.state = to;
    }

    fn invalid(&self, operation: &'static str) -> ConnectionError {
        ConnectionError::InvalidState { state: self.state, operation }
    }

    fn closed(&self, reason: CloseReason) -> ConnectionAction {
        ConnectionAction::Closed { channel: self.channel, state: self.state, reason }
    }

    /// Client: initiate handshake
    ///
    /// Transitions to `Opening` and returns `Send(Open)`. The Open carries an
    /// empty body and consumes one sequence number.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if not an idle initiator
    /// - `Encode` if `requested` has reserved bits set
    pub fn open(
        &mut self,
        requested: Capabilities,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.role != Role::Initiator || self.state != ConnectionState::Idle {
            return Err(self.invalid("open"));
        }

        let header = Header::new(HeaderType::Open, self.channel)
            .with_capabilities(requested)
            .with_sequence(self.sequence.next_send_seq());
        let packet = Packet::new(header, Bytes::new())?;
        self.sequence.advance_send();

        self.requested = requested;
        self.open_header = Some(*packet.header());
        self.transition(ConnectionState::Opening);

        Ok(vec![ConnectionAction::Send(packet)])
    }

    /// Client: resend the Open while still waiting for an answer.
    ///
    /// The packet is byte-identical to the original, so the responder can
    /// recognise it as a retransmission.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless in `Opening`
    pub fn retransmit_open(&self) -> Result<Vec<ConnectionAction>, ConnectionError> {
        match (self.state, self.open_header) {
            (ConnectionState::Opening, Some(header)) => {
                Ok(vec![ConnectionAction::Send(Packet::control(header))])
            },
            _ => Err(self.invalid("retransmit_open")),
        }
    }

    /// Server: accept the pending Open
    ///
    /// The Accept echoes the channel and the Open's sequence number and
    /// carries `negotiate(requested, supported)`. It does not consume a
    /// sequence number of its own.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless in `AwaitingDecision`
    pub fn accept(
        &mut self,
        supported: Capabilities,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let (ConnectionState::AwaitingDecision, Some(open)) = (self.state, self.open_header) else {
            return Err(self.invalid("accept"));
        };

        self.negotiated = negotiate(self.requested, supported);
        let header = Header::new(HeaderType::Accept, self.channel)
            .with_capabilities(self.negotiated)
            .with_sequence(open.sequence());
        let accept = Packet::control(header);
        self.accept = Some(accept.clone());
        self.transition(ConnectionState::Open);

        Ok(vec![ConnectionAction::Send(accept), ConnectionAction::Established {
            channel: self.channel,
            capabilities: self.negotiated,
        }])
    }

    /// Server: decline the pending Open
    ///
    /// The received Open is echoed back as a Kill.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` unless in `AwaitingDecision`
    pub fn reject(&mut self) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let (ConnectionState::AwaitingDecision, Some(open)) = (self.state, self.open_header) else {
            return Err(self.invalid("reject"));
        };

        let kill = Packet::control(open.with_header_type(HeaderType::Kill));
        self.transition(ConnectionState::Rejected);

        Ok(vec![ConnectionAction::Send(kill), self.closed(CloseReason::LocalReject)])
    }

    /// Send application data on an open connection
    ///
    /// # Errors
    ///
    /// - `InvalidState` unless in `Open`
    /// - `Encode` if the body does not fit one packet
    pub fn send_data(
        &mut self,
        body: impl Into<Bytes>,
    ) -> Result<Vec<ConnectionAction>, ConnectionError> {
        if self.state != ConnectionState::Open {
            return Err(self.invalid("send_data"));
        }

        let header = Header::new(HeaderType::DataExchange, self.channel)
            .with_capabilities(self.negotiated)
            .with_sequence(self.sequence.next_send_seq());
        let packet = Packet::new(header, body)?;
        self.sequence.advance_send();

        Ok(vec![ConnectionAction::Send(packet)])
    }

    /// Terminate the connection unilaterally
    ///
    /// - `Opening`: sends Kill so the server can release its entry, moves to
    ///   `Rejected`
    /// - `AwaitingDecision`: same as [`Connection::reject`]
    /// - `Open`: sends Kill, moves to `Closed`
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside those states
    pub fn kill(&mut self) -> Result<Vec<ConnectionAction>, ConnectionError> {
        let next = match self.state {
            ConnectionState::AwaitingDecision => return self.reject(),
            ConnectionState::Opening => ConnectionState::Rejected,
            ConnectionState::Open => ConnectionState::Closed,
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Rejected => {
                return Err(self.invalid("kill"));
            },
        };

        let kill = self.kill_packet();
        self.transition(next);

        Ok(vec![ConnectionAction::Send(kill), self.closed(CloseReason::LocalKill)])
    }

    fn kill_packet(&mut self) -> Packet {
        let header = Header::new(HeaderType::Kill, self.channel)
            .with_capabilities(self.negotiated)
            .with_sequence(self.sequence.advance_send());
        Packet::control(header)
    }

    fn violation(&mut self, violation: ProtocolViolation) -> Vec<ConnectionAction> {
        warn!(channel = self.channel, role = ?self.role, state = ?self.state, %violation, "protocol violation");
        let kill = self.kill_packet();
        self.transition(ConnectionState::Rejected);
        vec![ConnectionAction::Send(kill), self.closed(CloseReason::Violation(violation))]
    }

    /// Process a raw datagram from the peer.
    ///
    /// A datagram that fails to decode is never answered. If the connection
    /// is active it moves to `Rejected`.
    pub fn handle_datagram(&mut self, datagram: &[u8]) -> Vec<ConnectionAction> {
        match Packet::decode(datagram) {
            Ok(packet) => self.handle_packet(&packet),
            Err(err) if self.state.is_active() => {
                debug!(channel = self.channel, %err, "undecodable datagram on active connection");
                self.transition(ConnectionState::Rejected);
                vec![self.closed(CloseReason::Malformed(err))]
            },
            Err(err) => {
                debug!(channel = self.channel, %err, "dropping undecodable datagram");
                Vec::new()
            },
        }
    }

    /// Process a decoded packet from the peer and return actions.
    pub fn handle_packet(&mut self, packet: &Packet) -> Vec<ConnectionAction> {
        if self.state.is_terminal() {
            debug!(channel = self.channel, state = ?self.state, "dropping packet for terminated connection");
            return Vec::new();
        }

        if packet.channel() != self.channel {
            debug!(channel = self.channel, received = packet.channel(), "dropping packet for other channel");
            return Vec::new();
        }

        let Some(header_type) = packet.header_type() else {
            return Vec::new();
        };

        match (self.role, self.state, header_type) {
            // Server: first Open
            (Role::Responder, ConnectionState::Idle, HeaderType::Open) => self.on_open(packet),

            // Client: answer to our Open
            (_, ConnectionState::Opening, HeaderType::Accept) => self.on_accept(packet),

            (_, ConnectionState::Opening, HeaderType::Kill) => {
                self.transition(ConnectionState::Rejected);
                vec![self.closed(CloseReason::PeerReject)]
            },

            // Client: Accept for a retransmitted Open
            (Role::Initiator, ConnectionState::Open, HeaderType::Accept)
                if Some(packet.sequence()) == self.open_sequence() =>
            {
                debug!(channel = self.channel, "ignoring duplicate accept");
                Vec::new()
            },

            // Server: retransmitted Open while the application decides
            (Role::Responder, ConnectionState::AwaitingDecision, HeaderType::Open)
                if self.is_retransmitted_open(packet.header()) =>
            {
                debug!(channel = self.channel, "ignoring retransmitted open, decision pending");
                Vec::new()
            },

            // Server: retransmitted Open after Accept was lost
            (Role::Responder, ConnectionState::Open, HeaderType::Open)
                if self.is_retransmitted_open(packet.header()) =>
            {
                debug!(channel = self.channel, "re-acknowledging retransmitted open");
                self.accept.iter().cloned().map(ConnectionAction::Send).collect()
            },

            (_, ConnectionState::AwaitingDecision, HeaderType::Kill) => {
                self.transition(ConnectionState::Rejected);
                vec![self.closed(CloseReason::PeerKill)]
            },

            (_, ConnectionState::Open, HeaderType::DataExchange) => self.on_data(packet),

            (_, ConnectionState::Open, HeaderType::Kill) => {
                self.transition(ConnectionState::Closed);
                vec![self.closed(CloseReason::PeerKill)]
            },

            // No connection exists yet, nothing to kill
            (_, ConnectionState::Idle, _) => {
                debug!(channel = self.channel, ?header_type, "dropping packet for idle connection");
                Vec::new()
            },

            (_, state, header_type) => {
                self.violation(ProtocolViolation::UnexpectedHeader { state, header_type })
            },
        }
    }

    fn on_open(&mut self, packet: &Packet) -> Vec<ConnectionAction> {
        let length = packet.header().length();
        if length != 0 {
            let violation = ProtocolViolation::OpenWithBody { length };
            warn!(channel = self.channel, %violation, "protocol violation");
            self.transition(ConnectionState::Rejected);
            return vec![self.closed(CloseReason::Violation(violation))];
        }

        self.requested = packet.capabilities().defined();
        self.open_header = Some(*packet.header());
        self.sequence.accept_incoming(packet.sequence());
        self.transition(ConnectionState::AwaitingDecision);

        vec![ConnectionAction::OpenRequested { channel: self.channel, requested: self.requested }]
    }

    fn on_accept(&mut self, packet: &Packet) -> Vec<ConnectionAction> {
        let expected = self.open_sequence().unwrap_or_default();
        if packet.sequence() != expected {
            return self.violation(ProtocolViolation::AcceptSequenceMismatch {
                expected,
                received: packet.sequence(),
            });
        }

        self.negotiated = packet.capabilities().defined();
        self.transition(ConnectionState::Open);

        vec![ConnectionAction::Established { channel: self.channel, capabilities: self.negotiated }]
    }

    fn on_data(&mut self, packet: &Packet) -> Vec<ConnectionAction> {
        let received = packet.sequence();
        match self.sequence.accept_incoming(received) {
            SequenceClass::Fresh => {
                let body = packet.body().clone();
                vec![ConnectionAction::Deliver { channel: self.channel, body }]
            },
            SequenceClass::Duplicate => {
                debug!(channel = self.channel, sequence = received, "ignoring duplicate data");
                Vec::new()
            },
            SequenceClass::Reordered => {
                let expected = self.sequence.expected_recv_seq().unwrap_or_default();
                self.violation(ProtocolViolation::SequenceReordered { expected, received })
            },
        }
    }
}
