//! NGT protocol core logic
//!
//! This crate contains the pure state machine logic for the NGT protocol. It
//! is completely decoupled from I/O, enabling deterministic testing.
//!
//! # Architecture
//!
//! Protocol logic is strictly separated from transport concerns:
//!
//! ```text
//!      ┌────────────────────────────┐
//!      │ ngt-core                   │
//!      │ - Sequence tracking        │
//!      │ - Connection state machine │
//!      │ - Channel registry         │
//!      └────────────────────────────┘
//!                    ↓
//!      ┌────────────────────────────┐
//!      │ ngt-harness (Turmoil)      │
//!      │ - Virtual time             │
//!      │ - Seeded RNG               │
//!      │ - Fault injection          │
//!      └────────────────────────────┘
//! ```
//!
//! # Key Principles
//!
//! - No I/O in Core: State machines take packets and return actions
//! - Deterministic: Given the same inputs, produce the same outputs
//! - Silent on Garbage: Undecodable input is never answered
//!
//! # Modules
//!
//! - [`sequence`]: Send counter and duplicate/reorder classification
//! - [`connection`]: Connection state machine (handshake, data, teardown)
//! - [`registry`]: Server-side channel to connection map
//! - [`service`]: Application callbacks and action dispatch
//! - [`env`]: Environment abstraction (time, RNG) for drivers
//! - [`transport`]: Datagram transport abstraction
//! - [`error`]: Violation, close reason and local error types

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod error;
pub mod registry;
pub mod sequence;
pub mod service;
pub mod transport;

pub use connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState, Role};
pub use env::Environment;
pub use error::{CloseReason, ConnectionError, ProtocolViolation};
pub use registry::{ChannelRegistry, DropReason, RegistryAction, RegistryConfig, SharedRegistry};
pub use sequence::{SequenceClass, SequenceTracker};
pub use service::{ChannelService, OpenDecision, Outgoing, dispatch, dispatch_shared};
pub use transport::{DatagramTransport, TransportError};
