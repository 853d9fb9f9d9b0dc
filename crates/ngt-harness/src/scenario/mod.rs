//! Scenario testing framework for deterministic simulation tests.
//!
//! This module provides a declarative API for writing scenario-based tests
//! that follow the Oracle Pattern. Scenarios run clients and a server over an
//! in-memory network with scripted faults and must end with oracle
//! verification.

mod builder;
pub mod oracle;
mod world;

pub use builder::{RunnableScenario, Scenario, Step};
pub use oracle::OracleFn;
pub use world::{Datagram, Endpoint, Fault, RecordingService, World};
