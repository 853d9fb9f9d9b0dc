//! Drivers, transports and a deterministic simulation harness for NGT.
//!
//! This crate provides two implementations each of the `Environment` and
//! `DatagramTransport` traits: Turmoil-based ones for simulation and
//! tokio-based ones for real UDP. It also holds the async drivers that run the
//! engine over a transport, and an in-memory scenario world with fault
//! injection.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod driver;
pub mod scenario;
pub mod sim_env;
pub mod sim_transport;
pub mod system_env;
pub mod udp_transport;

pub use driver::{ClientDriver, DriverConfig, DriverError, ServerDriver};
pub use sim_env::SimEnv;
pub use sim_transport::{LossyTransport, SimTransport, peer_address};
pub use system_env::SystemEnv;
pub use udp_transport::UdpTransport;
