//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the Oracle Pattern.

use bytes::Bytes;
use ngt_core::{Connection, ConnectionConfig, OpenDecision, RegistryConfig};
use ngt_proto::Capabilities;

use crate::scenario::{
    OracleFn, World,
    world::{Fault, RecordingService},
};

/// One thing that happens during a scenario.
///
/// After each step the network runs until no datagram is in flight.
#[derive(Debug, Clone)]
pub enum Step {
    /// Client opens its connection
    Open {
        /// Client index
        client: usize,
        /// Requested capabilities
        requested: Capabilities,
    },
    /// Client resends its Open
    RetransmitOpen {
        /// Client index
        client: usize,
    },
    /// Client sends one DataExchange per body before the network runs
    Send {
        /// Client index
        client: usize,
        /// Payloads, in send order
        bodies: Vec<Bytes>,
    },
    /// Client kills its connection
    Kill {
        /// Client index
        client: usize,
    },
    /// Server kills `channel`
    ServerKill {
        /// Channel to kill
        channel: u16,
    },
    /// Arbitrary bytes from client `client`'s address
    Raw {
        /// Client index used as the source peer
        client: usize,
        /// Datagram contents
        bytes: Bytes,
    },
}

impl Step {
    /// Shorthand for a `Send` with a single body
    pub fn send(client: usize, body: impl Into<Bytes>) -> Self {
        Self::Send { client, bodies: vec![body.into()] }
    }

    fn client(&self) -> Option<usize> {
        match self {
            Self::Open { client, .. }
            | Self::RetransmitOpen { client }
            | Self::Send { client, .. }
            | Self::Kill { client }
            | Self::Raw { client, .. } => Some(*client),
            Self::ServerKill { .. } => None,
        }
    }
}

/// Scenario builder.
///
/// Configure the server and clients, list the steps, then add an oracle
/// verification function.
pub struct Scenario {
    registry_config: RegistryConfig,
    decision: OpenDecision,
    echo: bool,
    clients: Vec<(u16, ConnectionConfig)>,
    faults: Vec<(usize, Fault)>,
    steps: Vec<Step>,
}

impl Scenario {
    /// Create a scenario with a default server that accepts every Open.
    pub fn new() -> Self {
        Self {
            registry_config: RegistryConfig::default(),
            decision: OpenDecision::Accept,
            echo: false,
            clients: Vec::new(),
            faults: Vec::new(),
            steps: Vec::new(),
        }
    }

    /// Configure the server registry.
    pub fn with_registry_config(mut self, config: RegistryConfig) -> Self {
        self.registry_config = config;
        self
    }

    /// Capabilities the server supports.
    pub fn with_supported(mut self, supported: Capabilities) -> Self {
        self.registry_config.supported = supported;
        self
    }

    /// How the server answers every Open.
    pub fn with_decision(mut self, decision: OpenDecision) -> Self {
        self.decision = decision;
        self
    }

    /// Make the server echo every delivered payload back.
    pub fn with_echo(mut self) -> Self {
        self.echo = true;
        self
    }

    /// Add a client on `channel` whose first header carries
    /// `initial_sequence`. Clients are numbered from 0 in the order added.
    pub fn with_client(mut self, channel: u16, initial_sequence: u8) -> Self {
        self.clients.push((channel, ConnectionConfig { initial_sequence }));
        self
    }

    /// Apply `fault` to the `index`-th datagram put on the network (from
    /// either side, counting from 0).
    pub fn with_fault(mut self, index: usize, fault: Fault) -> Self {
        self.faults.push((index, fault));
        self
    }

    /// Append a step.
    pub fn step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    /// Set the oracle function and return a runnable scenario.
    ///
    /// The oracle is mandatory - you cannot run a scenario without
    /// verification.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

impl Default for Scenario {
    fn default() -> Self {
        Self::new()
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// Runs every step in order, letting the network settle after each one,
    /// then invokes the oracle to verify global consistency.
    ///
    /// # Errors
    ///
    /// A step that refers to a missing client, a local operation the
    /// connection refuses, or an oracle failure.
    pub fn run(self) -> Result<(), String> {
        let Scenario { registry_config, decision, echo, clients, faults, steps } = self.scenario;

        let mut world = World::new(registry_config, RecordingService::new(decision, echo));
        for (channel, config) in clients {
            world.add_client(Connection::new_initiator(channel, config));
        }
        world.set_faults(faults);

        for (number, step) in steps.into_iter().enumerate() {
            if let Some(client) = step.client() {
                if client >= world.clients().len() {
                    return Err(format!("step {number}: no client {client}"));
                }
            }
            execute_step(&mut world, step).map_err(|e| format!("step {number}: {e}"))?;
            world.run_network();
        }

        (self.oracle)(&world)
    }
}

fn execute_step(world: &mut World, step: Step) -> Result<(), String> {
    match step {
        Step::Open { client, requested } => {
            let actions = world
                .client_mut(client)
                .open(requested)
                .map_err(|e| format!("client {client} open failed: {e}"))?;
            world.client_actions(client, actions);
        },
        Step::RetransmitOpen { client } => {
            let actions = world
                .client_mut(client)
                .retransmit_open()
                .map_err(|e| format!("client {client} retransmit failed: {e}"))?;
            world.client_actions(client, actions);
        },
        Step::Send { client, bodies } => {
            for body in bodies {
                let actions = world
                    .client_mut(client)
                    .send_data(body)
                    .map_err(|e| format!("client {client} send failed: {e}"))?;
                world.client_actions(client, actions);
            }
        },
        Step::Kill { client } => {
            let actions = world
                .client_mut(client)
                .kill()
                .map_err(|e| format!("client {client} kill failed: {e}"))?;
            world.client_actions(client, actions);
        },
        Step::ServerKill { channel } => {
            world
                .server_kill(channel)
                .map_err(|e| format!("server kill of channel {channel} failed: {e}"))?;
        },
        Step::Raw { client, bytes } => world.inject(client, bytes),
    }
    Ok(())
}
