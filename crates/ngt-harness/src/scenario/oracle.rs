//! Oracle functions for scenario verification.
//!
//! Oracle functions run at the end of scenarios to verify global consistency.
//! They receive a snapshot of the entire world state and assert invariants.

use bytes::Bytes;
use ngt_core::{ConnectionState, RegistryAction};
use ngt_proto::Capabilities;

use crate::scenario::World;

/// Oracle function type.
///
/// Receives immutable reference to world state and returns:
/// - `Ok(())` if all invariants hold
/// - `Err(message)` if verification fails
pub type OracleFn = Box<dyn FnOnce(&World) -> Result<(), String>>;

/// Wrap an ad-hoc check so it can be combined with [`all_of`].
pub fn check(f: impl FnOnce(&World) -> Result<(), String> + 'static) -> OracleFn {
    Box::new(f)
}

/// Every client and its server entry are `Open`.
pub fn all_open() -> OracleFn {
    Box::new(|world| {
        if world.all_open() {
            Ok(())
        } else {
            let states: Vec<_> = world.clients().iter().map(|c| c.state()).collect();
            Err(format!("not all connections are open, client states: {states:?}"))
        }
    })
}

/// Client `index` ended up in `state`.
pub fn client_state(index: usize, state: ConnectionState) -> OracleFn {
    Box::new(move |world| {
        let actual = world.client(index).state();
        if actual == state {
            Ok(())
        } else {
            Err(format!("client {index} should be {state:?}, got {actual:?}"))
        }
    })
}

/// Client `index` and the server agree on `capabilities`.
pub fn negotiated(index: usize, capabilities: Capabilities) -> OracleFn {
    Box::new(move |world| {
        let client = world.client(index);
        if client.capabilities() != capabilities {
            return Err(format!(
                "client {index} negotiated {:?}, expected {capabilities:?}",
                client.capabilities()
            ));
        }

        match world.registry().route(client.channel()) {
            Some(server) if server.capabilities() == capabilities => Ok(()),
            Some(server) => Err(format!(
                "server negotiated {:?} on channel {}, expected {capabilities:?}",
                server.capabilities(),
                client.channel()
            )),
            None => Err(format!("server has no connection on channel {}", client.channel())),
        }
    })
}

/// The server application received exactly `bodies`, in order.
pub fn server_received(bodies: &[&[u8]]) -> OracleFn {
    let expected: Vec<Bytes> = bodies.iter().map(|b| Bytes::copy_from_slice(b)).collect();
    Box::new(move |world| {
        let actual: Vec<Bytes> =
            world.service().delivered().iter().map(|(_, body)| body.clone()).collect();
        if actual == expected {
            Ok(())
        } else {
            Err(format!("server received {actual:?}, expected {expected:?}"))
        }
    })
}

/// The server never put a datagram on the network.
pub fn server_silent() -> OracleFn {
    Box::new(|world| match world.server_datagrams_sent() {
        0 => Ok(()),
        sent => Err(format!("server should have sent nothing, sent {sent}")),
    })
}

/// No server connection object was created.
pub fn no_connection_created() -> OracleFn {
    Box::new(|world| {
        let opened = world
            .server_actions()
            .iter()
            .any(|action| matches!(action, RegistryAction::OpenRequested { .. }));
        if opened || !world.registry().is_empty() {
            Err("server created a connection".to_string())
        } else {
            Ok(())
        }
    })
}

/// Combine multiple oracles into one.
pub fn all_of(oracles: Vec<OracleFn>) -> OracleFn {
    Box::new(move |world| {
        for oracle in oracles {
            oracle(world)?;
        }
        Ok(())
    })
}
