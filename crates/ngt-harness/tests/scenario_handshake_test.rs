//! Scenario tests for the end-to-end handshake.
//!
//! Each test runs clients and a server over the in-memory scenario world and
//! checks the final state with oracles.

use bytes::Bytes;
use ngt_core::{
    CloseReason, ConnectionAction, ConnectionState, DropReason, OpenDecision, ProtocolViolation,
    RegistryAction,
};
use ngt_harness::scenario::{Scenario, Step, oracle};
use ngt_proto::{Capabilities, Header, HeaderType, Packet};

#[test]
fn scenario_a_periodic_check_negotiated() {
    let result = Scenario::new()
        .with_supported(Capabilities::PERIODIC_CHECK)
        .with_client(7, 0)
        .step(Step::Open { client: 0, requested: Capabilities::PERIODIC_CHECK })
        .oracle(oracle::all_of(vec![
            oracle::all_open(),
            oracle::negotiated(0, Capabilities::PERIODIC_CHECK),
            oracle::check(|world| {
                // Open + Accept, nothing else
                if world.datagrams_sent() != 2 {
                    return Err(format!("expected 2 datagrams, got {}", world.datagrams_sent()));
                }

                let server = world.registry().route(7).ok_or("no server connection")?;
                if server.open_sequence() != Some(0) {
                    return Err(format!(
                        "server should record open sequence 0, got {:?}",
                        server.open_sequence()
                    ));
                }

                let established = ConnectionAction::Established {
                    channel: 7,
                    capabilities: Capabilities::PERIODIC_CHECK,
                };
                if world.client_events(0) != [established] {
                    return Err(format!("unexpected client events {:?}", world.client_events(0)));
                }

                if world.service().opened() != [(7, Capabilities::PERIODIC_CHECK)] {
                    return Err(format!("service saw {:?}", world.service().opened()));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn scenario_b_unsupported_capability_is_not_a_rejection() {
    let result = Scenario::new()
        .with_supported(Capabilities::empty())
        .with_client(7, 0)
        .step(Step::Open { client: 0, requested: Capabilities::PERIODIC_CHECK })
        .oracle(oracle::all_of(vec![
            oracle::all_open(),
            oracle::negotiated(0, Capabilities::empty()),
            oracle::client_state(0, ConnectionState::Open),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn scenario_c_second_open_on_bound_channel_is_refused() {
    // Both clients send byte-identical Opens, from different peers
    let result = Scenario::new()
        .with_client(7, 0)
        .with_client(7, 0)
        .step(Step::Open { client: 0, requested: Capabilities::PERIODIC_CHECK })
        .step(Step::Open { client: 1, requested: Capabilities::PERIODIC_CHECK })
        .oracle(oracle::all_of(vec![
            oracle::client_state(0, ConnectionState::Open),
            oracle::client_state(1, ConnectionState::Rejected),
            oracle::check(|world| {
                if world.registry().peer(7) != Some(&0) {
                    return Err(format!("channel 7 bound to {:?}", world.registry().peer(7)));
                }
                let server = world.registry().route(7).ok_or("original connection gone")?;
                if server.state() != ConnectionState::Open {
                    return Err(format!("original connection is {:?}", server.state()));
                }

                let refused = RegistryAction::Refused {
                    channel: 7,
                    peer: 1,
                    violation: ProtocolViolation::DuplicateOpen { channel: 7 },
                };
                if !world.server_actions().contains(&refused) {
                    return Err(format!("no refusal in {:?}", world.server_actions()));
                }

                let rejected = ConnectionAction::Closed {
                    channel: 7,
                    state: ConnectionState::Rejected,
                    reason: CloseReason::PeerReject,
                };
                if world.client_events(1) != [rejected] {
                    return Err(format!("client 1 saw {:?}", world.client_events(1)));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn scenario_d_open_with_body_dropped_before_connection_exists() {
    let open = Packet::new(Header::new(HeaderType::Open, 7), &b"hello"[..]).unwrap();

    let result = Scenario::new()
        .with_client(7, 0)
        .step(Step::Raw { client: 0, bytes: open.to_bytes() })
        .oracle(oracle::all_of(vec![
            oracle::no_connection_created(),
            oracle::server_silent(),
            oracle::check(|world| {
                let dropped = RegistryAction::Dropped {
                    reason: DropReason::Violation(ProtocolViolation::OpenWithBody { length: 5 }),
                };
                if world.server_actions() != [dropped] {
                    return Err(format!("server actions {:?}", world.server_actions()));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn server_rejection_echoes_open_as_kill() {
    let result = Scenario::new()
        .with_decision(OpenDecision::Reject)
        .with_client(7, 40)
        .step(Step::Open { client: 0, requested: Capabilities::PERIODIC_CHECK })
        .oracle(oracle::all_of(vec![
            oracle::client_state(0, ConnectionState::Rejected),
            oracle::check(|world| {
                if !world.registry().is_empty() {
                    return Err("rejected connection still bound".to_string());
                }
                if world.service().closed() != [(7, CloseReason::LocalReject)] {
                    return Err(format!("service saw {:?}", world.service().closed()));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn data_exchange_and_echo() {
    let result = Scenario::new()
        .with_echo()
        .with_client(3, 250)
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .step(Step::Send {
            client: 0,
            bodies: vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")],
        })
        .step(Step::send(0, &b"three"[..]))
        .oracle(oracle::all_of(vec![
            oracle::all_open(),
            oracle::server_received(&[&b"one"[..], b"two", b"three"]),
            oracle::check(|world| {
                let echoed = world.client_delivered(0);
                if echoed != [&b"one"[..], b"two", b"three"] {
                    return Err(format!("client received {echoed:?}"));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn client_kill_releases_server_channel() {
    let result = Scenario::new()
        .with_client(7, 0)
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .step(Step::Kill { client: 0 })
        .oracle(oracle::all_of(vec![
            oracle::client_state(0, ConnectionState::Closed),
            oracle::check(|world| {
                if world.registry().contains(7) {
                    return Err("channel 7 still bound".to_string());
                }
                if world.service().closed() != [(7, CloseReason::PeerKill)] {
                    return Err(format!("service saw {:?}", world.service().closed()));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn server_kill_closes_client() {
    let result = Scenario::new()
        .with_client(9, 0)
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .step(Step::ServerKill { channel: 9 })
        .oracle(oracle::all_of(vec![
            oracle::client_state(0, ConnectionState::Closed),
            oracle::check(|world| {
                let closed = ConnectionAction::Closed {
                    channel: 9,
                    state: ConnectionState::Closed,
                    reason: CloseReason::PeerKill,
                };
                if world.client_events(0).last() != Some(&closed) {
                    return Err(format!("client saw {:?}", world.client_events(0)));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn channel_limit_refuses_extra_opens() {
    let config = ngt_core::RegistryConfig { max_connections: 1, ..Default::default() };

    let result = Scenario::new()
        .with_registry_config(config)
        .with_client(1, 0)
        .with_client(2, 0)
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .step(Step::Open { client: 1, requested: Capabilities::empty() })
        .oracle(oracle::all_of(vec![
            oracle::client_state(0, ConnectionState::Open),
            oracle::client_state(1, ConnectionState::Rejected),
            oracle::check(|world| {
                let refused = RegistryAction::Refused {
                    channel: 2,
                    peer: 1,
                    violation: ProtocolViolation::ChannelLimitReached { limit: 1 },
                };
                if !world.server_actions().contains(&refused) {
                    return Err(format!("no refusal in {:?}", world.server_actions()));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn step_for_missing_client_fails() {
    let result = Scenario::new()
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .oracle(oracle::all_open())
        .run();

    assert_eq!(result, Err("step 0: no client 0".to_string()));
}
