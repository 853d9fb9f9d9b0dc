//! Fault injection tests for the NGT protocol.
//!
//! Datagram indices count every datagram put on the in-memory network, from
//! either side. For a single client: 0 is the Open, 1 the Accept, and data
//! follows from 2.
//!
//! These tests validate the engine against an unreliable link:
//! - Loss: recovered only by Open retransmission, never below the engine
//! - Duplication: ignored, never re-delivered
//! - Reordering: fatal to the connection
//! - Corruption: dropped without an answer, fatal to a connection it names

use bytes::Bytes;
use ngt_core::{
    CloseReason, ConnectionAction, ConnectionState, DropReason, ProtocolViolation, RegistryAction,
};
use ngt_harness::scenario::{Fault, Scenario, Step, oracle};
use ngt_proto::{Capabilities, DecodeError};
use proptest::prelude::*;

#[test]
fn lost_open_recovered_by_retransmission() {
    let result = Scenario::new()
        .with_client(7, 0)
        .with_fault(0, Fault::Drop)
        .step(Step::Open { client: 0, requested: Capabilities::PERIODIC_CHECK })
        .step(Step::RetransmitOpen { client: 0 })
        .oracle(oracle::all_of(vec![
            oracle::all_open(),
            oracle::negotiated(0, Capabilities::PERIODIC_CHECK),
            oracle::check(|world| {
                if world.datagrams_dropped() != 1 {
                    return Err(format!("expected 1 drop, got {}", world.datagrams_dropped()));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn lost_accept_reanswered_on_retransmission() {
    let result = Scenario::new()
        .with_client(7, 12)
        .with_fault(1, Fault::Drop)
        .step(Step::Open { client: 0, requested: Capabilities::PERIODIC_CHECK })
        .step(Step::RetransmitOpen { client: 0 })
        .oracle(oracle::all_of(vec![
            oracle::all_open(),
            oracle::check(|world| {
                // The application decided once, the stored Accept was resent
                if world.service().opened().len() != 1 {
                    return Err(format!("service opened {:?}", world.service().opened()));
                }
                if world.server_datagrams_sent() != 2 {
                    return Err(format!("server sent {}", world.server_datagrams_sent()));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn duplicated_open_answered_without_new_decision() {
    let result = Scenario::new()
        .with_client(7, 0)
        .with_fault(0, Fault::Duplicate)
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .oracle(oracle::all_of(vec![
            oracle::all_open(),
            oracle::check(|world| {
                if world.service().opened().len() != 1 {
                    return Err(format!("service opened {:?}", world.service().opened()));
                }
                // Second Accept is a duplicate and produces nothing
                let established = ConnectionAction::Established {
                    channel: 7,
                    capabilities: Capabilities::empty(),
                };
                if world.client_events(0) != [established] {
                    return Err(format!("client saw {:?}", world.client_events(0)));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn duplicated_data_not_redelivered() {
    let result = Scenario::new()
        .with_client(7, 0)
        .with_fault(2, Fault::Duplicate)
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .step(Step::send(0, &b"ping"[..]))
        .step(Step::send(0, &b"pong"[..]))
        .oracle(oracle::all_of(vec![
            oracle::all_open(),
            oracle::server_received(&[&b"ping"[..], b"pong"]),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn reordered_data_is_fatal() {
    let result = Scenario::new()
        .with_client(7, 0)
        .with_fault(2, Fault::Delay)
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .step(Step::Send {
            client: 0,
            bodies: vec![Bytes::from_static(b"first"), Bytes::from_static(b"second")],
        })
        .oracle(oracle::all_of(vec![
            oracle::server_received(&[]),
            oracle::client_state(0, ConnectionState::Closed),
            oracle::check(|world| {
                let violation =
                    ProtocolViolation::SequenceReordered { expected: 1, received: 2 };
                if world.service().closed() != [(7, CloseReason::Violation(violation))] {
                    return Err(format!("service saw {:?}", world.service().closed()));
                }
                if world.registry().contains(7) {
                    return Err("channel 7 still bound".to_string());
                }

                // The held datagram arrives after the channel was released
                let late = RegistryAction::Dropped {
                    reason: DropReason::NoConnection { channel: 7 },
                };
                if world.server_actions().last() != Some(&late) {
                    return Err(format!("server actions {:?}", world.server_actions()));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn corrupted_data_dropped_without_answer() {
    let result = Scenario::new()
        .with_client(7, 0)
        .with_fault(2, Fault::Corrupt { offset: 0, mask: 0xFF })
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .step(Step::send(0, &b"ping"[..]))
        .oracle(oracle::all_of(vec![
            oracle::all_open(),
            oracle::server_received(&[]),
            oracle::check(|world| {
                // Only the Accept
                if world.server_datagrams_sent() != 1 {
                    return Err(format!("server sent {}", world.server_datagrams_sent()));
                }
                let dropped =
                    RegistryAction::Dropped { reason: DropReason::Decode(DecodeError::BadMagic) };
                if world.server_actions().last() != Some(&dropped) {
                    return Err(format!("server actions {:?}", world.server_actions()));
                }
                Ok(())
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn corrupted_data_header_releases_server_channel_silently() {
    let result = Scenario::new()
        .with_client(7, 0)
        .with_fault(2, Fault::Corrupt { offset: 4, mask: 0x02 })
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .step(Step::send(0, &b"ping"[..]))
        .oracle(oracle::all_of(vec![
            oracle::server_received(&[]),
            // The client is never told
            oracle::client_state(0, ConnectionState::Open),
            oracle::check(|world| {
                if world.server_datagrams_sent() != 1 {
                    return Err(format!("server sent {}", world.server_datagrams_sent()));
                }
                if world.registry().contains(7) {
                    return Err("channel 7 still bound".to_string());
                }
                match world.service().closed() {
                    [(7, CloseReason::Malformed(DecodeError::ChecksumMismatch { .. }))] => {},
                    other => return Err(format!("service saw {other:?}")),
                }
                match world.server_actions().last() {
                    Some(RegistryAction::Released {
                        channel: 7,
                        state: ConnectionState::Rejected,
                        ..
                    }) => Ok(()),
                    other => Err(format!("last server action {other:?}")),
                }
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn corrupted_accept_rejects_client_silently() {
    let result = Scenario::new()
        .with_client(7, 0)
        .with_fault(1, Fault::Corrupt { offset: 4, mask: 0x02 })
        .step(Step::Open { client: 0, requested: Capabilities::empty() })
        .oracle(oracle::all_of(vec![
            oracle::client_state(0, ConnectionState::Rejected),
            oracle::check(|world| {
                // Client never answers garbage
                if world.datagrams_sent() != 2 {
                    return Err(format!("expected 2 datagrams, got {}", world.datagrams_sent()));
                }
                match world.client_events(0) {
                    [
                        ConnectionAction::Closed {
                            reason: CloseReason::Malformed(DecodeError::ChecksumMismatch { .. }),
                            ..
                        },
                    ] => Ok(()),
                    other => Err(format!("client saw {other:?}")),
                }
            }),
        ]))
        .run();

    assert!(result.is_ok(), "scenario failed: {result:?}");
}

#[test]
fn prop_duplicate_anywhere_is_harmless() {
    proptest!(|(initial in any::<u8>(), duplicate_at in 0usize..12, count in 1usize..6)| {
        let bodies: Vec<Vec<u8>> =
            (0..count).map(|i| format!("message {i}").into_bytes()).collect();

        let mut scenario = Scenario::new()
            .with_client(7, initial)
            .with_fault(duplicate_at, Fault::Duplicate)
            .step(Step::Open { client: 0, requested: Capabilities::PERIODIC_CHECK });
        for body in &bodies {
            scenario = scenario.step(Step::send(0, body.clone()));
        }

        let expected: Vec<&[u8]> = bodies.iter().map(Vec::as_slice).collect();
        let result = scenario
            .oracle(oracle::all_of(vec![oracle::all_open(), oracle::server_received(&expected)]))
            .run();

        prop_assert!(result.is_ok(), "scenario failed: {:?}", result);
    });
}
