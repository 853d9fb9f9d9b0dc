//! Random-input fuzzer for packet decoding and the state machines behind it.
//!
//! Invariants:
//! - Decoding never panics
//! - A packet that decodes re-encodes to exactly the bytes it came from
//! - Connections and the registry never answer undecodable input

#![no_main]

use libfuzzer_sys::fuzz_target;
use ngt_core::{
    ChannelRegistry, Connection, ConnectionAction, ConnectionConfig, RegistryAction,
    RegistryConfig,
};
use ngt_proto::Packet;

fuzz_target!(|data: &[u8]| {
    let decoded = Packet::decode(data);

    if let Ok(packet) = &decoded {
        let encoded = packet.to_bytes();
        assert_eq!(&encoded[..], &data[..packet.wire_len()], "re-encoding changed the bytes");
    }

    let mut responder = Connection::new_responder(7, ConnectionConfig::default());
    let actions = responder.handle_datagram(data);

    let mut registry = ChannelRegistry::<u8>::new(RegistryConfig::default());
    let registry_actions = registry.handle_datagram(&0, data);

    if decoded.is_err() {
        assert!(!actions.iter().any(|a| matches!(a, ConnectionAction::Send(_))));
        assert!(!registry_actions.iter().any(|a| matches!(a, RegistryAction::Send { .. })));
        assert!(registry.is_empty());
    }
});
