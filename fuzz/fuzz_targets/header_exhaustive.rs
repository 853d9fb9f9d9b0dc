//! Exhaustive positive space fuzzer for packet encoding/decoding
//!
//! Unlike random fuzzing (header_decode.rs), this fuzzer EXHAUSTIVELY tests
//! all combinations of:
//! - All 4 header types
//! - Edge-case values for channel and sequence
//! - Both capability sets
//! - Empty, small and maximum-size bodies

#![no_main]

use libfuzzer_sys::fuzz_target;
use ngt_proto::{Capabilities, Header, HeaderType, Packet};

const CHANNELS: &[u16] = &[0, 1, 7, 0x00FF, 0x0100, u16::MAX - 1, u16::MAX];

const SEQUENCES: &[u8] = &[0, 1, 0x7F, 0x80, u8::MAX - 1, u8::MAX];

const BODY_SIZES: &[usize] = &[
    0,
    1,
    Header::SIZE,
    255,
    256,
    1024,
    Header::MAX_BODY_SIZE,
];

fuzz_target!(|data: &[u8]| {
    if data.len() < 3 {
        return;
    }

    let header_type = HeaderType::ALL[data[0] as usize % HeaderType::ALL.len()];
    let channel = CHANNELS[data[1] as usize % CHANNELS.len()];
    let capabilities = Capabilities::from_byte(data[2] & 1);

    for &sequence in SEQUENCES {
        let header = Header::new(header_type, channel)
            .with_capabilities(capabilities)
            .with_sequence(sequence);

        for &size in BODY_SIZES {
            let body =
                if size <= data.len() - 3 { data[3..3 + size].to_vec() } else { vec![0u8; size] };

            // INVARIANT 1: Encoding must succeed
            let packet = Packet::new(header, body.clone()).expect("body fits and no reserved bits");
            let encoded = packet.to_bytes();

            // INVARIANT 2: Encoded size must be correct
            assert_eq!(encoded.len(), Header::SIZE + size);

            // INVARIANT 3: Decoding must succeed and be identity
            let decoded =
                Packet::decode(&encoded).expect("decode should succeed for valid encoding");
            assert_eq!(decoded.header_type(), Some(header_type));
            assert_eq!(decoded.channel(), channel);
            assert_eq!(decoded.sequence(), sequence);
            assert_eq!(decoded.capabilities(), capabilities);
            assert_eq!(decoded.body().as_ref(), &body[..]);
        }
    }
});
