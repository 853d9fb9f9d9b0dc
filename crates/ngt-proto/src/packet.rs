//! Packet type combining header and body.
//!
//! A `Packet` is what one datagram carries:
//! - 15-byte raw binary header (Little Endian)
//! - `length` opaque body bytes
//!
//! The body is never interpreted here. Application payload semantics belong
//! to whoever consumes `Deliver` events.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{
    Capabilities, Header, HeaderType,
    errors::{DecodeError, EncodeError},
};

/// Complete protocol packet
///
/// Layout on the wire:
/// `[Header: 15 bytes, raw binary] + [body: length bytes]`
///
/// # Invariants
///
/// - **Size Consistency**: `body.len()` equals `header.length()` and fits in
///   16 bits. Enforced by [`Packet::new`] and verified by [`Packet::decode`].
///
/// - **Clean Capabilities**: Packets built for sending never carry reserved
///   capability bits.
///
/// - **Valid Checksum**: The header checksum always matches its fields, so
///   [`Packet::encode`] cannot fail.
///
/// Decoded packets satisfy the first and last invariants. Their capability
/// byte is kept exactly as received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    header: Header,
    body: Bytes,
}

impl Packet {
    /// Create a packet, filling in the header's `length` and checksum.
    ///
    /// # Errors
    ///
    /// - [`EncodeError::BodyTooLarge`] if the body exceeds
    ///   [`Header::MAX_BODY_SIZE`]
    /// - [`EncodeError::ReservedCapabilityBitsSet`] if the header's
    ///   capabilities use bits 1-7
    pub fn new(mut header: Header, body: impl Into<Bytes>) -> Result<Self, EncodeError> {
        let body = body.into();

        let length = u16::try_from(body.len()).map_err(|_| EncodeError::BodyTooLarge {
            size: body.len(),
            max: Header::MAX_BODY_SIZE,
        })?;

        let reserved = header.capabilities().reserved_bits();
        if reserved != 0 {
            return Err(EncodeError::ReservedCapabilityBitsSet(reserved));
        }

        header.set_length(length);
        Ok(Self { header, body })
    }

    /// Create a body-less packet from a header.
    ///
    /// Reserved capability bits are cleared, so this cannot fail. Used for
    /// `Open`, `Accept` and `Kill`, and for echoing a received header.
    #[must_use]
    pub fn control(header: Header) -> Self {
        let mut header = header.with_capabilities(header.capabilities().defined());
        header.set_length(0);
        Self { header, body: Bytes::new() }
    }

    /// Encode packet into buffer
    ///
    /// Writes: `[header (15 bytes)] + [body (length bytes)]`
    pub fn encode(&self, dst: &mut impl BufMut) {
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.body);
    }

    /// Encode packet into a fresh buffer
    #[must_use]
    #[allow(clippy::wrong_self_convention)]
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode packet from wire format
    ///
    /// The body is copied out of `bytes` only after every header check has
    /// passed. Bytes beyond the claimed body are ignored.
    ///
    /// # Errors
    ///
    /// Returns the first failure of [`Header::parse`].
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let (header, body) = Header::parse(bytes)?;
        Ok(Self { header: *header, body: Bytes::copy_from_slice(body) })
    }

    /// Packet header
    #[must_use]
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Packet body
    #[must_use]
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Header type
    ///
    /// Constructed and decoded packets always carry a defined type.
    #[must_use]
    pub fn header_type(&self) -> Option<HeaderType> {
        self.header.header_type()
    }

    /// Channel this packet is addressed to
    #[must_use]
    pub fn channel(&self) -> u16 {
        self.header.channel()
    }

    /// Sequence number
    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.header.sequence()
    }

    /// Capabilities as carried by the header
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        self.header.capabilities()
    }

    /// Encoded size in bytes
    #[must_use]
    pub fn wire_len(&self) -> usize {
        Header::SIZE + self.body.len()
    }

    /// Split into header and body
    #[must_use]
    pub fn into_parts(self) -> (Header, Bytes) {
        (self.header, self.body)
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn header_type() -> impl Strategy<Value = HeaderType> {
        prop::sample::select(HeaderType::ALL.to_vec())
    }

    impl Arbitrary for Packet {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            (
                header_type(),
                any::<u16>(),
                0u8..=1,
                any::<u8>(),
                prop::collection::vec(any::<u8>(), 0..512),
            )
                .prop_map(|(header_type, channel, caps, sequence, body)| {
                    let header = Header::new(header_type, channel)
                        .with_capabilities(Capabilities::from_byte(caps))
                        .with_sequence(sequence);
                    let body = if header_type == HeaderType::Open { Vec::new() } else { body };
                    Packet::new(header, body).expect("arbitrary packet is valid")
                })
                .boxed()
        }
    }

    proptest! {
        #[test]
        fn packet_round_trip(packet in any::<Packet>()) {
            let mut wire = Vec::new();
            packet.encode(&mut wire);
            prop_assert_eq!(wire.len(), packet.wire_len());

            let parsed = Packet::decode(&wire).expect("should decode");
            prop_assert_eq!(parsed, packet);
        }

        #[test]
        fn reserved_bits_refused(bits in 2u8..=255) {
            let header = Header::new(HeaderType::DataExchange, 1)
                .with_capabilities(Capabilities::from_byte(bits));
            let result = Packet::new(header, Bytes::new());
            prop_assert_eq!(result, Err(EncodeError::ReservedCapabilityBitsSet(bits & !1)));
        }
    }

    #[test]
    fn new_sets_length_and_checksum() {
        let header = Header::new(HeaderType::DataExchange, 7).with_sequence(1);
        let packet = Packet::new(header, &b"ping"[..]).unwrap();

        assert_eq!(packet.header().length(), 4);
        assert_eq!(packet.header().checksum(), packet.header().expected_checksum());
    }

    #[test]
    fn body_at_limit_accepted() {
        let header = Header::new(HeaderType::DataExchange, 7);
        let packet = Packet::new(header, vec![0u8; Header::MAX_BODY_SIZE]).unwrap();
        assert_eq!(packet.header().length(), u16::MAX);
    }

    #[test]
    fn oversized_body_refused() {
        let header = Header::new(HeaderType::DataExchange, 7);
        let result = Packet::new(header, vec![0u8; Header::MAX_BODY_SIZE + 1]);
        assert_eq!(result, Err(EncodeError::BodyTooLarge { size: 65536, max: 65535 }));
    }

    #[test]
    fn control_masks_reserved_bits() {
        let header =
            Header::new(HeaderType::Kill, 7).with_capabilities(Capabilities::from_byte(0xFF));
        let packet = Packet::control(header);

        assert_eq!(packet.capabilities(), Capabilities::PERIODIC_CHECK);
        assert_eq!(packet.header().length(), 0);
        assert_eq!(Packet::decode(&packet.to_bytes()).unwrap(), packet);
    }

    #[test]
    fn decode_copies_only_claimed_body() {
        let header = Header::new(HeaderType::DataExchange, 3);
        let packet = Packet::new(header, &b"abc"[..]).unwrap();
        let mut wire = packet.to_bytes().to_vec();
        wire.extend_from_slice(b"trailing");

        let parsed = Packet::decode(&wire).unwrap();
        assert_eq!(parsed.body().as_ref(), b"abc");
    }

    #[test]
    fn reject_truncated_packet() {
        let header = Header::new(HeaderType::DataExchange, 3);
        let packet = Packet::new(header, vec![9u8; 100]).unwrap();
        let wire = packet.to_bytes();

        let result = Packet::decode(&wire[..50]);
        assert_eq!(result, Err(DecodeError::Truncated { expected: 115, actual: 50 }));
    }
}
