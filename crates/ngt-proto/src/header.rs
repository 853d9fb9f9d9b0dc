//! Packet header implementation with zero-copy parsing.
//!
//! The `Header` is a fixed 15-byte structure serialized as raw binary
//! (Little Endian). Routing a datagram to its connection only needs the
//! channel, so the registry can look at a borrowed header without copying.

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{Capabilities, HeaderType, errors::DecodeError};

/// Fixed 15-byte packet header (Little Endian)
///
/// Multi-byte integers are stored as raw byte arrays so the
/// `#[repr(C, packed)]` layout has no alignment requirement and every byte
/// lands at the offset the wire format defines.
///
/// # Security Properties
///
/// - **Zero-Copy Safety**: All 15-byte patterns are valid, so casting
///   untrusted network bytes cannot cause undefined behavior. Semantic checks
///   happen afterwards in [`Header::parse`].
///
/// - **Weak Integrity**: The `checksum` field is a shifted sum of the other
///   fields. It detects most transmission corruption. It is not a MAC and
///   does not stop a peer from forging headers.
///
/// # Checksum Maintenance
///
/// Every setter recomputes the checksum, so a `Header` built through this API
/// is always internally consistent. Only bytes parsed off the wire can carry
/// a stale checksum, and those never get past [`Header::parse`].
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct Header {
    magic: [u8; 4],    // 0x004E4754 ('NGT' multi-character constant)
    checksum: [u8; 4], // u32 shifted field sum
    channel: [u8; 2],  // u16 logical endpoint
    length: [u8; 2],   // u16 body size
    capabilities: u8,  // Capabilities bitfield
    header_type: u8,   // HeaderType byte
    sequence: u8,      // 8-bit wraparound counter
}

impl Header {
    /// Size of the serialized header (15 bytes)
    pub const SIZE: usize = 15;

    /// Magic number: the multi-character constant `'NGT'` (0x004E4754)
    pub const MAGIC: u32 = 0x004E_4754;

    /// Maximum body size (limited by the 16-bit length field)
    pub const MAX_BODY_SIZE: usize = u16::MAX as usize;

    /// Create a header of the given type addressed to `channel`.
    ///
    /// Capabilities, length and sequence start at zero. The checksum is
    /// already valid.
    #[must_use]
    pub fn new(header_type: HeaderType, channel: u16) -> Self {
        let mut header = Self {
            magic: Self::MAGIC.to_le_bytes(),
            checksum: [0; 4],
            channel: channel.to_le_bytes(),
            length: [0; 2],
            capabilities: 0,
            header_type: header_type.to_u8(),
            sequence: 0,
        };
        header.seal();
        header
    }

    /// Replace the capability byte.
    ///
    /// Reserved bits are kept as given. [`Packet::new`](crate::Packet::new)
    /// refuses to build a packet from a header that carries them.
    #[must_use]
    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities.to_byte();
        self.seal();
        self
    }

    /// Replace the sequence number.
    #[must_use]
    pub fn with_sequence(mut self, sequence: u8) -> Self {
        self.sequence = sequence;
        self.seal();
        self
    }

    /// Replace the header type, keeping every other field.
    ///
    /// Used to echo a received header back, e.g. an `Open` answered as a
    /// `Kill`.
    #[must_use]
    pub fn with_header_type(mut self, header_type: HeaderType) -> Self {
        self.header_type = header_type.to_u8();
        self.seal();
        self
    }

    pub(crate) fn set_length(&mut self, length: u16) {
        self.length = length.to_le_bytes();
        self.seal();
    }

    fn seal(&mut self) {
        self.checksum = self.expected_checksum().to_le_bytes();
    }

    /// Parse a header from network bytes (zero-copy, safe)
    ///
    /// Returns the header and exactly `length` body bytes borrowed from the
    /// same buffer. Bytes past the body are ignored.
    ///
    /// # Errors
    ///
    /// Checks run in this order and the first failure is returned:
    /// 1. [`DecodeError::Truncated`] if the buffer is shorter than
    ///    [`Header::SIZE`]
    /// 2. [`DecodeError::BadMagic`] if the identifier is wrong
    /// 3. [`DecodeError::ChecksumMismatch`] if the stored checksum is stale
    /// 4. [`DecodeError::Truncated`] if `length` exceeds the remaining bytes
    /// 5. [`DecodeError::UnknownType`] if the type byte is undefined
    ///
    /// # Security
    ///
    /// - **Magic First**: Foreign traffic is rejected before any field it
    ///   controls is summed.
    ///
    /// - **Bounded Body**: The returned body slice is cut to `length`, so the
    ///   caller never reads bytes the header did not claim.
    pub fn parse(bytes: &[u8]) -> Result<(&Self, &[u8]), DecodeError> {
        let (header, rest) = Self::ref_from_prefix(bytes)
            .map_err(|_| DecodeError::Truncated { expected: Self::SIZE, actual: bytes.len() })?;

        if header.magic() != Self::MAGIC {
            return Err(DecodeError::BadMagic);
        }

        let computed = header.expected_checksum();
        if header.checksum() != computed {
            return Err(DecodeError::ChecksumMismatch { stored: header.checksum(), computed });
        }

        let length = usize::from(header.length());
        if length > rest.len() {
            return Err(DecodeError::Truncated {
                expected: Self::SIZE + length,
                actual: bytes.len(),
            });
        }

        if header.header_type().is_none() {
            return Err(DecodeError::UnknownType(header.header_type_byte()));
        }

        Ok((header, &rest[..length]))
    }

    /// Channel claimed by a datagram that starts with a full header carrying
    /// the NGT magic.
    ///
    /// No other field is checked. Used to find the connection a corrupt
    /// datagram was meant for, never to accept it.
    #[must_use]
    pub fn peek_channel(bytes: &[u8]) -> Option<u16> {
        let (header, _) = Self::ref_from_prefix(bytes).ok()?;
        (header.magic() == Self::MAGIC).then(|| header.channel())
    }

    /// Serialize header to bytes
    #[must_use]
    #[allow(clippy::wrong_self_convention)]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(IntoBytes::as_bytes(self));
        arr
    }

    /// Checksum the other fields of this header should carry
    #[must_use]
    pub fn expected_checksum(&self) -> u32 {
        compute_checksum(
            self.magic(),
            self.channel(),
            self.length(),
            self.capabilities,
            self.header_type,
            self.sequence,
        )
    }

    /// Get the magic number
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_le_bytes(self.magic)
    }

    /// Get the stored checksum
    #[must_use]
    pub fn checksum(&self) -> u32 {
        u32::from_le_bytes(self.checksum)
    }

    /// Get the channel
    #[must_use]
    pub fn channel(&self) -> u16 {
        u16::from_le_bytes(self.channel)
    }

    /// Get the body length
    #[must_use]
    pub fn length(&self) -> u16 {
        u16::from_le_bytes(self.length)
    }

    /// Get the capabilities, reserved bits included
    #[must_use]
    pub fn capabilities(&self) -> Capabilities {
        Capabilities::from_byte(self.capabilities)
    }

    /// Get the header type (if valid)
    #[must_use]
    pub fn header_type(&self) -> Option<HeaderType> {
        HeaderType::from_u8(self.header_type)
    }

    /// Get the raw header type byte
    #[must_use]
    pub fn header_type_byte(&self) -> u8 {
        self.header_type
    }

    /// Get the sequence number
    #[must_use]
    pub fn sequence(&self) -> u8 {
        self.sequence
    }
}

/// Compute the header checksum from raw field values.
///
/// The fields are summed in declaration order into a wrapping `u32` and the
/// sum is shifted right by one. The low bit of the sum is discarded, so a
/// change that alters only that bit goes unnoticed.
#[must_use]
pub const fn compute_checksum(
    magic: u32,
    channel: u16,
    length: u16,
    capabilities: u8,
    header_type: u8,
    sequence: u8,
) -> u32 {
    let sum = magic
        .wrapping_add(channel as u32)
        .wrapping_add(length as u32)
        .wrapping_add(capabilities as u32)
        .wrapping_add(header_type as u32)
        .wrapping_add(sequence as u32);
    sum >> 1
}

// Manual Debug implementation (can't derive due to packed repr)
impl std::fmt::Debug for Header {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Header")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("checksum", &format!("{:#010x}", self.checksum()))
            .field("channel", &self.channel())
            .field("length", &self.length())
            .field("capabilities", &self.capabilities())
            .field("header_type", &format!("{:#04x}", self.header_type))
            .field("sequence", &self.sequence())
            .finish()
    }
}

// Manual PartialEq implementation (can't derive due to packed repr)
impl PartialEq for Header {
    fn eq(&self, other: &Self) -> bool {
        self.to_bytes() == other.to_bytes()
    }
}

impl Eq for Header {}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    impl Arbitrary for Header {
        type Parameters = ();
        type Strategy = BoxedStrategy<Self>;

        fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
            (
                prop::sample::select(HeaderType::ALL.to_vec()), // header_type
                any::<u16>(),                                   // channel
                any::<u16>(),                                   // length
                0u8..=1,                                        // capabilities
                any::<u8>(),                                    // sequence
            )
                .prop_map(|(header_type, channel, length, capabilities, sequence)| {
                    let mut header = Header::new(header_type, channel)
                        .with_capabilities(Capabilities::from_byte(capabilities))
                        .with_sequence(sequence);
                    header.set_length(length);
                    header
                })
                .boxed()
        }
    }

    fn with_body(header: &Header) -> Vec<u8> {
        let mut buf = header.to_bytes().to_vec();
        buf.resize(Header::SIZE + usize::from(header.length()), 0xAB);
        buf
    }

    /// Offsets of the fields covered by the checksum, magic excluded.
    const SUMMED_OFFSETS: [usize; 7] = [8, 9, 10, 11, 12, 13, 14];

    #[test]
    fn header_size() {
        assert_eq!(std::mem::size_of::<Header>(), Header::SIZE);
        assert_eq!(Header::SIZE, 15);
    }

    #[test]
    fn magic_is_little_endian_ngt() {
        let bytes = Header::new(HeaderType::Open, 0).to_bytes();
        assert_eq!(&bytes[0..4], &[0x54, 0x47, 0x4E, 0x00]);
        assert_eq!(&bytes[0..3], b"TGN");
    }

    #[test]
    fn checksum_is_shifted_sum() {
        let header = Header::new(HeaderType::Open, 7).with_capabilities(Capabilities::all());
        let sum = Header::MAGIC + 7 + 1 + u32::from(b'O');
        assert_eq!(header.checksum(), sum >> 1);
    }

    proptest! {
        #[test]
        fn header_round_trip(header in any::<Header>()) {
            let buf = with_body(&header);
            let (parsed, body) = Header::parse(&buf).expect("should parse");
            prop_assert_eq!(&header, parsed);
            prop_assert_eq!(body.len(), usize::from(header.length()));
        }

        #[test]
        fn header_accessors(header in any::<Header>()) {
            prop_assert_eq!(header.magic(), Header::MAGIC);
            prop_assert_eq!(header.checksum(), header.expected_checksum());
            prop_assert!(header.header_type().is_some());
            prop_assert_eq!(header.capabilities().reserved_bits(), 0);
        }

        #[test]
        fn any_foreign_magic_is_rejected(
            header in any::<Header>(),
            magic in any::<u32>().prop_filter("foreign", |m| *m != Header::MAGIC),
        ) {
            let mut buf = with_body(&header);
            buf[0..4].copy_from_slice(&magic.to_le_bytes());
            prop_assert_eq!(Header::parse(&buf), Err(DecodeError::BadMagic));
        }

        #[test]
        fn single_bit_flip_breaks_checksum(
            header in any::<Header>(),
            offset in prop::sample::select(SUMMED_OFFSETS.to_vec()),
            bit in 1u32..8,
        ) {
            let mut buf = with_body(&header);
            buf[offset] ^= 1 << bit;
            let result = Header::parse(&buf);
            prop_assert!(
                matches!(result, Err(DecodeError::ChecksumMismatch { .. })),
                "flip of bit {} at offset {} gave {:?}", bit, offset, result
            );
        }
    }

    #[test]
    fn peek_channel_needs_magic_and_full_header() {
        let mut buf = Header::new(HeaderType::DataExchange, 513).to_bytes();
        buf[4] ^= 0x02;
        assert!(matches!(Header::parse(&buf), Err(DecodeError::ChecksumMismatch { .. })));
        assert_eq!(Header::peek_channel(&buf), Some(513));

        assert_eq!(Header::peek_channel(&buf[..Header::SIZE - 1]), None);
        buf[0] ^= 0xFF;
        assert_eq!(Header::peek_channel(&buf), None);
    }

    #[test]
    fn low_bit_flip_detected_when_sum_is_odd() {
        // magic + 7 + 1 + 'O' is odd, so +1 carries into the stored bits
        let header = Header::new(HeaderType::Open, 7).with_capabilities(Capabilities::all());
        let mut buf = header.to_bytes();
        buf[14] ^= 1;

        assert!(matches!(Header::parse(&buf), Err(DecodeError::ChecksumMismatch { .. })));
    }

    #[test]
    fn low_bit_flip_lost_when_sum_is_even() {
        let header = Header::new(HeaderType::Open, 6).with_capabilities(Capabilities::all());
        let mut buf = header.to_bytes();
        buf[14] ^= 1;

        let (parsed, _) = Header::parse(&buf).expect("weak checksum misses the low bit");
        assert_eq!(parsed.sequence(), 1);
    }

    #[test]
    fn reject_short_buffer() {
        let short_buf = [0u8; 10];
        let result = Header::parse(&short_buf);
        assert_eq!(result, Err(DecodeError::Truncated { expected: 15, actual: 10 }));
    }

    #[test]
    fn reject_invalid_magic_before_checksum() {
        let mut buf = Header::new(HeaderType::Open, 7).to_bytes();
        buf[0..4].copy_from_slice(&[0xFF, 0xFF, 0xFF, 0xFF]);
        buf[4..8].copy_from_slice(&[0, 0, 0, 0]);

        assert_eq!(Header::parse(&buf), Err(DecodeError::BadMagic));
    }

    #[test]
    fn checksum_checked_before_length() {
        let mut buf = Header::new(HeaderType::DataExchange, 7).to_bytes();
        buf[10..12].copy_from_slice(&500u16.to_le_bytes());

        let result = Header::parse(&buf);
        assert!(matches!(result, Err(DecodeError::ChecksumMismatch { .. })));
    }

    #[test]
    fn reject_truncated_body() {
        let mut header = Header::new(HeaderType::DataExchange, 7);
        header.set_length(100);
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(&[0; 40]);

        let result = Header::parse(&buf);
        assert_eq!(result, Err(DecodeError::Truncated { expected: 115, actual: 55 }));
    }

    #[test]
    fn length_checked_before_type() {
        let mut header = Header::new(HeaderType::DataExchange, 7);
        header.set_length(4);
        header.header_type = 0x7F;
        header.seal();

        let bytes = header.to_bytes();
        let result = Header::parse(&bytes);
        assert!(matches!(result, Err(DecodeError::Truncated { .. })));
    }

    #[test]
    fn reject_unknown_type() {
        let mut header = Header::new(HeaderType::Kill, 7);
        header.header_type = b'Z';
        header.seal();

        let bytes = header.to_bytes();
        let result = Header::parse(&bytes);
        assert_eq!(result, Err(DecodeError::UnknownType(b'Z')));
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        let mut header = Header::new(HeaderType::DataExchange, 7);
        header.set_length(2);
        let mut buf = header.to_bytes().to_vec();
        buf.extend_from_slice(&[1, 2, 3, 4]);

        let (_, body) = Header::parse(&buf).expect("should parse");
        assert_eq!(body, &[1, 2]);
    }
}
