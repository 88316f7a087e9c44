//! Fixed 64-byte message envelope shared by every transport.
//!
//! # Wire layout (little-endian)
//!
//! ```text
//! offset  size  field
//!  0      4     magic tag
//!  4      4     message id (monotonic per source)
//!  8      8     timestamp (monotonic ns)
//! 16      2     source agent id
//! 18      2     target agent id (0xFFFF = broadcast)
//! 20      1     message type
//! 21      1     priority
//! 22      1     flags
//! 23      1     core hint
//! 24      4     checksum (CRC32C over header minus this slot, then payload)
//! 28      4     correlation id
//! 32     32     metadata tail (routing hint, confidence, TTL, hop count)
//! ```
//!
//! The format is stable; additions go into the reserved metadata tail.
//! A magic-tag mismatch is always a drop.

use crate::checksum::{crc32c, crc32c_append};
use crate::error::EnvelopeError;
use crate::priority::Priority;

/// Fabric sentinel, `b"RING"` read as a little-endian u32.
pub const MAGIC: u32 = u32::from_le_bytes(*b"RING");

/// Fixed header length in bytes.
pub const HEADER_LEN: usize = 64;

/// Byte offset of the checksum slot within the header.
const CHECKSUM_OFFSET: usize = 24;

/// Target id addressing every agent on the node.
pub const BROADCAST: u16 = 0xFFFF;

/// Routing hints carried in the reserved 32-byte header tail.
///
/// Hints, not constraints: consumers are free to ignore any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metadata {
    /// Preferred next-hop node, 0 when unset.
    pub route_hint: u16,
    /// Producer confidence as a 16-bit fixed-point fraction of 65535.
    pub confidence: u16,
    /// Time-to-live in milliseconds, 0 = no limit.
    pub ttl_ms: u32,
    /// Hops taken so far.
    pub hop_count: u8,
}

/// Decoded envelope header.
///
/// The payload is carried separately; [`Envelope::decode`] returns it as a
/// borrowed slice so consumers can dispatch without copying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Envelope {
    /// Producer-assigned id, monotonic per source agent.
    pub message_id: u32,
    /// Monotonic nanoseconds at encode time.
    pub timestamp_ns: u64,
    /// Sending agent.
    pub source: u16,
    /// Receiving agent, or [`BROADCAST`].
    pub target: u16,
    /// Application-defined message type.
    pub message_type: u8,
    /// Lane and transport selection.
    pub priority: Priority,
    /// Application-defined flags.
    pub flags: u8,
    /// Preferred CPU, a hint only.
    pub core_hint: u8,
    /// Links replies to requests.
    pub correlation_id: u32,
    /// Reserved tail.
    pub metadata: Metadata,
}

impl Envelope {
    /// Total encoded length for a payload of `payload_len` bytes.
    #[inline]
    pub const fn encoded_len(payload_len: usize) -> usize {
        HEADER_LEN + payload_len
    }

    /// Encode header + payload into `out`, computing the checksum.
    ///
    /// Returns the number of bytes written. `out` must hold
    /// [`encoded_len`](Self::encoded_len) bytes; `max_payload` is the
    /// configured per-message limit.
    pub fn encode_into(
        &self,
        payload: &[u8],
        max_payload: usize,
        out: &mut [u8],
    ) -> Result<usize, EnvelopeError> {
        if payload.len() > max_payload {
            return Err(EnvelopeError::TooLarge {
                len: payload.len(),
                max: max_payload,
            });
        }
        let total = Self::encoded_len(payload.len());
        debug_assert!(out.len() >= total, "encode buffer too small");

        let header = &mut out[..HEADER_LEN];
        header[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        header[4..8].copy_from_slice(&self.message_id.to_le_bytes());
        header[8..16].copy_from_slice(&self.timestamp_ns.to_le_bytes());
        header[16..18].copy_from_slice(&self.source.to_le_bytes());
        header[18..20].copy_from_slice(&self.target.to_le_bytes());
        header[20] = self.message_type;
        header[21] = self.priority as u8;
        header[22] = self.flags;
        header[23] = self.core_hint;
        // checksum slot filled below
        header[28..32].copy_from_slice(&self.correlation_id.to_le_bytes());
        header[32..34].copy_from_slice(&self.metadata.route_hint.to_le_bytes());
        header[34..36].copy_from_slice(&self.metadata.confidence.to_le_bytes());
        header[36..40].copy_from_slice(&self.metadata.ttl_ms.to_le_bytes());
        header[40] = self.metadata.hop_count;
        header[41..HEADER_LEN].fill(0);

        let crc = Self::checksum_of(header, payload);
        out[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].copy_from_slice(&crc.to_le_bytes());
        out[HEADER_LEN..total].copy_from_slice(payload);
        Ok(total)
    }

    /// Encode into a fresh buffer.
    pub fn encode(&self, payload: &[u8], max_payload: usize) -> Result<Vec<u8>, EnvelopeError> {
        let mut out = vec![0u8; Self::encoded_len(payload.len())];
        self.encode_into(payload, max_payload, &mut out)?;
        Ok(out)
    }

    /// Decode and verify an encoded envelope.
    ///
    /// Verifies the magic tag, bounds-checks the payload against
    /// `max_payload`, and recomputes the checksum. Returns the header and
    /// the borrowed payload slice.
    pub fn decode(bytes: &[u8], max_payload: usize) -> Result<(Envelope, &[u8]), EnvelopeError> {
        if bytes.len() < HEADER_LEN {
            return Err(EnvelopeError::TruncatedPayload {
                have: bytes.len(),
                want: HEADER_LEN,
            });
        }
        let header = &bytes[..HEADER_LEN];
        let magic = u32::from_le_bytes(header[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(EnvelopeError::UnknownMagic { found: magic });
        }

        let payload = &bytes[HEADER_LEN..];
        if payload.len() > max_payload {
            return Err(EnvelopeError::TooLarge {
                len: payload.len(),
                max: max_payload,
            });
        }

        let stored = u32::from_le_bytes(header[CHECKSUM_OFFSET..CHECKSUM_OFFSET + 4].try_into().unwrap());
        let computed = Self::checksum_of(header, payload);
        if stored != computed {
            return Err(EnvelopeError::CorruptMessage { stored, computed });
        }

        let envelope = Envelope {
            message_id: u32::from_le_bytes(header[4..8].try_into().unwrap()),
            timestamp_ns: u64::from_le_bytes(header[8..16].try_into().unwrap()),
            source: u16::from_le_bytes(header[16..18].try_into().unwrap()),
            target: u16::from_le_bytes(header[18..20].try_into().unwrap()),
            message_type: header[20],
            priority: Priority::try_from(header[21])?,
            flags: header[22],
            core_hint: header[23],
            correlation_id: u32::from_le_bytes(header[28..32].try_into().unwrap()),
            metadata: Metadata {
                route_hint: u16::from_le_bytes(header[32..34].try_into().unwrap()),
                confidence: u16::from_le_bytes(header[34..36].try_into().unwrap()),
                ttl_ms: u32::from_le_bytes(header[36..40].try_into().unwrap()),
                hop_count: header[40],
            },
        };
        Ok((envelope, payload))
    }

    /// CRC32C over every header byte except the checksum slot, then payload.
    fn checksum_of(header: &[u8], payload: &[u8]) -> u32 {
        let crc = crc32c(&header[..CHECKSUM_OFFSET]);
        let crc = crc32c_append(crc, &header[CHECKSUM_OFFSET + 4..HEADER_LEN]);
        crc32c_append(crc, payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope {
            message_id: 7,
            timestamp_ns: 123_456_789,
            source: 3,
            target: 4,
            message_type: 42,
            priority: Priority::Normal,
            flags: 0b1010,
            core_hint: 2,
            correlation_id: 0xCAFE,
            metadata: Metadata {
                route_hint: 1,
                confidence: 60_000,
                ttl_ms: 5_000,
                hop_count: 1,
            },
        }
    }

    #[test]
    fn test_round_trip() {
        let env = sample();
        let bytes = env.encode(b"ping", 1024).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN + 4);

        let (decoded, payload) = Envelope::decode(&bytes, 1024).unwrap();
        assert_eq!(decoded, env);
        assert_eq!(payload, b"ping");
    }

    #[test]
    fn test_magic_mismatch_is_drop() {
        let mut bytes = sample().encode(b"x", 1024).unwrap();
        bytes[0] ^= 0xFF;
        assert!(matches!(
            Envelope::decode(&bytes, 1024),
            Err(EnvelopeError::UnknownMagic { .. })
        ));
    }

    #[test]
    fn test_flipped_payload_byte_is_corrupt() {
        let mut bytes = sample().encode(b"payload", 1024).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            Envelope::decode(&bytes, 1024),
            Err(EnvelopeError::CorruptMessage { .. })
        ));
    }

    #[test]
    fn test_flipped_header_byte_is_corrupt() {
        // Flip the timestamp; checksum must catch it.
        let mut bytes = sample().encode(b"payload", 1024).unwrap();
        bytes[9] ^= 0x40;
        assert!(matches!(
            Envelope::decode(&bytes, 1024),
            Err(EnvelopeError::CorruptMessage { .. })
        ));
    }

    #[test]
    fn test_payload_over_limit() {
        let env = sample();
        assert!(matches!(
            env.encode(&[0u8; 65], 64),
            Err(EnvelopeError::TooLarge { len: 65, max: 64 })
        ));

        // Decoding with a tighter limit also rejects.
        let bytes = env.encode(&[0u8; 64], 64).unwrap();
        assert!(matches!(
            Envelope::decode(&bytes, 32),
            Err(EnvelopeError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_short_buffer_truncated() {
        assert!(matches!(
            Envelope::decode(&[0u8; 10], 1024),
            Err(EnvelopeError::TruncatedPayload { have: 10, want: 64 })
        ));
    }
}
