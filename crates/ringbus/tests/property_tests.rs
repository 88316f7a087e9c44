//! Property-based tests for the lane protocol and the envelope codec.

use proptest::prelude::*;
use ringbus::{Envelope, EnvelopeError, Lane, Metadata, Priority, ReadError, HEADER_LEN};

// =============================================================================
// Lane: reads are a prefix of writes
// =============================================================================

proptest! {
    /// For any interleaving of one producer and one consumer, the sequence
    /// of successfully read payloads is a prefix of the successfully
    /// written payloads.
    #[test]
    fn prop_reads_are_prefix_of_writes(
        ops in prop::collection::vec(prop::bool::ANY, 1..200),
        payload_len in 4usize..48,
    ) {
        let lane = Lane::new(1 << 10);
        let mut written: Vec<u32> = Vec::new();
        let mut read_back: Vec<u32> = Vec::new();
        let mut next = 0u32;
        let mut buf = [0u8; 256];

        for do_write in ops {
            if do_write {
                let mut payload = vec![0u8; payload_len];
                payload[..4].copy_from_slice(&next.to_le_bytes());
                if lane.write(&payload).is_ok() {
                    written.push(next);
                    next += 1;
                }
            } else if let Ok(n) = lane.read(&mut buf) {
                prop_assert!(n >= 4);
                read_back.push(u32::from_le_bytes(buf[..4].try_into().unwrap()));
            }
        }

        prop_assert!(read_back.len() <= written.len());
        prop_assert_eq!(&written[..read_back.len()], &read_back[..]);
    }

    /// Occupancy never exceeds capacity, and positions never run backwards.
    #[test]
    fn prop_bounded_occupancy(
        ops in prop::collection::vec(prop::bool::ANY, 1..300),
    ) {
        let lane = Lane::new(256);
        let mut buf = [0u8; 64];

        for do_write in ops {
            if do_write {
                let _ = lane.write(&[0xA5; 20]);
            } else {
                let _ = lane.read(&mut buf);
            }
            prop_assert!(lane.len() <= lane.capacity(),
                "occupancy {} exceeds capacity {}", lane.len(), lane.capacity());
        }
    }

    /// A message exactly at the quarter-lane limit is accepted; one byte
    /// larger is rejected, regardless of lane size.
    #[test]
    fn prop_quarter_lane_limit(bits in 8u32..16) {
        let capacity = 1usize << bits;
        let lane = Lane::new(capacity);
        prop_assert!(lane.write(&vec![0; capacity / 4]).is_ok());

        let lane = Lane::new(capacity);
        prop_assert!(
            matches!(
                lane.write(&vec![0; capacity / 4 + 1]),
                Err(ringbus::WriteError::TooLarge { .. })
            ),
            "expected WriteError::TooLarge"
        );
    }
}

// =============================================================================
// Envelope: decode(encode(e)) == e, and any flipped byte is caught
// =============================================================================

fn arb_envelope() -> impl Strategy<Value = Envelope> {
    (
        any::<u32>(),
        any::<u64>(),
        any::<u16>(),
        any::<u16>(),
        any::<u8>(),
        0u8..6,
        any::<u8>(),
        any::<u8>(),
        any::<u32>(),
    )
        .prop_map(
            |(message_id, timestamp_ns, source, target, message_type, prio, flags, core_hint, correlation_id)| {
                Envelope {
                    message_id,
                    timestamp_ns,
                    source,
                    target,
                    message_type,
                    priority: Priority::try_from(prio).unwrap(),
                    flags,
                    core_hint,
                    correlation_id,
                    metadata: Metadata::default(),
                }
            },
        )
}

proptest! {
    #[test]
    fn prop_envelope_round_trip(
        env in arb_envelope(),
        payload in prop::collection::vec(any::<u8>(), 0..512),
    ) {
        let bytes = env.encode(&payload, 1024).unwrap();
        let (decoded, got) = Envelope::decode(&bytes, 1024).unwrap();
        prop_assert_eq!(decoded, env);
        prop_assert_eq!(got, &payload[..]);
    }

    /// Flipping any byte outside the checksum slot (offsets 24..28) makes
    /// decoding fail; the magic bytes fail with UnknownMagic, everything
    /// else with CorruptMessage.
    #[test]
    fn prop_envelope_bit_flip_detected(
        env in arb_envelope(),
        payload in prop::collection::vec(any::<u8>(), 1..128),
        flip_at in 0usize..(HEADER_LEN + 64),
        flip_bit in 0u8..8,
    ) {
        let mut bytes = env.encode(&payload, 1024).unwrap();
        prop_assume!(flip_at < bytes.len());
        // The checksum slot itself is the one region a flip may legally
        // report as the mismatching side.
        prop_assume!(!(24..28).contains(&flip_at));

        bytes[flip_at] ^= 1 << flip_bit;
        match Envelope::decode(&bytes, 1024) {
            Err(EnvelopeError::CorruptMessage { .. })
            | Err(EnvelopeError::UnknownMagic { .. })
            | Err(EnvelopeError::BadPriority { .. }) => {}
            Ok(_) => prop_assert!(false, "flip at {flip_at} went undetected"),
            Err(e) => prop_assert!(false, "unexpected error {e:?}"),
        }
    }
}

// =============================================================================
// Degraded-lane recovery
// =============================================================================

#[test]
fn test_dest_too_small_does_not_degrade() {
    let lane = Lane::new(256);
    // DestTooSmall is a caller bug, not corruption: the lane must stay
    // healthy and the record must remain readable.
    lane.write(b"0123456789").unwrap();
    let mut tiny = [0u8; 2];
    assert!(matches!(
        lane.read(&mut tiny),
        Err(ReadError::DestTooSmall { .. })
    ));
    assert!(!lane.is_degraded());

    let mut buf = [0u8; 32];
    assert_eq!(lane.read(&mut buf).unwrap(), 10);
}
