//! Streaming CRC32 (IEEE 802.3, reflected, polynomial `0xEDB8_8320`).
//!
//! The accumulator is kept in its un-finalized register form between calls so
//! that separate spans of a single logical stream can be folded in one after
//! another — feeding [`Crc32::finalize`]'s *input* (not its output) back in as
//! `state` on the next [`Crc32::update`] call continues the computation as if
//! the bytes had been presented contiguously.

/// Initial register value for a fresh accumulation.
pub const INITIAL: u32 = 0xFFFF_FFFF;

const POLY: u32 = 0xEDB8_8320;

/// Fold `bytes` into `state` and return the new (still un-finalized) register.
///
/// A zero-length `bytes` is a no-op: it returns `state` unchanged rather than
/// folding in a stale byte.
pub fn update(state: u32, bytes: &[u8]) -> u32 {
    if bytes.is_empty() {
        return state;
    }
    let mut crc = state;
    for &byte in bytes {
        crc ^= byte as u32;
        for _ in 0..8 {
            crc = if crc & 1 != 0 { (crc >> 1) ^ POLY } else { crc >> 1 };
        }
    }
    crc
}

/// Apply the final XOR to a running register, producing the publishable CRC32.
pub fn finalize(state: u32) -> u32 {
    !state
}

/// One-shot CRC32 over a single contiguous buffer.
pub fn crc32(bytes: &[u8]) -> u32 {
    finalize(update(INITIAL, bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // "123456789" -> 0xCBF43926, the standard CRC-32/ISO-HDLC check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn empty_input() {
        assert_eq!(crc32(b""), 0);
    }

    #[test]
    fn zero_length_update_is_noop() {
        let state = update(INITIAL, b"abc");
        assert_eq!(update(state, b""), state);
    }

    #[test]
    fn split_spans_match_contiguous() {
        let whole = crc32(b"the quick brown fox");
        let mut state = update(INITIAL, b"the quick ");
        state = update(state, b"brown fox");
        assert_eq!(finalize(state), whole);
    }

    #[test]
    fn header_skip_matches_manual_slice() {
        // Mimic folding a 516-byte datagram while skipping its 4-byte header.
        let mut datagram = [0u8; 516];
        datagram[0] = 0x00;
        datagram[1] = 0x03;
        datagram[2] = 0x00;
        datagram[3] = 0x07;
        for (i, b) in datagram[4..].iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        let expected = crc32(&datagram[4..]);
        let got = crc32(&datagram[4..516]);
        assert_eq!(expected, got);
    }

    #[test]
    fn random_split_point_matches_contiguous() {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        for _ in 0..64 {
            let len: usize = rng.gen_range(0..2048);
            let data: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let split = if len == 0 { 0 } else { rng.gen_range(0..=len) };

            let whole = crc32(&data);
            let mut state = update(INITIAL, &data[..split]);
            state = update(state, &data[split..]);
            assert_eq!(finalize(state), whole, "len={len} split={split}");
        }
    }
}
