//! SHA-256 based identifier arithmetic on an m-bit modular ring.
//!
//! Node and key identifiers are the big-endian interpretation of a SHA-256
//! digest reduced modulo `2^m`. Because the modulus is a power of two the
//! reduction is a mask over the low 64 bits of the digest.
//!
//! The central predicate is [`is_in_arc`]: walking clockwise from `a` to `b`
//! (both inclusive), do we pass through `x`? Arcs may wrap around zero.

use sha2::{Digest, Sha256};

use crate::RingId;

/// Bit mask selecting the valid identifier range for a given bit length.
///
/// `bitlen` values of 64 and above select the full `u64` range.
pub fn ring_mask(bitlen: u8) -> RingId {
    if bitlen >= 64 {
        u64::MAX
    } else {
        (1u64 << bitlen) - 1
    }
}

/// Add `n` to `a` modulo `2^bitlen`.
pub fn ring_add(a: RingId, n: RingId, bitlen: u8) -> RingId {
    a.wrapping_add(n) & ring_mask(bitlen)
}

/// Hash an arbitrary byte string into the identifier ring.
///
/// Computes `SHA256(key)` interpreted big-endian, reduced modulo `2^bitlen`.
pub fn hash_id(key: &[u8], bitlen: u8) -> RingId {
    let digest = Sha256::digest(key);
    // Reduction modulo a power of two keeps only the low bits, so the last
    // eight digest bytes carry everything we need.
    let mut tail = [0u8; 8];
    tail.copy_from_slice(&digest[24..32]);
    u64::from_be_bytes(tail) & ring_mask(bitlen)
}

/// Full lowercase hex digest of a byte string.
///
/// Upper layers use this to derive blob identifiers; [`id_from_hex`] maps
/// them back onto the ring.
pub fn hash_hex(key: &[u8]) -> String {
    hex::encode(Sha256::digest(key))
}

/// Map a hex blob identifier onto the ring: `int(s, 16) mod 2^bitlen`.
///
/// Returns `None` when `s` is empty or contains a non-hex character. Only
/// the trailing 16 hex digits matter for the power-of-two reduction.
pub fn id_from_hex(s: &str, bitlen: u8) -> Option<RingId> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    let tail_start = s.len().saturating_sub(16);
    let value = u64::from_str_radix(&s[tail_start..], 16).ok()?;
    Some(value & ring_mask(bitlen))
}

/// Clockwise-inclusive arc membership: is `x` on the arc `[a, b]`?
///
/// When `a <= b` this is the plain interval check; otherwise the arc wraps
/// through zero. Callers wanting a half-open lower bound pass
/// `ring_add(a, 1, bitlen)`.
pub fn is_in_arc(x: RingId, a: RingId, b: RingId) -> bool {
    if a <= b {
        a <= x && x <= b
    } else {
        x >= a || x <= b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_widths() {
        assert_eq!(ring_mask(8), 0xFF);
        assert_eq!(ring_mask(32), 0xFFFF_FFFF);
        assert_eq!(ring_mask(64), u64::MAX);
    }

    #[test]
    fn test_ring_add_wraps() {
        assert_eq!(ring_add(250, 10, 8), 4);
        assert_eq!(ring_add(0xFFFF_FFFF, 1, 32), 0);
        assert_eq!(ring_add(5, 3, 8), 8);
    }

    #[test]
    fn test_hash_id_is_deterministic_and_masked() {
        let a = hash_id(b"10.0.0.1:4321", 32);
        let b = hash_id(b"10.0.0.1:4321", 32);
        assert_eq!(a, b);
        assert!(a <= ring_mask(32));

        let small = hash_id(b"10.0.0.1:4321", 8);
        assert!(small <= 0xFF);
        // The small space is the masked view of the larger one.
        assert_eq!(small, a & 0xFF);
    }

    #[test]
    fn test_hash_hex_matches_hash_id() {
        let hex_digest = hash_hex(b"some-track");
        assert_eq!(hex_digest.len(), 64);
        let from_hex = id_from_hex(&hex_digest, 32).expect("valid hex");
        assert_eq!(from_hex, hash_id(b"some-track", 32));
    }

    #[test]
    fn test_id_from_hex_rejects_garbage() {
        assert_eq!(id_from_hex("", 32), None);
        assert_eq!(id_from_hex("xyz", 32), None);
        assert_eq!(id_from_hex("12g4", 32), None);
        assert_eq!(id_from_hex("0032", 8), Some(50));
    }

    #[test]
    fn test_arc_plain_interval() {
        assert!(is_in_arc(5, 1, 10));
        assert!(is_in_arc(1, 1, 10));
        assert!(is_in_arc(10, 1, 10));
        assert!(!is_in_arc(11, 1, 10));
        assert!(!is_in_arc(0, 1, 10));
    }

    #[test]
    fn test_arc_wraparound() {
        // Walking clockwise from 250 to 10 passes through 0.
        assert!(is_in_arc(0, 250, 10));
        assert!(is_in_arc(255, 250, 10));
        assert!(is_in_arc(10, 250, 10));
        assert!(is_in_arc(250, 250, 10));
        assert!(!is_in_arc(100, 250, 10));
    }

    #[test]
    fn test_arc_degenerate_single_point() {
        assert!(is_in_arc(7, 7, 7));
        assert!(!is_in_arc(8, 7, 7));
    }

    #[test]
    fn test_arc_translation_law() {
        // is_in_arc(x, a, b) == is_in_arc((x-a) mod 2^m, 0, (b-a) mod 2^m)
        let m = 8u8;
        let mask = ring_mask(m);
        for &(x, a, b) in &[
            (0u64, 250u64, 10u64),
            (100, 250, 10),
            (5, 1, 10),
            (42, 200, 199),
            (199, 200, 199),
        ] {
            let shifted_x = x.wrapping_sub(a) & mask;
            let shifted_b = b.wrapping_sub(a) & mask;
            assert_eq!(
                is_in_arc(x, a, b),
                is_in_arc(shifted_x, 0, shifted_b),
                "translation law failed for ({x}, {a}, {b})"
            );
        }
    }
}
