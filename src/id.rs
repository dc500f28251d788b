//! Wrap-aware ordering for the wire's fixed-width sequence identifiers.
//!
//! `global_id`/`data_global_id` wrap at 16 bits, `group_id`/`frame_id`/
//! `batch_id` at 32 bits. Plain `<` is wrong once a counter wraps, so every
//! comparison in the sender/receiver goes through these helpers instead.
//! Mirrors `Uint16Less`/`Uint64Less` in `common-header.h`.

/// `a` is considered "less than" `b` on the half-circle `|a - b| < 2^(BITS-1)`.
macro_rules! wrapping_lt_impl {
    ($name:ident, $uty:ty, $half:expr) => {
        pub fn $name(a: $uty, b: $uty) -> bool {
            let wrapping_sub_ba = b.wrapping_sub(a);
            let wrapping_sub_ab = a.wrapping_sub(b);
            wrapping_sub_ba < wrapping_sub_ab
        }
    };
}

wrapping_lt_impl!(wrapping_lt_u16, u16, 1u16 << 15);
wrapping_lt_impl!(wrapping_lt_u32, u32, 1u32 << 31);
wrapping_lt_impl!(wrapping_lt_u64, u64, 1u64 << 63);

/// `a <= b` under the same wrap-aware ordering.
pub fn wrapping_le_u16(a: u16, b: u16) -> bool {
    a == b || wrapping_lt_u16(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_on_half_circle() {
        // Exhaustively check every pair within the valid half-circle radius.
        for a in 0u16..=255 {
            for d in 1u16..=30000 {
                let b = a.wrapping_add(d);
                // Exactly one of a<b, b<a should hold (never both, never neither),
                // since a != b and d is within the half-circle.
                let a_lt_b = wrapping_lt_u16(a, b);
                let b_lt_a = wrapping_lt_u16(b, a);
                assert_ne!(a_lt_b, b_lt_a, "a={a} b={b} d={d}");
            }
        }
    }

    #[test]
    fn wraps_around_correctly() {
        assert!(wrapping_lt_u16(65535, 0));
        assert!(wrapping_lt_u16(65530, 5));
        assert!(!wrapping_lt_u16(5, 65530));
    }

    #[test]
    fn le_is_reflexive() {
        assert!(wrapping_le_u16(42, 42));
        assert!(wrapping_le_u16(42, 43));
        assert!(!wrapping_le_u16(43, 42));
    }

    #[test]
    fn u32_and_u64_variants_agree_with_u16_shape() {
        assert!(wrapping_lt_u32(u32::MAX, 0));
        assert!(!wrapping_lt_u32(0, u32::MAX));
        assert!(wrapping_lt_u64(u64::MAX, 0));
        assert!(!wrapping_lt_u64(0, u64::MAX));
    }
}
