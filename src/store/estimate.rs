//! Presizing the per-length stores.
//!
//! When a length bin is first created we estimate how many distinct keys it
//! will hold so the bucket table is allocated once instead of growing. The
//! estimate is the classic balls-in-bins expectation, adjusted for
//! reverse-complement folding (half of all length-L strings canonicalize to
//! the other polarity) and for the extra gapmer variants sharing the bin.

/// Expected number of distinct keys for `total_positions` insertions of
/// length-`length` blocks, with `gapmer_fraction` extra gap-extended
/// variants per block.
pub fn estimate_unique_keys(total_positions: u64, length: usize, gapmer_fraction: f64) -> u64 {
    let balls = (total_positions as f64) * (1.0 + gapmer_fraction);
    // Distinct strings of this length, folded over polarity. Cap the
    // exponent well below overflow; past ~32 bp the space dwarfs any genome.
    let bins = if length >= 32 {
        return balls.ceil() as u64;
    } else {
        (4f64.powi(length as i32) / 2.0).max(1.0)
    };
    let expected = bins * (1.0 - (-balls / bins).exp());
    expected.ceil().max(1.0) as u64
}

/// Bucket-table size for an expected key count: one third headroom, rounded
/// up to a power of two so bucket selection is a mask.
pub fn bucket_count(expected_unique: u64) -> usize {
    let sized = (expected_unique as f64 * 4.0 / 3.0).ceil() as u64;
    (sized.max(16) as usize).next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_lengths_saturate_at_the_string_space() {
        // 4^2 / 2 = 8 distinct canonical 2-mers; a million insertions still
        // only produce 8 keys.
        let unique = estimate_unique_keys(1_000_000, 2, 0.0);
        assert!(unique <= 8, "estimated {} keys for 2-mers", unique);
    }

    #[test]
    fn long_lengths_approach_one_key_per_insertion() {
        let unique = estimate_unique_keys(10_000, 32, 0.0);
        assert_eq!(unique, 10_000);
        let unique = estimate_unique_keys(10_000, 20, 0.0);
        assert!(unique > 9_900, "estimated only {} keys", unique);
    }

    #[test]
    fn gapmer_fraction_scales_the_load() {
        let plain = estimate_unique_keys(10_000, 24, 0.0);
        let extended = estimate_unique_keys(10_000, 24, 0.5);
        assert!(extended > plain);
    }

    #[test]
    fn bucket_count_is_a_power_of_two_with_headroom() {
        let buckets = bucket_count(1000);
        assert!(buckets.is_power_of_two());
        assert!(buckets >= 1334);
    }
}
