//! Tuning parameters for index construction and candidate matching.

use thiserror::Error;

/// Errors raised by configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A size bound was zero or inverted.
    #[error("invalid size bounds: min_interesting_size {min} must be >= 1 and <= initial ceiling {max}")]
    InvalidSizes {
        /// Configured minimum interesting size.
        min: usize,
        /// Configured initial ceiling.
        max: usize,
    },

    /// The per-key capacity cannot be represented by any supported counter.
    #[error("per-key capacity {0} exceeds the widest supported counter")]
    CapacityTooLarge(usize),
}

/// Configuration parameters for the index.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize))]
pub struct IndexConfig {
    /// Smallest block length worth storing or querying.
    pub min_interesting_size: usize,

    /// Initial ceiling on stored block lengths. Doubled on demand; never
    /// lowered.
    pub initial_max_interesting_size: usize,

    /// Most positions one key may hold before it overflows.
    pub max_matches_per_key: usize,

    /// Budget used for the length-dependent match ceiling: a block of length
    /// `L` tolerates about `match_budget / L` matches before the traversal
    /// grows it.
    pub match_budget: usize,

    /// Match count below which a gap-extended candidate is considered too
    /// discriminating and the traversal shrinks the block instead.
    pub min_useful_matches: usize,

    /// Cap on pairwise hypothesis combinations explored when merging
    /// ambiguous rows.
    pub max_ambiguity_combinations: usize,

    /// Pending-queue depth past which an inserting thread drains the store
    /// itself.
    pub pending_queue_depth: usize,

    /// Recently-seen hashes remembered by the traversal to skip redundant
    /// candidates.
    pub recent_hash_window: usize,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            min_interesting_size: 8,
            initial_max_interesting_size: 32,
            max_matches_per_key: 100,
            match_budget: 240,
            min_useful_matches: 6,
            max_ambiguity_combinations: 64,
            pending_queue_depth: 32,
            recent_hash_window: 8,
        }
    }
}

impl IndexConfig {
    /// Validate the configuration, failing fast on tuning bugs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_interesting_size == 0
            || self.min_interesting_size > self.initial_max_interesting_size
        {
            return Err(ConfigError::InvalidSizes {
                min: self.min_interesting_size,
                max: self.initial_max_interesting_size,
            });
        }
        if self.max_matches_per_key > (u32::MAX - 2) as usize {
            return Err(ConfigError::CapacityTooLarge(self.max_matches_per_key));
        }
        Ok(())
    }

    /// The length-dependent ceiling on useful match counts.
    pub fn max_matches_allowed(&self, length: usize) -> usize {
        (self.match_budget / length.max(1)).max(self.min_useful_matches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        IndexConfig::default().validate().expect("defaults validate");
    }

    #[test]
    fn inverted_sizes_are_rejected() {
        let config = IndexConfig {
            min_interesting_size: 64,
            initial_max_interesting_size: 32,
            ..IndexConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidSizes { .. })
        ));
    }

    #[test]
    fn match_ceiling_shrinks_with_length() {
        let config = IndexConfig::default();
        assert!(config.max_matches_allowed(4) > config.max_matches_allowed(32));
        assert!(config.max_matches_allowed(1000) >= config.min_useful_matches);
    }
}
