//! Per-thread read snapshot of the index.
//!
//! A view holds an immutable list of committed packed stores plus the
//! watermark they were committed under, so queries never contend on the
//! writer's locks. A query for a longer block calls back into the writable
//! index, which may recruit the calling thread into construction before the
//! view refreshes its snapshot.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::block::Block;
use crate::rows::{MatchCount, MatchOracle};
use crate::sequence::StrandPosition;
use crate::store::{CountLookup, PackedPositionStore, PositionLookup};

use super::writer::GenomeIndex;

/// Result of a candidate block lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchLookup {
    /// The key overflowed: the caller must treat the region as unindexed and
    /// assume an unbounded match count.
    Unknown,
    /// Every known position, on the strand the queried block reads forward.
    Positions(Vec<StrandPosition>),
}

/// Both-strand listing returned by the diagnostic forward-hash lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BothStrands {
    /// Positions reading the content as queried.
    pub forward: Vec<StrandPosition>,
    /// The same occurrences reflected onto the opposite strand.
    pub reverse: Vec<StrandPosition>,
}

/// A lazily-refreshed, read-only snapshot of the index for one consumer
/// thread.
#[derive(Debug)]
pub struct IndexView {
    index: Arc<GenomeIndex>,
    stores: BTreeMap<usize, Arc<PackedPositionStore>>,
    max_hashed_length: usize,
    epoch: u64,
}

impl IndexView {
    pub(super) fn new(index: Arc<GenomeIndex>) -> Self {
        let (stores, max_hashed_length, epoch) = index.snapshot();
        Self {
            index,
            stores,
            max_hashed_length,
            epoch,
        }
    }

    /// The writable index this view reads.
    pub fn index(&self) -> &Arc<GenomeIndex> {
        &self.index
    }

    /// Longest block length answerable without calling back into the
    /// writable index.
    pub fn max_hashed_length(&self) -> usize {
        self.max_hashed_length
    }

    /// Smallest block length worth querying.
    pub fn min_interesting_size(&self) -> usize {
        self.index.min_interesting_size()
    }

    /// Length-dependent ceiling on useful match counts for `block`.
    pub fn max_num_matches_allowed(&self, block: &Block) -> usize {
        self.index.config().max_matches_allowed(block.length())
    }

    /// Re-read the snapshot if the index has committed more since.
    pub fn refresh(&mut self) {
        if self.index.epoch() != self.epoch {
            let (stores, max_hashed_length, epoch) = self.index.snapshot();
            self.stores = stores;
            self.max_hashed_length = max_hashed_length;
            self.epoch = epoch;
        }
    }

    /// Ensure the index covers `length`, contributing construction work if
    /// recruited, then refresh the snapshot.
    pub fn update_through_size(&mut self, length: usize) {
        self.index.require_set_up_through_size(length);
        self.refresh();
    }

    fn store_for(&self, length: usize) -> Option<&Arc<PackedPositionStore>> {
        self.stores.get(&length)
    }

    fn decode_all(&self, encoded: Vec<u64>) -> Vec<StrandPosition> {
        let codec = self.index.database().codec();
        encoded.into_iter().map(|value| codec.decode(value)).collect()
    }

    fn reflect_all(&self, positions: &[StrandPosition], length: usize) -> Vec<StrandPosition> {
        let db = self.index.database();
        positions
            .iter()
            .map(|position| {
                let seq_len = db
                    .get(position.sequence)
                    .expect("stored position refers to an unknown sequence")
                    .len();
                position.reflected(seq_len, length)
            })
            .collect()
    }

    /// Primary query: every reference position resembling `block`.
    ///
    /// The lookup is polarity-normalized - a block is only ever stored under
    /// one strand orientation - so a block queried in its non-primary
    /// polarity has every returned position reflected back onto the strand
    /// it was queried on.
    pub fn match_block(&mut self, block: &Block) -> MatchLookup {
        if block.length() > self.max_hashed_length {
            self.update_through_size(block.length());
        }
        let Some(store) = self.store_for(block.length()) else {
            return MatchLookup::Positions(Vec::new());
        };
        let budget = self.index.config().max_matches_allowed(block.length());
        match store.get(block.canonical_hash(), budget) {
            PositionLookup::Overflowed => MatchLookup::Unknown,
            PositionLookup::Positions(encoded) => {
                let positions = self.decode_all(encoded);
                if block.primary_is_forward() {
                    MatchLookup::Positions(positions)
                } else {
                    MatchLookup::Positions(self.reflect_all(&positions, block.length()))
                }
            }
        }
    }

    /// Whether the index can enumerate every match for `block` (committed
    /// length, non-overflowed key, within the useful-count ceiling).
    pub fn knows_all_matches(&mut self, block: &Block) -> bool {
        if block.length() > self.max_hashed_length {
            return false;
        }
        let Some(store) = self.store_for(block.length()) else {
            return true; // committed but empty bin: zero matches, all known
        };
        match store.count(block.canonical_hash()) {
            CountLookup::Overflowed => false,
            CountLookup::Exact(count) => {
                count <= self.index.config().max_matches_allowed(block.length())
            }
        }
    }

    /// Diagnostic lookup used by duplication scanning: the occurrences of a
    /// block's content on both strands, regardless of query polarity.
    pub fn lookup_by_forward_hash(&mut self, block: &Block) -> Option<BothStrands> {
        if block.length() > self.max_hashed_length {
            self.update_through_size(block.length());
        }
        let store = self.store_for(block.length())?;
        match store.get(block.canonical_hash(), usize::MAX) {
            PositionLookup::Overflowed => None,
            PositionLookup::Positions(encoded) => {
                let stored = self.decode_all(encoded);
                let forward = if block.primary_is_forward() {
                    stored.clone()
                } else {
                    self.reflect_all(&stored, block.length())
                };
                let reverse = self.reflect_all(&forward, block.length());
                Some(BothStrands { forward, reverse })
            }
        }
    }
}

impl MatchOracle for IndexView {
    fn min_interesting_size(&self) -> usize {
        self.index.min_interesting_size()
    }

    fn max_matches_allowed(&self, length: usize) -> usize {
        self.index.config().max_matches_allowed(length)
    }

    fn min_useful_matches(&self) -> usize {
        self.index.config().min_useful_matches
    }

    fn count_matches(&mut self, block: &Block) -> MatchCount {
        if block.length() > self.max_hashed_length {
            self.update_through_size(block.length());
        }
        let Some(store) = self.store_for(block.length()) else {
            return MatchCount::Exact(0);
        };
        match store.count(block.canonical_hash()) {
            CountLookup::Overflowed => MatchCount::TooMany,
            CountLookup::Exact(count) => MatchCount::Exact(count),
        }
    }
}
