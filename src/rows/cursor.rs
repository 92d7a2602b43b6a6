//! The adaptive candidate traversal.
//!
//! `next_interesting_block` walks one strand and yields blocks whose match
//! count is useful: not so common that the candidate list is noise, not so
//! rare that the lookup was wasted. The cursor grows the block (up a level)
//! when the reference is locally repetitive and shrinks it (down a level)
//! when even a gap-extended block matches almost nothing, which keeps
//! per-query lookup cost roughly flat regardless of local repeat content.

use std::collections::{HashSet, VecDeque};

use crate::block::{Block, RowItem};

use super::pyramid::Pyramid;

/// Match-count estimate for a candidate block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchCount {
    /// The index knows the exact count.
    Exact(usize),
    /// The key overflowed: treat as unbounded.
    TooMany,
}

/// Capacity and match-count signals the traversal steers by. Implemented by
/// the index read view.
pub trait MatchOracle {
    /// Smallest block length worth querying.
    fn min_interesting_size(&self) -> usize;

    /// Length-dependent ceiling on useful match counts.
    fn max_matches_allowed(&self, length: usize) -> usize;

    /// Match count below which a candidate is too discriminating.
    fn min_useful_matches(&self) -> usize;

    /// Count the reference positions matching `block`.
    fn count_matches(&mut self, block: &Block) -> MatchCount;
}

/// A candidate emitted by the traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Candidate {
    /// A concrete block, possibly gap-extended for discrimination.
    Single(Block),
    /// An ambiguous region; the caller decides how to treat hypotheses.
    Ambiguous(RowItem),
}

/// Traversal cursor over one pyramid.
#[derive(Debug)]
pub struct CandidateCursor {
    pyramid: Pyramid,
    level: usize,
    position: usize,
    recent: VecDeque<u64>,
    recent_capacity: usize,
    last_emitted: Option<(usize, usize)>,
    /// (level, start) states tried since the last advance; a revisit means
    /// the grow/shrink policy is cycling and the cursor must step over.
    visited: HashSet<(usize, usize)>,
}

impl CandidateCursor {
    /// Cursor starting at the pyramid's base level.
    pub fn new(pyramid: Pyramid, recent_capacity: usize) -> Self {
        let level = pyramid.base_level().max(1);
        Self {
            pyramid,
            level,
            position: 0,
            recent: VecDeque::new(),
            recent_capacity,
            last_emitted: None,
            visited: HashSet::new(),
        }
    }

    /// The underlying pyramid.
    pub fn pyramid(&self) -> &Pyramid {
        &self.pyramid
    }

    fn remember(&mut self, hash: u64) {
        if self.recent.len() == self.recent_capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(hash);
    }

    fn climb_or_skip(&mut self, block: &Block) {
        // Growing the block is the normal response to a too-common hash, but
        // a degenerate repeat can stay too common at every size. Past the
        // climb cap, step over the region instead.
        const MAX_CLIMB: usize = 32;
        if self.level < self.pyramid.base_level() + MAX_CLIMB {
            self.level += 1;
        } else {
            self.position = block.start_index() + 1;
            self.visited.clear();
        }
    }

    fn overlap_floor(&self) -> usize {
        // A candidate may overlap the previous one by at most a quarter of
        // the previous block's length.
        match self.last_emitted {
            Some((start, length)) => start + length - (length / 4),
            None => 0,
        }
    }

    /// Yield the next block whose estimated match count is within the useful
    /// band, or `None` when the strand is exhausted.
    pub fn next_interesting_block(&mut self, oracle: &mut dyn MatchOracle) -> Option<Candidate> {
        loop {
            let floor = self.overlap_floor().max(self.position);
            let Some(item) = self.pyramid.item_at_or_after(self.level, floor) else {
                // Nothing further at this level; try finer blocks before
                // giving up.
                if self.level > self.pyramid.base_level().max(1) {
                    self.level -= 1;
                    continue;
                }
                return None;
            };

            let block = match item {
                RowItem::Single(block) => block,
                ambiguous @ RowItem::Ambiguous(_) => {
                    self.position = ambiguous.start_index() + 1;
                    self.visited.clear();
                    self.pyramid.advance_past(self.position.saturating_sub(1));
                    return Some(Candidate::Ambiguous(ambiguous));
                }
            };

            if !self.visited.insert((self.level, block.start_index())) {
                // The level policy revisited a state without progressing:
                // nothing at this position is interesting, step over it.
                self.position = block.start_index() + 1;
                self.visited.clear();
                continue;
            }

            if block.length() < oracle.min_interesting_size() {
                // Too small to ever be interesting: climb until sizes reach
                // the useful range, or step over a block that never merges.
                self.climb_or_skip(&block);
                continue;
            }

            if self.recent.contains(&block.canonical_hash()) {
                self.position = block.start_index() + 1;
                self.visited.clear();
                continue;
            }

            match oracle.count_matches(&block) {
                MatchCount::TooMany => {
                    self.climb_or_skip(&block);
                    continue;
                }
                MatchCount::Exact(count) if count > oracle.max_matches_allowed(block.length()) => {
                    self.climb_or_skip(&block);
                    continue;
                }
                MatchCount::Exact(count) => {
                    // Prefer the gap-extended form when it is available; its
                    // count decides whether the block is too discriminating.
                    let extended = block.gap_extended(self.pyramid.view());
                    let (chosen, effective) = match extended {
                        Some(ext) => match oracle.count_matches(&ext) {
                            MatchCount::TooMany => (block, count),
                            MatchCount::Exact(ext_count) => (ext, ext_count),
                        },
                        None => (block, count),
                    };
                    if effective < oracle.min_useful_matches()
                        && self.level > self.pyramid.base_level().max(1)
                    {
                        self.level -= 1;
                        continue;
                    }
                    self.remember(block.canonical_hash());
                    if chosen.canonical_hash() != block.canonical_hash() {
                        self.remember(chosen.canonical_hash());
                    }
                    self.last_emitted = Some((chosen.start_index(), chosen.length()));
                    self.position = chosen.start_index() + 1;
                    self.visited.clear();
                    self.pyramid.advance_past(chosen.start_index());
                    return Some(Candidate::Single(chosen));
                }
            }
        }
    }
}
