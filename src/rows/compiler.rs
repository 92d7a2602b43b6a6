//! Memoizing row compiler for the low levels.
//!
//! Hashing a reference spends most of its time rebuilding levels 1-3 over
//! short substrings that recur constantly. The compiler memoizes those
//! transition chains: a fixed window of concrete bases maps to the level-3
//! items whose spans start inside the window's interior, so a repeated
//! window replays its compiled blocks instead of re-running the merge pass.
//!
//! The cache is an explicit object owned by the index (never process-global)
//! and handed to each pyramid that is allowed to use it. Compilation is only
//! sound when the consumer will never need a level below the compiled one:
//! callers must check [`compiled_rows_eligible`] against their minimum
//! interesting size before opting in.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::trace;

use crate::block::{Block, RowItem};
use crate::config::IndexConfig;
use crate::sequence::{is_concrete, SequenceView};

use super::base::{BaseRow, RowSource};
use super::pyramid::Pyramid;

/// Level the compiler produces directly.
pub const COMPILED_LEVEL: usize = 3;

/// Window geometry. A boundary decision at level `l` can depend on content
/// up to `2^l + 2^(l-1) + ... + 2` bases away (two neighbour blocks plus
/// their own recursive context per level), 14 bases through level 3. The
/// margin covers that on the left; the right slack covers an interior
/// item's full span (8) plus the same context.
const WINDOW: usize = 64;
const MARGIN: usize = 16;
const INTERIOR: usize = 16;

/// Largest footprint a gap-extended block can reach from a level: the core
/// span plus half of it again.
pub fn max_gapmer_reach(level: usize) -> usize {
    let span = 1usize << level;
    span + span / 2
}

/// Whether compiled rows may replace the low levels for this configuration:
/// nothing the skipped levels could produce may ever be interesting.
pub fn compiled_rows_eligible(config: &IndexConfig) -> bool {
    config.min_interesting_size > max_gapmer_reach(COMPILED_LEVEL - 1)
}

/// Shared memo of compiled windows, keyed by the packed window content.
#[derive(Debug)]
pub struct CompilerCache {
    map: Mutex<HashMap<u128, Vec<Block>>>,
    max_entries: usize,
}

impl CompilerCache {
    /// A cache bounded to `max_entries` compiled windows.
    pub fn new(max_entries: usize) -> Self {
        Self {
            map: Mutex::new(HashMap::new()),
            max_entries,
        }
    }

    /// Number of compiled windows currently held.
    pub fn len(&self) -> usize {
        self.map.lock().expect("compiler cache poisoned").len()
    }

    /// Returns `true` when nothing has been compiled yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lookup(&self, key: u128) -> Option<Vec<Block>> {
        self.map
            .lock()
            .expect("compiler cache poisoned")
            .get(&key)
            .cloned()
    }

    fn insert(&self, key: u128, blocks: Vec<Block>) {
        let mut map = self.map.lock().expect("compiler cache poisoned");
        if map.len() < self.max_entries {
            map.insert(key, blocks);
        }
    }
}

/// Pack a fully concrete window into its cache key. `None` when any base is
/// ambiguous.
fn window_key(view: &SequenceView, start: usize) -> Option<u128> {
    let mut key: u128 = 0;
    for idx in start..start + WINDOW {
        let code = view.code_at(idx);
        if !is_concrete(code) {
            return None;
        }
        key = (key << 2) | code.trailing_zeros() as u128;
    }
    Some(key)
}

/// Level-3 item stream produced window by window, replaying compiled blocks
/// wherever the window content has been seen before.
#[derive(Debug)]
pub struct CompiledRows {
    view: SequenceView,
    cache: Arc<CompilerCache>,
    max_combos: usize,
    /// Start of the next interior to emit.
    next_interior: usize,
    pending: Vec<RowItem>,
    pending_next: usize,
}

impl CompiledRows {
    /// Compiled stream over `view`, sharing `cache` with other pyramids.
    pub fn new(view: SequenceView, cache: Arc<CompilerCache>, max_combos: usize) -> Self {
        Self {
            view,
            cache,
            max_combos,
            next_interior: 0,
            pending: Vec::new(),
            pending_next: 0,
        }
    }

    /// Run the generic merge pass over `range` and keep the level-3 items
    /// starting inside `keep`.
    fn scratch_items(&self, range: (usize, usize), keep: (usize, usize)) -> Vec<RowItem> {
        let base = BaseRow::over_range(self.view.clone(), range.0, range.1);
        let mut pyramid = Pyramid::with_source(self.view.clone(), Box::new(base), self.max_combos);
        // A range-restricted base row still reports level 0.
        let mut items = Vec::new();
        let mut from = range.0;
        while let Some(item) = pyramid.item_at_or_after(COMPILED_LEVEL, from) {
            let start = item.start_index();
            from = start + 1;
            if start >= keep.0 && start < keep.1 {
                items.push(item);
            }
            pyramid.advance_past(start);
        }
        items
    }

    fn refill(&mut self) {
        let len = self.view.len();
        while self.pending_next >= self.pending.len() && self.next_interior < len {
            self.pending.clear();
            self.pending_next = 0;

            let interior_start = self.next_interior;
            let interior_end = (interior_start + INTERIOR).min(len);
            self.next_interior = interior_end;

            let window_start = interior_start.saturating_sub(MARGIN);
            let full_window = interior_start >= MARGIN
                && window_start + WINDOW <= len
                && interior_end == interior_start + INTERIOR;

            if full_window {
                if let Some(key) = window_key(&self.view, window_start) {
                    if let Some(blocks) = self.cache.lookup(key) {
                        trace!(window_start, "compiled window hit");
                        self.pending = blocks
                            .iter()
                            .map(|b| RowItem::Single(b.shifted(window_start as isize)))
                            .collect();
                        continue;
                    }
                    let items = self.scratch_items(
                        (window_start, window_start + WINDOW),
                        (interior_start, interior_end),
                    );
                    // Concrete windows only ever yield concrete items.
                    let blocks: Vec<Block> = items
                        .iter()
                        .filter_map(RowItem::as_single)
                        .map(|b| b.shifted(-(window_start as isize)))
                        .collect();
                    debug_assert_eq!(blocks.len(), items.len());
                    self.cache.insert(key, blocks);
                    self.pending = items;
                    continue;
                }
            }

            // Edge or ambiguous window: compute without caching.
            let range_start = interior_start.saturating_sub(MARGIN);
            let range_end = (interior_end + WINDOW).min(len);
            self.pending =
                self.scratch_items((range_start, range_end), (interior_start, interior_end));
        }
    }
}

impl RowSource for CompiledRows {
    fn next_item(&mut self) -> Option<RowItem> {
        self.refill();
        let item = self.pending.get(self.pending_next).cloned()?;
        self.pending_next += 1;
        Some(item)
    }

    fn level(&self) -> usize {
        COMPILED_LEVEL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{SequenceDatabase, SequenceId, Strand};

    fn view_of(ascii: &'static [u8]) -> SequenceView {
        let db = SequenceDatabase::from_named_ascii(&[("t", ascii)]).unwrap();
        db.view(SequenceId(0), Strand::Forward).unwrap()
    }

    fn level3_generic(view: &SequenceView) -> Vec<(usize, usize, u64)> {
        let mut pyramid = Pyramid::new(view.clone(), 64);
        let mut out = Vec::new();
        let mut from = 0;
        while let Some(item) = pyramid.item_at_or_after(COMPILED_LEVEL, from) {
            from = item.start_index() + 1;
            if let Some(b) = item.as_single() {
                out.push((b.start_index(), b.length(), b.canonical_hash()));
            }
        }
        out
    }

    fn level3_compiled(
        view: &SequenceView,
        cache: &Arc<CompilerCache>,
    ) -> Vec<(usize, usize, u64)> {
        let mut rows = CompiledRows::new(view.clone(), Arc::clone(cache), 64);
        let mut out = Vec::new();
        while let Some(item) = rows.next_item() {
            if let Some(b) = item.as_single() {
                out.push((b.start_index(), b.length(), b.canonical_hash()));
            }
        }
        out
    }

    #[test]
    fn compiled_rows_match_the_generic_pass() {
        let view = view_of(
            b"ACGGTCACGATGGTTACGATCGGATCGATTACGGATCCATAGGCATACGTACGGTCAGGACTACGGATCGGT\
              ACGATCGGATCGATTACGCAGGACTACGGATCGGTACGATCGGATAGGCATACGTACGGTCAGG",
        );
        let cache = Arc::new(CompilerCache::new(1 << 16));
        let generic = level3_generic(&view);
        let compiled = level3_compiled(&view, &cache);
        assert_eq!(generic, compiled);
        assert!(!cache.is_empty());
    }

    #[test]
    fn cache_hits_replay_identically() {
        let view = view_of(
            b"ACGGTCACGATGGTTACGATCGGATCGATTACGGATCCATAGGCATACGTACGGTCAGGACTACGGATCGGT\
              ACGGTCACGATGGTTACGATCGGATCGATTACGGATCCATAGGCATACGTACGGTCAGGACTACGGATCGGT",
        );
        let cache = Arc::new(CompilerCache::new(1 << 16));
        let first = level3_compiled(&view, &cache);
        let second = level3_compiled(&view, &cache);
        assert_eq!(first, second);
    }

    #[test]
    fn eligibility_tracks_the_gapmer_reach() {
        let eligible = IndexConfig {
            min_interesting_size: 8,
            ..IndexConfig::default()
        };
        assert!(compiled_rows_eligible(&eligible));
        let ineligible = IndexConfig {
            min_interesting_size: 4,
            ..IndexConfig::default()
        };
        assert!(!compiled_rows_eligible(&ineligible));
    }
}
