//! Random-access cache over the per-level item streams of one sequence.
//!
//! Levels are produced lazily: pulling an item at level `k` consumes just
//! enough of level `k-1`, which consumes level `k-2`, and so on down to the
//! base source. Items behind the consumer frontier are garbage collected, so
//! memory is bounded by each level's active window rather than by sequence
//! length.

use std::collections::VecDeque;

use crate::block::RowItem;
use crate::sequence::SequenceView;

use super::base::{BaseRow, RowSource};
use super::parent::produce_parent_item;

#[derive(Debug)]
struct CachedItem {
    item: RowItem,
    fresh: bool,
}

enum LevelFeed {
    /// Fed by an external source (the base row or compiled rows).
    Source(Box<dyn RowSource>),
    /// Fed by merging the level below.
    Derived { child_cursor: usize },
}

struct Level {
    feed: LevelFeed,
    cache: VecDeque<CachedItem>,
    /// Ordinal of `cache[0]` within the level's full stream.
    cache_start: usize,
    produced: usize,
    /// Ordinal up to which fresh items have been handed to the recorder.
    recorded: usize,
    merges: usize,
    exhausted: bool,
}

impl Level {
    fn new(feed: LevelFeed) -> Self {
        Self {
            feed,
            cache: VecDeque::new(),
            cache_start: 0,
            produced: 0,
            recorded: 0,
            merges: 0,
            exhausted: false,
        }
    }

    fn get(&self, ordinal: usize) -> &CachedItem {
        assert!(
            ordinal >= self.cache_start && ordinal < self.produced,
            "ordinal {} outside cached window {}..{}",
            ordinal,
            self.cache_start,
            self.produced
        );
        &self.cache[ordinal - self.cache_start]
    }
}

/// The leveled hierarchy of increasingly larger blocks over one strand.
pub struct Pyramid {
    view: SequenceView,
    base_level: usize,
    levels: Vec<Level>,
    max_combos: usize,
    record_fresh: bool,
}

impl std::fmt::Debug for Pyramid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pyramid")
            .field("base_level", &self.base_level)
            .field("levels", &self.levels.len())
            .finish_non_exhaustive()
    }
}

impl Pyramid {
    /// Pyramid rooted at the base row of `view`.
    pub fn new(view: SequenceView, max_combos: usize) -> Self {
        let base = BaseRow::new(view.clone());
        Self::with_source(view, Box::new(base), max_combos)
    }

    /// Pyramid rooted at an arbitrary source (e.g. compiled rows).
    pub fn with_source(
        view: SequenceView,
        source: Box<dyn RowSource>,
        max_combos: usize,
    ) -> Self {
        let base_level = source.level();
        Self {
            view,
            base_level,
            levels: vec![Level::new(LevelFeed::Source(source))],
            max_combos,
            record_fresh: false,
        }
    }

    /// Track freshly created items for [`Pyramid::for_each_unrecorded`].
    pub fn track_fresh(&mut self) {
        self.record_fresh = true;
    }

    /// The strand this pyramid reads.
    pub fn view(&self) -> &SequenceView {
        &self.view
    }

    /// Lowest level number this pyramid produces.
    pub fn base_level(&self) -> usize {
        self.base_level
    }

    /// Highest level currently instantiated.
    pub fn top_level(&self) -> usize {
        self.base_level + self.levels.len() - 1
    }

    /// Count of merged (fresh) items produced at `level` so far.
    pub fn merge_count(&self, level: usize) -> usize {
        self.index_of(level)
            .map(|idx| self.levels[idx].merges)
            .unwrap_or(0)
    }

    /// Whether `level`'s stream has ended.
    pub fn is_exhausted(&self, level: usize) -> bool {
        self.index_of(level)
            .map(|idx| self.levels[idx].exhausted)
            .unwrap_or(false)
    }

    fn index_of(&self, level: usize) -> Option<usize> {
        level.checked_sub(self.base_level).filter(|&idx| idx < self.levels.len())
    }

    /// Instantiate derived levels up through `level`.
    pub fn ensure_level(&mut self, level: usize) {
        assert!(
            level >= self.base_level,
            "level {} below the pyramid base {}",
            level,
            self.base_level
        );
        while self.base_level + self.levels.len() <= level {
            self.levels
                .push(Level::new(LevelFeed::Derived { child_cursor: 0 }));
        }
    }

    /// Produce one more item at `level`. Returns `false` once exhausted.
    pub fn produce_next(&mut self, level: usize) -> bool {
        self.ensure_level(level);
        self.produce_one(level - self.base_level)
    }

    fn produce_one(&mut self, idx: usize) -> bool {
        if self.levels[idx].exhausted {
            return false;
        }

        let cursor = match &self.levels[idx].feed {
            LevelFeed::Source(_) => None,
            LevelFeed::Derived { child_cursor } => Some(*child_cursor),
        };

        let step = match cursor {
            None => {
                let LevelFeed::Source(source) = &mut self.levels[idx].feed else {
                    unreachable!("source level changed kind");
                };
                source.next_item().map(|item| (item, 0usize, true))
            }
            Some(cursor) => {
                // Fill the child window: the item under the cursor plus two
                // of lookahead for the boundary decision.
                while self.levels[idx - 1].produced < cursor + 3
                    && !self.levels[idx - 1].exhausted
                {
                    if !self.produce_one(idx - 1) {
                        break;
                    }
                }
                let child = &self.levels[idx - 1];
                let window: Vec<RowItem> = (cursor..child.produced.min(cursor + 3))
                    .map(|ord| child.get(ord).item.clone())
                    .collect();
                let prev = cursor
                    .checked_sub(1)
                    .filter(|&ord| ord >= child.cache_start)
                    .map(|ord| child.get(ord).item.clone());
                produce_parent_item(prev.as_ref(), &window, self.max_combos)
                    .map(|step| (step.item, step.children_consumed, step.fresh))
            }
        };

        let Some((item, consumed, fresh)) = step else {
            self.levels[idx].exhausted = true;
            return false;
        };

        if consumed > 0 {
            if let LevelFeed::Derived { child_cursor } = &mut self.levels[idx].feed {
                *child_cursor += consumed;
            }
        }

        // Stamp the previous item's "next block" lean now that it is known.
        if let RowItem::Single(new_block) = &item {
            let lean = new_block.lean();
            if let Some(last) = self.levels[idx].cache.back_mut() {
                if let RowItem::Single(prev_block) = &mut last.item {
                    prev_block.stamp_next_lean(lean);
                }
            }
        }

        let level = &mut self.levels[idx];
        level.cache.push_back(CachedItem { item, fresh });
        level.produced += 1;
        if fresh {
            level.merges += 1;
        }
        if !self.record_fresh {
            level.recorded = level.produced;
        }
        true
    }

    /// Hand every not-yet-reported fresh item to `f` as `(level, item)`.
    pub fn for_each_unrecorded(&mut self, mut f: impl FnMut(usize, &RowItem)) {
        for (idx, level) in self.levels.iter_mut().enumerate() {
            let level_number = self.base_level + idx;
            for ordinal in level.recorded..level.produced {
                let cached = &level.cache[ordinal - level.cache_start];
                if cached.fresh {
                    f(level_number, &cached.item);
                }
            }
            level.recorded = level.produced;
        }
    }

    /// Discard cached items the traversal has moved past.
    ///
    /// An item is dropped once its span ends at or before `index`, it has
    /// been reported, and the level above no longer needs it as merge
    /// context.
    pub fn advance_past(&mut self, index: usize) {
        for idx in 0..self.levels.len() {
            let parent_limit = self
                .levels
                .get(idx + 1)
                .map(|parent| match &parent.feed {
                    LevelFeed::Derived { child_cursor } => child_cursor.saturating_sub(1),
                    LevelFeed::Source(_) => 0,
                })
                .unwrap_or(usize::MAX);
            let level = &mut self.levels[idx];
            while let Some(front) = level.cache.front() {
                let reported = level.cache_start < level.recorded;
                if level.cache_start < parent_limit
                    && reported
                    && front.item.end_index() <= index
                {
                    level.cache.pop_front();
                    level.cache_start += 1;
                } else {
                    break;
                }
            }
        }
    }

    /// First item at `level` whose span starts at or after `index`,
    /// producing the stream as far as needed.
    pub fn item_at_or_after(&mut self, level: usize, index: usize) -> Option<RowItem> {
        self.ensure_level(level);
        let idx = level - self.base_level;
        loop {
            if let Some(cached) = self.levels[idx]
                .cache
                .iter()
                .find(|cached| cached.item.start_index() >= index)
            {
                return Some(cached.item.clone());
            }
            if self.levels[idx].exhausted {
                return None;
            }
            self.produce_one(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{SequenceDatabase, SequenceId, Strand};

    fn pyramid_over(ascii: &'static [u8]) -> Pyramid {
        let db = SequenceDatabase::from_named_ascii(&[("t", ascii)]).unwrap();
        let view = db.view(SequenceId(0), Strand::Forward).unwrap();
        Pyramid::new(view, 64)
    }

    fn collect_level(pyramid: &mut Pyramid, level: usize) -> Vec<RowItem> {
        let mut items = Vec::new();
        let mut from = 0;
        while let Some(item) = pyramid.item_at_or_after(level, from) {
            from = item.start_index() + 1;
            items.push(item);
        }
        items
    }

    #[test]
    fn level_one_covers_the_sequence() {
        let mut pyramid = pyramid_over(b"ACGTACGTACGTACGT");
        let items = collect_level(&mut pyramid, 1);
        // Every base is covered exactly once by consecutive items.
        let mut position = 0;
        for item in &items {
            assert_eq!(item.start_index(), position);
            position = item.end_index();
        }
        assert_eq!(position, 16);
        // At least one merge must have happened.
        assert!(pyramid.merge_count(1) > 0);
    }

    #[test]
    fn identical_content_produces_identical_boundaries() {
        // The same 64-mer embedded in different flanks at the same offset.
        // Away from the flanks (a boundary decision reaches at most 14 bases
        // through level 3) the two pyramids must produce identical blocks.
        const SHARED: &[u8] = b"ACGGTCACGATGGTTACGATCGGATCGATTACGGATCCATAGGCATACGTACGGTCAGGACTAC";
        let embed = |flank: &[u8]| {
            let mut seq = flank.to_vec();
            seq.extend_from_slice(SHARED);
            seq.extend_from_slice(flank);
            seq
        };
        let left_seq = embed(b"TTTTTT");
        let right_seq = embed(b"CACACA");
        let db = SequenceDatabase::from_named_ascii(&[
            ("l", left_seq.as_slice()),
            ("r", right_seq.as_slice()),
        ])
        .unwrap();
        let mut left = Pyramid::new(db.view(SequenceId(0), Strand::Forward).unwrap(), 64);
        let mut right = Pyramid::new(db.view(SequenceId(1), Strand::Forward).unwrap(), 64);

        // Shared content occupies 6..70; interior starts clear the flank
        // context on the left (14) and leave span + context room on the
        // right.
        let interior = 20..48;
        for level in 1..=3 {
            let pick = |pyramid: &mut Pyramid| -> Vec<(usize, usize, u64)> {
                collect_level(pyramid, level)
                    .into_iter()
                    .filter_map(|i| {
                        i.as_single()
                            .map(|b| (b.start_index(), b.length(), b.canonical_hash()))
                    })
                    .filter(|&(s, _, _)| interior.contains(&s))
                    .collect()
            };
            let a = pick(&mut left);
            let b = pick(&mut right);
            assert!(!a.is_empty(), "no interior blocks at level {}", level);
            assert_eq!(a, b, "interior blocks diverged at level {}", level);
        }
    }

    #[test]
    fn garbage_collection_bounds_the_cache() {
        let mut pyramid = pyramid_over(b"ACGTACGGTCAGGACTACGGATCGGATCGGTACGATCGGATCGATTACG");
        let mut from = 0;
        while let Some(item) = pyramid.item_at_or_after(2, from) {
            from = item.start_index() + 1;
            pyramid.advance_past(item.start_index());
            // The base level never retains the whole sequence behind the
            // frontier.
            // Production lookahead keeps a bounded window alive: three
            // level-2 items of up to four bases each, plus per-level merge
            // context, never the whole sequence.
            let level0 = &pyramid.levels[0];
            assert!(
                level0.cache.len() <= 32,
                "base cache grew to {}",
                level0.cache.len()
            );
        }
    }

    #[test]
    fn fresh_tracking_reports_each_creation_once() {
        let mut pyramid = pyramid_over(b"ACGTACGGTCAGGACTACGGATCG");
        pyramid.track_fresh();
        let mut seen = Vec::new();
        let mut from = 0;
        while let Some(item) = pyramid.item_at_or_after(3, from) {
            from = item.start_index() + 1;
            pyramid.for_each_unrecorded(|level, item| {
                if let RowItem::Single(block) = item {
                    seen.push((level, block.start_index(), block.length()));
                }
            });
        }
        pyramid.for_each_unrecorded(|level, item| {
            if let RowItem::Single(block) = item {
                seen.push((level, block.start_index(), block.length()));
            }
        });
        let mut dedup = seen.clone();
        dedup.sort_unstable();
        dedup.dedup();
        assert_eq!(dedup.len(), seen.len(), "an item was reported twice");
    }
}
