//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use strata::rows::Pyramid;
use strata::sequence::{SequenceDatabase, SequenceId, SequenceView, Strand};
use strata::{Block, IndexConfig, RowItem};

/// Route index tracing through the test harness when `RUST_LOG` asks for it.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn database(reference: &[u8]) -> Arc<SequenceDatabase> {
    Arc::new(
        SequenceDatabase::from_named_ascii(&[("chr1", reference)])
            .expect("reference packs cleanly"),
    )
}

/// The level the construction pass drives to for a given ceiling; mirrors
/// the index's own tower height.
pub fn tower_top(ceiling: usize) -> usize {
    ceiling.max(2).ilog2() as usize + 4
}

/// Replay the construction traversal over one strand and collect every
/// freshly created concrete block, keyed by `(length, canonical hash)`.
pub fn fresh_blocks_by_key(
    view: &SequenceView,
    config: &IndexConfig,
    ceiling: usize,
) -> BTreeMap<(usize, u64), Vec<Block>> {
    let mut pyramid = Pyramid::new(view.clone(), config.max_ambiguity_combinations);
    pyramid.track_fresh();
    let top = tower_top(ceiling);

    let mut groups: BTreeMap<(usize, u64), Vec<Block>> = BTreeMap::new();
    let mut record = |pyramid: &mut Pyramid| {
        let mut batch = Vec::new();
        pyramid.for_each_unrecorded(|_, item| {
            if let RowItem::Single(block) = item {
                batch.push(*block);
            }
        });
        for block in batch {
            if block.length() >= config.min_interesting_size && block.length() <= ceiling {
                groups
                    .entry((block.length(), block.canonical_hash()))
                    .or_default()
                    .push(block);
            }
        }
    };

    let mut from = 0;
    while let Some(item) = pyramid.item_at_or_after(top, from) {
        from = item.start_index() + 1;
        record(&mut pyramid);
        pyramid.advance_past(item.start_index());
    }
    record(&mut pyramid);
    groups
}

pub fn forward_view(db: &Arc<SequenceDatabase>) -> SequenceView {
    db.view(SequenceId(0), Strand::Forward).expect("chr1 exists")
}

pub fn reverse_view(db: &Arc<SequenceDatabase>) -> SequenceView {
    db.view(SequenceId(0), Strand::Reverse).expect("chr1 exists")
}
