//! The writable index: one packed store per block length, built
//! incrementally and cooperatively by any number of threads.
//!
//! Construction is a two-phase pass over the reference. Any thread may claim
//! one sequence from the shared work queue and hash it bottom-up through its
//! pyramid to the current ceiling; when the queue and the active-hasher
//! count both drain, the same threads distribute per-length canonical
//! ordering among themselves; when that drains too, the watermark advances
//! to the ceiling. Queries only ever see watermark-committed data, so a
//! length is never partially exposed.

use std::collections::BTreeMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use tracing::{debug, info, trace};

use crate::block::{Block, RowItem};
use crate::config::{ConfigError, IndexConfig};
use crate::rows::{
    compiled_rows_eligible, CandidateCursor, CompiledRows, CompilerCache, Pyramid,
};
use crate::sequence::{SequenceDatabase, SequenceId, SequenceView, Strand, StrandPosition};
use crate::store::{bucket_count, estimate_unique_keys, PackedPositionStore};

use super::view::IndexView;

/// Extra levels past `log2(ceiling)`: merges of carried small blocks keep
/// producing store-relevant lengths for a few levels after the power-of-two
/// bound.
const TOWER_SLACK: usize = 4;

/// Fraction of blocks expected to contribute a gap-extended variant,
/// used when presizing a length bin.
const GAPMER_FRACTION: f64 = 0.8;

/// Entries buffered per length bin before flushing into the store.
const FLUSH_BATCH: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildPhase {
    Idle,
    Hashing,
    Ordering,
}

enum Work {
    Hash(SequenceId),
    Order(usize),
}

#[derive(Debug)]
struct IndexState {
    stores: BTreeMap<usize, Arc<PackedPositionStore>>,
    /// The watermark: every length at or below it is committed.
    committed_length: usize,
    ceiling: usize,
    /// Watermark when the running pass started; the pass records only
    /// lengths above it.
    pass_floor: usize,
    hash_queue: Vec<SequenceId>,
    active_hashers: usize,
    order_queue: Vec<usize>,
    active_orderers: usize,
    phase: BuildPhase,
    /// Bumped whenever the watermark advances, so views know to refresh.
    epoch: u64,
}

/// The writable, incrementally built hash index over a reference database.
#[derive(Debug)]
pub struct GenomeIndex {
    config: IndexConfig,
    db: Arc<SequenceDatabase>,
    compiler: Option<Arc<CompilerCache>>,
    state: Mutex<IndexState>,
    progress: Condvar,
}

impl GenomeIndex {
    /// Create an empty index over `db`. Nothing is hashed until a consumer
    /// requires a length (or helps explicitly).
    pub fn new(db: Arc<SequenceDatabase>, config: IndexConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        let compiler = compiled_rows_eligible(&config)
            .then(|| Arc::new(CompilerCache::new(1 << 20)));
        Ok(Arc::new(Self {
            config,
            db,
            compiler,
            state: Mutex::new(IndexState {
                stores: BTreeMap::new(),
                committed_length: 0,
                ceiling: 0,
                pass_floor: 0,
                hash_queue: Vec::new(),
                active_hashers: 0,
                order_queue: Vec::new(),
                active_orderers: 0,
                phase: BuildPhase::Idle,
                epoch: 0,
            }),
            progress: Condvar::new(),
        }))
    }

    /// The configuration this index was built with.
    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    /// The reference database this index reads.
    pub fn database(&self) -> &Arc<SequenceDatabase> {
        &self.db
    }

    /// Smallest block length worth querying.
    pub fn min_interesting_size(&self) -> usize {
        self.config.min_interesting_size
    }

    /// The committed-length watermark.
    pub fn committed_length(&self) -> usize {
        self.lock_state().committed_length
    }

    /// Obtain a read view for one consuming thread.
    pub fn get_index_view(self: &Arc<Self>) -> IndexView {
        IndexView::new(Arc::clone(self))
    }

    /// Traversal cursor over a query strand, steered by this index's tuning.
    pub fn candidate_cursor(&self, view: SequenceView) -> CandidateCursor {
        let pyramid = Pyramid::new(view, self.config.max_ambiguity_combinations);
        CandidateCursor::new(pyramid, self.config.recent_hash_window)
    }

    /// Whether an otherwise-idle thread could speed construction up right
    /// now. Non-blocking.
    pub fn get_can_use_help(&self) -> bool {
        let state = self.lock_state();
        match state.phase {
            BuildPhase::Idle => false,
            BuildPhase::Hashing => !state.hash_queue.is_empty(),
            BuildPhase::Ordering => !state.order_queue.is_empty(),
        }
    }

    /// Contribute one unit of construction work, if any is claimable.
    /// Returns `true` when work was done.
    pub fn help_set_up(&self) -> bool {
        let mut state = self.lock_state();
        let Some(work) = self.claim_work(&mut state) else {
            return false;
        };
        drop(state);
        self.run_work(work);
        true
    }

    /// Block until the watermark covers `length`, contributing hashing and
    /// ordering work whenever any is claimable instead of idling.
    pub fn require_set_up_through_size(&self, length: usize) {
        let mut state = self.lock_state();
        loop {
            if state.committed_length >= length {
                return;
            }
            if length > state.ceiling && state.phase == BuildPhase::Idle {
                self.start_pass(&mut state, length);
            }
            if let Some(work) = self.claim_work(&mut state) {
                drop(state);
                self.run_work(work);
                state = self.lock_state();
                continue;
            }
            // Someone else's work is in flight; the condition variable is
            // signalled on every phase transition and watermark advance.
            state = self
                .progress
                .wait(state)
                .expect("index state poisoned");
        }
    }

    /// Snapshot of the committed stores and watermark, for views.
    pub(super) fn snapshot(
        &self,
    ) -> (BTreeMap<usize, Arc<PackedPositionStore>>, usize, u64) {
        let state = self.lock_state();
        let committed = state.committed_length;
        let stores = state
            .stores
            .range(..=committed)
            .map(|(&len, store)| (len, Arc::clone(store)))
            .collect();
        (stores, committed, state.epoch)
    }

    /// Epoch of the last watermark advance.
    pub(super) fn epoch(&self) -> u64 {
        self.lock_state().epoch
    }

    /// Per-length advisory fingerprints of the committed stores.
    pub fn store_fingerprints(&self) -> Vec<(usize, blake3::Hash)> {
        let (stores, _, _) = self.snapshot();
        stores
            .into_iter()
            .map(|(length, store)| (length, store.fingerprint()))
            .collect()
    }

    /// Advisory fingerprint over every committed store, in length order.
    pub fn fingerprint(&self) -> blake3::Hash {
        let (stores, committed, _) = self.snapshot();
        let mut hasher = blake3::Hasher::new();
        hasher.update(&(committed as u64).to_le_bytes());
        for (length, store) in stores {
            hasher.update(&(length as u64).to_le_bytes());
            hasher.update(store.fingerprint().as_bytes());
        }
        hasher.finalize()
    }

    fn lock_state(&self) -> MutexGuard<'_, IndexState> {
        self.state.lock().expect("index state poisoned")
    }

    fn start_pass(&self, state: &mut IndexState, target_length: usize) {
        let mut ceiling = state
            .ceiling
            .max(self.config.initial_max_interesting_size);
        while ceiling < target_length {
            ceiling *= 2;
        }
        state.ceiling = ceiling;
        state.pass_floor = state.committed_length;
        state.hash_queue = self.db.iter().map(|seq| seq.id).collect();
        state.phase = BuildPhase::Hashing;
        debug!(
            ceiling,
            floor = state.pass_floor,
            sequences = state.hash_queue.len(),
            "index pass started"
        );
        self.progress.notify_all();
    }

    fn claim_work(&self, state: &mut IndexState) -> Option<Work> {
        match state.phase {
            BuildPhase::Idle => None,
            BuildPhase::Hashing => state.hash_queue.pop().map(|id| {
                state.active_hashers += 1;
                Work::Hash(id)
            }),
            BuildPhase::Ordering => state.order_queue.pop().map(|length| {
                state.active_orderers += 1;
                Work::Order(length)
            }),
        }
    }

    fn run_work(&self, work: Work) {
        match work {
            Work::Hash(id) => {
                let (ceiling, floor) = {
                    let state = self.lock_state();
                    (state.ceiling, state.pass_floor)
                };
                self.hash_sequence(id, ceiling, floor);
                let mut state = self.lock_state();
                state.active_hashers -= 1;
                self.maybe_transition(&mut state);
            }
            Work::Order(length) => {
                let store = {
                    let state = self.lock_state();
                    Arc::clone(&state.stores[&length])
                };
                store.order_deterministically();
                trace!(length, "length bin ordered");
                let mut state = self.lock_state();
                state.active_orderers -= 1;
                self.maybe_transition(&mut state);
            }
        }
    }

    fn maybe_transition(&self, state: &mut IndexState) {
        match state.phase {
            BuildPhase::Hashing
                if state.hash_queue.is_empty() && state.active_hashers == 0 =>
            {
                let floor = state.pass_floor;
                state.order_queue = state
                    .stores
                    .range(floor + 1..)
                    .map(|(&len, _)| len)
                    .collect();
                state.phase = BuildPhase::Ordering;
                debug!(bins = state.order_queue.len(), "ordering phase started");
                if state.order_queue.is_empty() && state.active_orderers == 0 {
                    self.complete_pass(state);
                }
                self.progress.notify_all();
            }
            BuildPhase::Ordering
                if state.order_queue.is_empty() && state.active_orderers == 0 =>
            {
                self.complete_pass(state);
                self.progress.notify_all();
            }
            _ => {}
        }
    }

    fn complete_pass(&self, state: &mut IndexState) {
        state.committed_length = state.ceiling;
        state.phase = BuildPhase::Idle;
        state.epoch += 1;
        info!(watermark = state.committed_length, "index pass committed");
    }

    fn store_for_length(&self, length: usize) -> Arc<PackedPositionStore> {
        let mut state = self.lock_state();
        if let Some(store) = state.stores.get(&length) {
            return Arc::clone(store);
        }
        let expected_positions = self.db.total_bases() / length.max(1) as u64;
        let unique = estimate_unique_keys(expected_positions, length, GAPMER_FRACTION);
        let buckets = bucket_count(unique);
        let store = Arc::new(
            PackedPositionStore::new(
                length,
                buckets,
                self.config.max_matches_per_key,
                self.db.codec().width_bytes(),
                self.config.pending_queue_depth,
            )
            .expect("per-key capacity exceeds every counter width - tuning bug"),
        );
        debug!(length, buckets, "length bin created");
        state.stores.insert(length, Arc::clone(&store));
        store
    }

    /// Polarity-normalized encoded position for a block found on the forward
    /// strand: blocks are stored on whichever strand reads their canonical
    /// orientation.
    fn encoded_position(&self, id: SequenceId, block: &Block) -> u64 {
        let seq_len = self
            .db
            .get(id)
            .expect("hashing an unknown sequence")
            .len();
        let position = StrandPosition {
            sequence: id,
            offset: block.start_index(),
            strand: Strand::Forward,
        };
        let normalized = if block.primary_is_forward() {
            position
        } else {
            position.reflected(seq_len, block.length())
        };
        self.db.codec().encode(normalized)
    }

    fn hash_sequence(&self, id: SequenceId, ceiling: usize, floor: usize) {
        let view = self
            .db
            .view(id, Strand::Forward)
            .expect("hashing an unknown sequence");
        let mut pyramid = match &self.compiler {
            Some(cache) => {
                let rows = CompiledRows::new(
                    view.clone(),
                    Arc::clone(cache),
                    self.config.max_ambiguity_combinations,
                );
                Pyramid::with_source(view.clone(), Box::new(rows), self.config.max_ambiguity_combinations)
            }
            None => Pyramid::new(view.clone(), self.config.max_ambiguity_combinations),
        };
        pyramid.track_fresh();

        // Absolute tower height: the same for compiled and generic bases, so
        // both produce the same level rows.
        let top = (ceiling.max(2).ilog2() as usize + TOWER_SLACK)
            .max(pyramid.base_level() + 1);

        let min_len = self.config.min_interesting_size;
        let mut buffers: BTreeMap<usize, Vec<(u64, u64)>> = BTreeMap::new();
        let mut record = |pyramid: &mut Pyramid, buffers: &mut BTreeMap<usize, Vec<(u64, u64)>>| {
            let mut batch: Vec<Block> = Vec::new();
            pyramid.for_each_unrecorded(|_, item| {
                if let RowItem::Single(block) = item {
                    batch.push(*block);
                }
            });
            for block in batch {
                let length = block.length();
                if length < min_len || length <= floor || length > ceiling {
                    continue;
                }
                let encoded = self.encoded_position(id, &block);
                buffers
                    .entry(length)
                    .or_default()
                    .push((block.canonical_hash(), encoded));
                if let Some(extended) = block.gap_extended(&view) {
                    buffers
                        .entry(length)
                        .or_default()
                        .push((extended.canonical_hash(), self.encoded_position(id, &extended)));
                }
            }
            for (&length, buffer) in buffers.iter_mut() {
                if buffer.len() >= FLUSH_BATCH {
                    self.store_for_length(length)
                        .add(buffer.drain(..), true)
                        .expect("store capacity tuning bug");
                }
            }
        };

        let mut from = 0;
        while let Some(item) = pyramid.item_at_or_after(top, from) {
            from = item.start_index() + 1;
            record(&mut pyramid, &mut buffers);
            pyramid.advance_past(item.start_index());
        }
        record(&mut pyramid, &mut buffers);

        for (length, buffer) in buffers {
            if !buffer.is_empty() {
                self.store_for_length(length)
                    .add(buffer, true)
                    .expect("store capacity tuning bug");
            }
        }
        trace!(sequence = id.0, "sequence hashed");
    }
}
