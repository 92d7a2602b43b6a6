//! The packed position store: a bounded-capacity table from block hash to an
//! unordered set of encoded genome positions.
//!
//! Layout: one counter per bucket in the narrowest integer that can hold
//! `capacity + 1` (the extra value is the sticky overflow marker), and one
//! slot handle per bucket pointing into an arena of fixed-width records.
//! Records are grouped into capacity tiers that grow geometrically, so a
//! skewed key distribution pays for large slots only where it needs them.
//!
//! Insertion funnels through a pending queue drained by one active thread at
//! a time; producers normally just enqueue and return, but a producer that
//! finds the queue deeper than the configured bound drains everything itself
//! before returning, which caps unflushed memory.

use std::sync::{Mutex, RwLock};

use thiserror::Error;
use tracing::trace;

/// Errors raised while configuring a store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No supported counter width can hold `capacity + 1`.
    #[error("per-key capacity {0} does not fit any supported counter width")]
    CounterTooNarrow(usize),

    /// A tier record index outgrew its handle encoding.
    #[error("store for length {length} exceeded {records} records in one tier")]
    TierOverflow {
        /// Block length bin of the store.
        length: usize,
        /// Record limit per tier.
        records: usize,
    },
}

/// Result of a key lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionLookup {
    /// The key holds more positions than the store (or the caller) accepts.
    /// Monotone: once reported for a key it is reported forever.
    Overflowed,
    /// Every position stored under the key; empty when the key is unused.
    Positions(Vec<u64>),
}

/// Result of a count-only lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountLookup {
    /// Exact number of stored positions.
    Exact(usize),
    /// The key overflowed its capacity.
    Overflowed,
}

/// Per-bucket counters at the narrowest width holding `capacity + 1`.
#[derive(Debug)]
enum Counters {
    U8(Vec<u8>),
    U16(Vec<u16>),
    U32(Vec<u32>),
}

impl Counters {
    fn for_capacity(capacity: usize, buckets: usize) -> Result<Counters, StoreError> {
        // An 8-bit counter covers capacities up to 126; wider keys get wider
        // counters. The +1 leaves room for the overflow marker.
        if capacity <= 126 {
            Ok(Counters::U8(vec![0; buckets]))
        } else if capacity < u16::MAX as usize - 1 {
            Ok(Counters::U16(vec![0; buckets]))
        } else if capacity < u32::MAX as usize - 1 {
            Ok(Counters::U32(vec![0; buckets]))
        } else {
            Err(StoreError::CounterTooNarrow(capacity))
        }
    }

    #[inline]
    fn get(&self, bucket: usize) -> usize {
        match self {
            Counters::U8(v) => v[bucket] as usize,
            Counters::U16(v) => v[bucket] as usize,
            Counters::U32(v) => v[bucket] as usize,
        }
    }

    #[inline]
    fn set(&mut self, bucket: usize, value: usize) {
        match self {
            Counters::U8(v) => v[bucket] = value as u8,
            Counters::U16(v) => v[bucket] = value as u16,
            Counters::U32(v) => v[bucket] = value as u32,
        }
    }

    fn raw_bytes(&self, out: &mut Vec<u8>) {
        match self {
            Counters::U8(v) => out.extend_from_slice(v),
            Counters::U16(v) => v.iter().for_each(|c| out.extend_from_slice(&c.to_le_bytes())),
            Counters::U32(v) => v.iter().for_each(|c| out.extend_from_slice(&c.to_le_bytes())),
        }
    }
}

const NO_SLOT: u32 = u32::MAX;
const TIER_BITS: u32 = 6;
const RECORD_BITS: u32 = 32 - TIER_BITS;
const MAX_RECORDS: usize = (1 << RECORD_BITS) - 1;

#[inline]
fn handle(tier: usize, record: usize) -> u32 {
    ((tier as u32) << RECORD_BITS) | record as u32
}

#[inline]
fn split_handle(h: u32) -> (usize, usize) {
    ((h >> RECORD_BITS) as usize, (h & ((1 << RECORD_BITS) - 1)) as usize)
}

/// One capacity tier: an arena of `capacity * position_width`-byte records.
#[derive(Debug)]
struct Tier {
    capacity: usize,
    arena: Vec<u8>,
    records: usize,
    free: Vec<u32>,
}

impl Tier {
    fn new(capacity: usize) -> Tier {
        Tier {
            capacity,
            arena: Vec::new(),
            records: 0,
            free: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct StoreData {
    counters: Counters,
    slots: Vec<u32>,
    tiers: Vec<Tier>,
    position_width: usize,
}

impl StoreData {
    fn record_bounds(&self, tier: usize, record: usize) -> (usize, usize) {
        let size = self.tiers[tier].capacity * self.position_width;
        let start = record * size;
        let end = start + size;
        assert!(
            end <= self.tiers[tier].arena.len(),
            "record {} out of bounds in tier {}",
            record,
            tier
        );
        (start, end)
    }

    fn read_position(&self, tier: usize, record: usize, index: usize) -> u64 {
        let (start, _) = self.record_bounds(tier, record);
        let offset = start + index * self.position_width;
        let mut value = 0u64;
        for (i, &byte) in self.tiers[tier].arena[offset..offset + self.position_width]
            .iter()
            .enumerate()
        {
            value |= (byte as u64) << (8 * i);
        }
        value
    }

    fn write_position(&mut self, tier: usize, record: usize, index: usize, value: u64) {
        let (start, _) = self.record_bounds(tier, record);
        let offset = start + index * self.position_width;
        let width = self.position_width;
        assert!(
            width == 8 || value < 1u64 << (8 * width),
            "position {:#x} does not fit in {} bytes",
            value,
            width
        );
        for i in 0..width {
            self.tiers[tier].arena[offset + i] = (value >> (8 * i)) as u8;
        }
    }

    fn allocate(&mut self, tier: usize, length: usize) -> Result<usize, StoreError> {
        if let Some(record) = self.tiers[tier].free.pop() {
            return Ok(record as usize);
        }
        let record = self.tiers[tier].records;
        if record >= MAX_RECORDS {
            return Err(StoreError::TierOverflow {
                length,
                records: MAX_RECORDS,
            });
        }
        let size = self.tiers[tier].capacity * self.position_width;
        self.tiers[tier].arena.resize((record + 1) * size, 0);
        self.tiers[tier].records += 1;
        Ok(record)
    }

    fn release(&mut self, tier: usize, record: usize) {
        self.tiers[tier].free.push(record as u32);
    }
}

/// Queue of not-yet-applied insertions.
#[derive(Debug, Default)]
struct Pending {
    entries: Vec<PendingEntry>,
    draining: bool,
}

#[derive(Debug)]
struct PendingEntry {
    hash: u64,
    position: u64,
    prevent_duplicates: bool,
}

/// Bounded-capacity, bit-packed table from block hash to positions, for one
/// block length bin.
#[derive(Debug)]
pub struct PackedPositionStore {
    length: usize,
    bucket_mask: u64,
    max_per_key: usize,
    pending_depth: usize,
    data: RwLock<StoreData>,
    pending: Mutex<Pending>,
}

impl PackedPositionStore {
    /// Create a store for `length`-bp blocks with `num_buckets` buckets
    /// (rounded up to a power of two) holding at most `max_per_key`
    /// positions per key.
    pub fn new(
        length: usize,
        num_buckets: usize,
        max_per_key: usize,
        position_width: usize,
        pending_depth: usize,
    ) -> Result<Self, StoreError> {
        let num_buckets = num_buckets.max(2).next_power_of_two();
        let counters = Counters::for_capacity(max_per_key, num_buckets)?;

        // Capacity tiers grow by about 10% so reallocation cost amortizes
        // across a skewed key distribution.
        let mut tiers = Vec::new();
        let mut cap = 1usize;
        while cap < max_per_key {
            tiers.push(Tier::new(cap));
            cap = (cap + 1).max(cap * 11 / 10);
        }
        tiers.push(Tier::new(max_per_key));

        Ok(Self {
            length,
            bucket_mask: num_buckets as u64 - 1,
            max_per_key,
            pending_depth,
            data: RwLock::new(StoreData {
                counters,
                slots: vec![NO_SLOT; num_buckets],
                tiers,
                position_width,
            }),
            pending: Mutex::new(Pending::default()),
        })
    }

    /// Block length bin this store serves.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Per-key capacity.
    pub fn max_per_key(&self) -> usize {
        self.max_per_key
    }

    /// Queue `(hash, encoded position)` pairs for insertion.
    ///
    /// One thread drains at a time; others enqueue and return unless the
    /// queue has grown past the configured depth, in which case the caller
    /// drains everything itself. With `prevent_duplicates` an insertion
    /// first scans the key's existing positions (linear in the current
    /// count) - needed because an ambiguous block can emit the same genomic
    /// interval under two different hypotheses.
    pub fn add(
        &self,
        entries: impl IntoIterator<Item = (u64, u64)>,
        prevent_duplicates: bool,
    ) -> Result<(), StoreError> {
        let mut queue = self.pending.lock().expect("pending queue poisoned");
        queue
            .entries
            .extend(entries.into_iter().map(|(hash, position)| PendingEntry {
                hash,
                position,
                prevent_duplicates,
            }));
        if queue.draining && queue.entries.len() <= self.pending_depth {
            return Ok(());
        }
        queue.draining = true;

        loop {
            let batch = std::mem::take(&mut queue.entries);
            drop(queue);
            if !batch.is_empty() {
                let mut data = self.data.write().expect("store data poisoned");
                for entry in &batch {
                    self.apply(&mut data, entry)?;
                }
            }
            queue = self.pending.lock().expect("pending queue poisoned");
            if queue.entries.is_empty() {
                queue.draining = false;
                return Ok(());
            }
        }
    }

    fn apply(&self, data: &mut StoreData, entry: &PendingEntry) -> Result<(), StoreError> {
        let bucket = (entry.hash & self.bucket_mask) as usize;
        let count = data.counters.get(bucket);

        if count > self.max_per_key {
            return Ok(()); // sticky overflow
        }

        // A duplicate never counts against capacity, so the scan runs before
        // the overflow check.
        if entry.prevent_duplicates && count > 0 {
            let (tier, record) = split_handle(data.slots[bucket]);
            for index in 0..count {
                if data.read_position(tier, record, index) == entry.position {
                    return Ok(());
                }
            }
        }

        if count == self.max_per_key {
            // This insertion tips the key over capacity: drop the record and
            // mark the counter with the overflow sentinel for good.
            let (tier, record) = split_handle(data.slots[bucket]);
            data.release(tier, record);
            data.slots[bucket] = NO_SLOT;
            data.counters.set(bucket, self.max_per_key + 1);
            trace!(length = self.length, bucket, "key overflowed");
            return Ok(());
        }

        if count == 0 {
            let record = data.allocate(0, self.length)?;
            data.write_position(0, record, 0, entry.position);
            data.slots[bucket] = handle(0, record);
            data.counters.set(bucket, 1);
            return Ok(());
        }

        let (tier, record) = split_handle(data.slots[bucket]);

        if count + 1 > data.tiers[tier].capacity {
            // Promote the record into the next tier.
            let next = tier + 1;
            debug_assert!(next < data.tiers.len(), "tier ladder too short");
            let new_record = data.allocate(next, self.length)?;
            for index in 0..count {
                let value = data.read_position(tier, record, index);
                data.write_position(next, new_record, index, value);
            }
            data.release(tier, record);
            data.write_position(next, new_record, count, entry.position);
            data.slots[bucket] = handle(next, new_record);
        } else {
            data.write_position(tier, record, count, entry.position);
        }
        data.counters.set(bucket, count + 1);
        Ok(())
    }

    /// Look up every position under `hash`.
    ///
    /// Returns [`PositionLookup::Overflowed`] when the key exceeded either
    /// the store's capacity or the caller's `max_interesting_count`.
    pub fn get(&self, hash: u64, max_interesting_count: usize) -> PositionLookup {
        let data = self.data.read().expect("store data poisoned");
        let bucket = (hash & self.bucket_mask) as usize;
        let count = data.counters.get(bucket);
        if count > self.max_per_key || count > max_interesting_count {
            return PositionLookup::Overflowed;
        }
        if count == 0 {
            return PositionLookup::Positions(Vec::new());
        }
        let (tier, record) = split_handle(data.slots[bucket]);
        let positions = (0..count)
            .map(|index| data.read_position(tier, record, index))
            .collect();
        PositionLookup::Positions(positions)
    }

    /// Count-only variant of [`PackedPositionStore::get`].
    pub fn count(&self, hash: u64) -> CountLookup {
        let data = self.data.read().expect("store data poisoned");
        let bucket = (hash & self.bucket_mask) as usize;
        let count = data.counters.get(bucket);
        if count > self.max_per_key {
            CountLookup::Overflowed
        } else {
            CountLookup::Exact(count)
        }
    }

    /// Re-sort every key's positions into canonical order so stores built
    /// under different thread interleavings become byte-identical.
    pub fn order_deterministically(&self) {
        let mut data = self.data.write().expect("store data poisoned");
        for bucket in 0..data.slots.len() {
            let count = data.counters.get(bucket);
            if count < 2 || count > self.max_per_key {
                continue;
            }
            let (tier, record) = split_handle(data.slots[bucket]);
            let mut positions: Vec<u64> = (0..count)
                .map(|index| data.read_position(tier, record, index))
                .collect();
            positions.sort_unstable();
            for (index, value) in positions.into_iter().enumerate() {
                data.write_position(tier, record, index, value);
            }
        }
    }

    /// Advisory fingerprint of the logical contents (counters plus each
    /// key's positions in stored order). Stable across runs only after
    /// [`PackedPositionStore::order_deterministically`].
    pub fn fingerprint(&self) -> blake3::Hash {
        let data = self.data.read().expect("store data poisoned");
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&(self.length as u64).to_le_bytes());
        data.counters.raw_bytes(&mut bytes);
        for bucket in 0..data.slots.len() {
            let count = data.counters.get(bucket);
            if count == 0 || count > self.max_per_key {
                continue;
            }
            let (tier, record) = split_handle(data.slots[bucket]);
            for index in 0..count {
                bytes.extend_from_slice(&data.read_position(tier, record, index).to_le_bytes());
            }
        }
        blake3::hash(&bytes)
    }
}
