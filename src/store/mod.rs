//! Bounded-capacity packed storage of block positions.

mod estimate;
mod packed;

pub use estimate::{bucket_count, estimate_unique_keys};
pub use packed::{CountLookup, PackedPositionStore, PositionLookup, StoreError};
