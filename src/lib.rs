//! # Content-Defined Hierarchical Hash Index
//!
//! This library turns raw reference genome sequences into a searchable
//! multi-resolution hash structure: for any query block it cheaply returns
//! the (possibly empty, possibly "too many to enumerate") set of reference
//! positions resembling it.
//!
//! ## Core pieces
//!
//! 1. **Blocks**: variable-length spans carrying a forward and a
//!    reverse-complement content hash; merging is a pure function of content,
//!    so identical substrings produce identical boundaries everywhere.
//! 2. **Rows and pyramid**: lazily streamed block levels, each built by
//!    merging adjacent blocks of the level below, cached for random access
//!    and garbage-collected behind the traversal frontier.
//! 3. **Packed stores**: bounded-capacity, bit-packed tables from block hash
//!    to genome positions, tolerant of skewed key distributions.
//! 4. **Index and views**: cooperative, incremental construction shared by
//!    any number of threads, with per-thread read snapshots answering
//!    queries from committed data only.
//!
//! ## Usage example
//!
//! ```ignore
//! use strata::{GenomeIndex, IndexConfig, SequenceDatabase};
//!
//! let db = Arc::new(SequenceDatabase::from_named_ascii(&[("chr1", reference)])?);
//! let index = GenomeIndex::new(db, IndexConfig::default())?;
//! let mut view = index.get_index_view();
//! match view.match_block(&block) {
//!     MatchLookup::Positions(hits) => ...,
//!     MatchLookup::Unknown => ..., // too common: treat as unindexed
//! }
//! ```

#![warn(missing_docs, missing_debug_implementations)]
#![allow(clippy::new_without_default)]

// Core modules - each implements a layer of the index
pub mod block;    // content-hashed spans and the merge rule
pub mod config;   // tuning parameters
pub mod index;    // writable index and read views
pub mod rows;     // row hierarchy, pyramid, candidate traversal
pub mod sequence; // 4-bit sequence model and position packing
pub mod store;    // bounded bit-packed position storage

// Re-exports for convenience
pub use block::{Block, Condition, GapDirection, HashPair, RowItem};
pub use config::{ConfigError, IndexConfig};
pub use index::{BothStrands, GenomeIndex, IndexView, MatchLookup};
pub use rows::{Candidate, CandidateCursor, MatchCount, MatchOracle, Pyramid};
pub use sequence::{SequenceDatabase, SequenceId, Strand, StrandPosition};
pub use store::{PackedPositionStore, PositionLookup};
