//! Row hierarchy: lazily streamed block levels over one strand.
//!
//! The base row yields one block per basepair; each parent row merges
//! adjacent children according to the content-defined rule; the pyramid
//! caches the level streams for random access and garbage-collects behind
//! the traversal frontier.

mod base;
mod compiler;
mod cursor;
mod parent;
mod pyramid;

pub use base::{BaseRow, RowSource};
pub use compiler::{
    compiled_rows_eligible, max_gapmer_reach, CompiledRows, CompilerCache, COMPILED_LEVEL,
};
pub use cursor::{Candidate, CandidateCursor, MatchCount, MatchOracle};
pub use parent::{produce_parent_item, ParentStep};
pub use pyramid::Pyramid;
