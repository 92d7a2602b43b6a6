//! The writable index and its per-thread read views.

mod view;
mod writer;

pub use view::{BothStrands, IndexView, MatchLookup};
pub use writer::GenomeIndex;
