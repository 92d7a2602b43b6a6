//! Reference sequence model consumed by the index.
//!
//! Basepairs are stored 4-bit encoded (one bit per canonical base) so that
//! IUPAC ambiguity codes are representable as bit unions and complementation
//! is a nibble reversal. The index itself never mutates sequences; it only
//! reads codes and packs `(sequence, strand, offset)` triples into fixed-width
//! integers via the [`PositionCodec`].

mod database;
mod encoding;
mod packed;

pub use database::{
    PositionCodec, Sequence, SequenceDatabase, SequenceId, SequenceView, Strand, StrandPosition,
};
pub use encoding::{
    code_from_ascii, code_to_ascii, complement_code, is_concrete, possibilities, BaseCode,
    CODE_A, CODE_C, CODE_G, CODE_N, CODE_T,
};
pub use packed::{PackedBases, SequenceError};
