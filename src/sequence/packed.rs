//! 4-bit packed basepair storage.

use bitvec::vec::BitVec;
use thiserror::Error;

use super::encoding::{code_from_ascii, is_concrete, BaseCode};

/// Errors that can occur while building packed sequences.
#[derive(Debug, Error)]
pub enum SequenceError {
    /// Encountered a byte outside the IUPAC alphabet.
    #[error("unsupported nucleotide '{0}' at position {1}")]
    UnsupportedBase(char, usize),

    /// A sequence was empty where content is required.
    #[error("sequence must be non-empty")]
    Empty,
}

/// Basepairs packed two per byte, with a side bitmask marking ambiguous
/// positions so range checks don't have to decode nibbles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedBases {
    nibbles: Vec<u8>,
    len: usize,
    ambiguity: BitVec,
}

impl PackedBases {
    /// Pack an ASCII sequence.
    pub fn from_ascii(sequence: &[u8]) -> Result<Self, SequenceError> {
        let len = sequence.len();
        let mut nibbles = vec![0u8; len.div_ceil(2)];
        let mut ambiguity = BitVec::repeat(false, len);

        for (idx, &base) in sequence.iter().enumerate() {
            let code = code_from_ascii(base)
                .ok_or(SequenceError::UnsupportedBase(base as char, idx))?;
            nibbles[idx / 2] |= code << ((idx % 2) * 4);
            if !is_concrete(code) {
                ambiguity.set(idx, true);
            }
        }

        Ok(Self {
            nibbles,
            len,
            ambiguity,
        })
    }

    /// Number of basepairs.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` when the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 4-bit code at `idx`.
    ///
    /// # Panics
    /// Panics if `idx` is out of bounds.
    #[inline]
    pub fn code_at(&self, idx: usize) -> BaseCode {
        assert!(idx < self.len, "index {} out of bounds ({})", idx, self.len);
        (self.nibbles[idx / 2] >> ((idx % 2) * 4)) & 0b1111
    }

    /// Whether any position in `start..end` carries an ambiguity code.
    pub fn has_ambiguity_in(&self, start: usize, end: usize) -> bool {
        let end = end.min(self.len);
        if start >= end {
            return false;
        }
        self.ambiguity[start..end].any()
    }

    /// Total count of ambiguous positions.
    pub fn ambiguity_count(&self) -> usize {
        self.ambiguity.count_ones()
    }
}
