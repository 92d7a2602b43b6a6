//! Sequence identity, strand handling, and compact position packing.
//!
//! Every reference sequence gets a stable integer id and a global base
//! offset. A genome position is `(sequence, strand, offset)`; the codec packs
//! it into `(global_offset << 1) | strand` so the packed store can hold
//! positions in the fewest bytes that cover the whole database.

use std::sync::Arc;

use super::encoding::{complement_code, BaseCode};
use super::packed::{PackedBases, SequenceError};

/// Stable integer identity of a reference sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SequenceId(pub u32);

/// Which strand a position or view refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize))]
pub enum Strand {
    /// The strand as stored.
    Forward,
    /// The reverse complement.
    Reverse,
}

impl Strand {
    /// The opposite strand.
    pub fn flipped(self) -> Strand {
        match self {
            Strand::Forward => Strand::Reverse,
            Strand::Reverse => Strand::Forward,
        }
    }
}

/// One reference sequence.
#[derive(Debug)]
pub struct Sequence {
    /// Stable identity within the owning database.
    pub id: SequenceId,
    /// Display name (e.g. a contig name).
    pub name: Arc<str>,
    /// 4-bit packed basepairs, forward strand.
    pub bases: PackedBases,
}

impl Sequence {
    /// Sequence length in basepairs.
    pub fn len(&self) -> usize {
        self.bases.len()
    }

    /// Returns `true` when the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.bases.is_empty()
    }
}

/// A position on a specific strand of a specific sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StrandPosition {
    /// The sequence the position lives on.
    pub sequence: SequenceId,
    /// Offset from the 5' end of `strand`.
    pub offset: usize,
    /// Strand the offset is expressed on.
    pub strand: Strand,
}

impl StrandPosition {
    /// Reflect a span of `length` basepairs onto the opposite strand.
    pub fn reflected(&self, sequence_len: usize, length: usize) -> StrandPosition {
        StrandPosition {
            sequence: self.sequence,
            offset: sequence_len - self.offset - length,
            strand: self.strand.flipped(),
        }
    }
}

/// Read-only window onto one strand of a sequence.
///
/// All offsets are strand-local: offset 0 of a reverse view is the complement
/// of the last stored base.
#[derive(Debug, Clone)]
pub struct SequenceView {
    sequence: Arc<Sequence>,
    strand: Strand,
}

impl SequenceView {
    /// View the given strand of `sequence`.
    pub fn new(sequence: Arc<Sequence>, strand: Strand) -> Self {
        Self { sequence, strand }
    }

    /// Identity of the underlying sequence.
    pub fn id(&self) -> SequenceId {
        self.sequence.id
    }

    /// Strand this view reads.
    pub fn strand(&self) -> Strand {
        self.strand
    }

    /// Length in basepairs.
    pub fn len(&self) -> usize {
        self.sequence.len()
    }

    /// Returns `true` when the underlying sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    /// 4-bit code at strand-local `idx`.
    #[inline]
    pub fn code_at(&self, idx: usize) -> BaseCode {
        match self.strand {
            Strand::Forward => self.sequence.bases.code_at(idx),
            Strand::Reverse => {
                complement_code(self.sequence.bases.code_at(self.len() - 1 - idx))
            }
        }
    }

    /// Whether `start..end` (strand-local) contains an ambiguity code.
    pub fn has_ambiguity_in(&self, start: usize, end: usize) -> bool {
        match self.strand {
            Strand::Forward => self.sequence.bases.has_ambiguity_in(start, end),
            Strand::Reverse => {
                let len = self.len();
                let end = end.min(len);
                if start >= end {
                    return false;
                }
                self.sequence.bases.has_ambiguity_in(len - end, len - start)
            }
        }
    }

    /// Position of strand-local `offset` as a [`StrandPosition`].
    pub fn position_of(&self, offset: usize) -> StrandPosition {
        StrandPosition {
            sequence: self.id(),
            offset,
            strand: self.strand,
        }
    }
}

/// Owns all reference sequences and the position codec derived from them.
#[derive(Debug)]
pub struct SequenceDatabase {
    sequences: Vec<Arc<Sequence>>,
    base_offsets: Vec<u64>,
    total_bases: u64,
}

impl SequenceDatabase {
    /// Build a database from named ASCII sequences.
    pub fn from_named_ascii(
        entries: &[(&str, &[u8])],
    ) -> Result<Self, SequenceError> {
        let mut sequences = Vec::with_capacity(entries.len());
        let mut base_offsets = Vec::with_capacity(entries.len());
        let mut total = 0u64;

        for (idx, (name, ascii)) in entries.iter().enumerate() {
            if ascii.is_empty() {
                return Err(SequenceError::Empty);
            }
            let bases = PackedBases::from_ascii(ascii)?;
            base_offsets.push(total);
            total += bases.len() as u64;
            sequences.push(Arc::new(Sequence {
                id: SequenceId(idx as u32),
                name: Arc::from(*name),
                bases,
            }));
        }

        Ok(Self {
            sequences,
            base_offsets,
            total_bases: total,
        })
    }

    /// Number of sequences.
    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    /// Returns `true` when no sequences are loaded.
    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Total basepairs across all sequences.
    pub fn total_bases(&self) -> u64 {
        self.total_bases
    }

    /// Fetch a sequence by id.
    pub fn get(&self, id: SequenceId) -> Option<&Arc<Sequence>> {
        self.sequences.get(id.0 as usize)
    }

    /// Iterate all sequences in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Sequence>> {
        self.sequences.iter()
    }

    /// View of the requested strand of `id`.
    pub fn view(&self, id: SequenceId, strand: Strand) -> Option<SequenceView> {
        self.get(id)
            .map(|seq| SequenceView::new(Arc::clone(seq), strand))
    }

    /// The position codec covering this database.
    pub fn codec(&self) -> PositionCodec<'_> {
        PositionCodec { db: self }
    }
}

/// Packs `(sequence, strand, offset)` into a fixed-width integer and back.
#[derive(Debug, Clone, Copy)]
pub struct PositionCodec<'a> {
    db: &'a SequenceDatabase,
}

impl PositionCodec<'_> {
    /// Smallest byte width that can hold any encoded position.
    pub fn width_bytes(&self) -> usize {
        let max_value = self.db.total_bases.saturating_mul(2).max(1);
        let bits = 64 - max_value.leading_zeros() as usize;
        bits.div_ceil(8).max(1)
    }

    /// Encode a position.
    ///
    /// # Panics
    /// Panics if the sequence id is unknown - encoding foreign positions is a
    /// logic error.
    pub fn encode(&self, position: StrandPosition) -> u64 {
        let seq = self
            .db
            .get(position.sequence)
            .expect("position refers to an unknown sequence");
        assert!(
            position.offset < seq.len(),
            "offset {} out of bounds for sequence of {} bp",
            position.offset,
            seq.len()
        );
        // Encode reverse-strand offsets in forward coordinates so the value
        // stays within the global offset range.
        let forward_offset = match position.strand {
            Strand::Forward => position.offset,
            Strand::Reverse => seq.len() - 1 - position.offset,
        };
        let global = self.db.base_offsets[position.sequence.0 as usize] + forward_offset as u64;
        let strand_bit = match position.strand {
            Strand::Forward => 0,
            Strand::Reverse => 1,
        };
        (global << 1) | strand_bit
    }

    /// Decode a packed position.
    pub fn decode(&self, packed: u64) -> StrandPosition {
        let strand = if packed & 1 == 0 {
            Strand::Forward
        } else {
            Strand::Reverse
        };
        let global = packed >> 1;
        let idx = match self.db.base_offsets.binary_search(&global) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let seq = &self.db.sequences[idx];
        let forward_offset = (global - self.db.base_offsets[idx]) as usize;
        let offset = match strand {
            Strand::Forward => forward_offset,
            Strand::Reverse => seq.len() - 1 - forward_offset,
        };
        StrandPosition {
            sequence: seq.id,
            offset,
            strand,
        }
    }
}
