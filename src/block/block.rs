//! The atomic unit of the index: a content-hashed span of one sequence.

use crate::sequence::{is_concrete, BaseCode, SequenceView};

use super::hash::{fold_head, fold_tail, BlockHash, HashPair};
use super::merge::{Lean, MergeBits};

/// Smallest block length eligible for gap extension.
pub const MIN_GAPMER_CORE: usize = 4;

/// Side a gap extension hangs off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "visualize", derive(serde::Serialize))]
pub enum GapDirection {
    /// Extension precedes the core span.
    Left,
    /// Extension follows the core span.
    Right,
}

/// A variable-length span of a sequence with forward and reverse-complement
/// content hashes.
///
/// Blocks are created during one traversal step and immediately consumed or
/// packed; they are never persisted as objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    start_index: usize,
    length: usize,
    num_basepairs_used: usize,
    hashes: HashPair,
    merge_bits: MergeBits,
    gap_direction: Option<GapDirection>,
    extra_gapmer_length: usize,
}

impl Block {
    /// A length-1 block over a concrete base.
    ///
    /// # Panics
    /// Panics on an ambiguous code - ambiguous positions are represented as
    /// conditional hypotheses, never as single blocks.
    pub fn single(start_index: usize, code: BaseCode) -> Block {
        assert!(
            is_concrete(code),
            "single blocks require a concrete base, got code {:#06b}",
            code
        );
        let hashes = HashPair::single(code);
        Block {
            start_index,
            length: 1,
            num_basepairs_used: 1,
            merge_bits: MergeBits::from_lean(Lean::of(&hashes)),
            hashes,
            gap_direction: None,
            extra_gapmer_length: 0,
        }
    }

    /// Merge two adjacent blocks into their parent.
    ///
    /// # Panics
    /// Panics when the blocks are not adjacent or when either side has been
    /// gap-extended - both are logic errors in the row hierarchy.
    pub fn merge(left: &Block, right: &Block) -> Block {
        assert!(
            left.end_index() == right.start_index,
            "merge requires adjacent blocks ({}..{} then {}..{})",
            left.start_index,
            left.end_index(),
            right.start_index,
            right.end_index()
        );
        assert!(
            left.gap_direction.is_none() && right.gap_direction.is_none(),
            "gap-extended blocks cannot be merged"
        );
        let hashes = HashPair::merge(left.length, left.hashes, right.length, right.hashes);
        Block {
            start_index: left.start_index,
            length: left.length + right.length,
            num_basepairs_used: left.length + right.length,
            merge_bits: MergeBits::from_lean(Lean::of(&hashes)),
            hashes,
            gap_direction: None,
            extra_gapmer_length: 0,
        }
    }

    /// Start of the core span.
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// One past the end of the core span.
    pub fn end_index(&self) -> usize {
        self.start_index + self.length
    }

    /// Core span length; the length bin the block is stored under.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Basepairs folded into the hashes, counting any gap extension.
    pub fn num_basepairs_used(&self) -> usize {
        self.num_basepairs_used
    }

    /// The hash pair.
    pub fn hashes(&self) -> &HashPair {
        &self.hashes
    }

    /// Forward-strand hash.
    pub fn forward_hash(&self) -> BlockHash {
        self.hashes.forward
    }

    /// Reverse-complement hash.
    pub fn reverse_hash(&self) -> BlockHash {
        self.hashes.reverse
    }

    /// The strand-independent hash the block is stored under.
    pub fn canonical_hash(&self) -> BlockHash {
        self.hashes.canonical()
    }

    /// Whether the forward orientation is the stored one.
    pub fn primary_is_forward(&self) -> bool {
        self.hashes.primary_is_forward()
    }

    /// The recorded merge-direction bits.
    pub fn merge_bits(&self) -> MergeBits {
        self.merge_bits
    }

    /// This block's merge lean.
    pub fn lean(&self) -> Lean {
        self.merge_bits
            .self_lean()
            .unwrap_or_else(|| Lean::of(&self.hashes))
    }

    /// Record the next block's lean (set by the owning row while streaming).
    pub fn stamp_next_lean(&mut self, lean: Lean) {
        self.merge_bits = self.merge_bits.with_next(lean);
    }

    /// Gap-extension side, when extended.
    pub fn gap_direction(&self) -> Option<GapDirection> {
        self.gap_direction
    }

    /// Extension length in basepairs (0 when unextended).
    pub fn extra_gapmer_length(&self) -> usize {
        self.extra_gapmer_length
    }

    /// The whole footprint touched by this block, extension and gap included.
    pub fn footprint(&self) -> (usize, usize) {
        match self.gap_direction {
            None => (self.start_index, self.end_index()),
            Some(GapDirection::Right) => {
                let gap = self.length / 2;
                (
                    self.start_index,
                    self.end_index() + gap + self.extra_gapmer_length,
                )
            }
            Some(GapDirection::Left) => {
                let gap = self.length / 2;
                (
                    self.start_index - gap - self.extra_gapmer_length,
                    self.end_index(),
                )
            }
        }
    }

    /// Which side a gap extension of this block would hang off.
    ///
    /// Derived from the block's own merge lean and hash parity, never from
    /// position, so identical content extends identically everywhere. The
    /// derivation flips under strand reflection together with the lean, which
    /// keeps extended hash pairs transposes of each other.
    pub fn gapmer_direction(&self) -> GapDirection {
        let parity = self.canonical_hash().count_ones() % 2 == 0;
        let leans_right = self.lean() == Lean::Right;
        if leans_right ^ parity {
            GapDirection::Left
        } else {
            GapDirection::Right
        }
    }

    /// The same block translated by `delta` basepairs (used when replaying
    /// compiled rows at a new window offset).
    pub(crate) fn shifted(mut self, delta: isize) -> Block {
        self.start_index = (self.start_index as isize + delta) as usize;
        self
    }

    /// Attempt the non-contiguous gap extension: skip `length/2` positions
    /// past the core, then fold `ceil(length/2)` further bases into both
    /// hashes.
    ///
    /// Returns `None` when the extension would run off either end of the
    /// sequence or crosses an ambiguous base.
    pub fn gap_extended(&self, view: &SequenceView) -> Option<Block> {
        if self.length < MIN_GAPMER_CORE || self.gap_direction.is_some() {
            return None;
        }
        let gap = self.length / 2;
        let ext = self.length - gap;
        let direction = self.gapmer_direction();

        let ext_range = match direction {
            GapDirection::Right => {
                let ext_start = self.end_index().checked_add(gap)?;
                if ext_start + ext > view.len() {
                    return None;
                }
                ext_start..ext_start + ext
            }
            GapDirection::Left => {
                let ext_end = self.start_index.checked_sub(gap)?;
                let ext_start = ext_end.checked_sub(ext)?;
                ext_start..ext_end
            }
        };
        if view.has_ambiguity_in(ext_range.start, ext_range.end) {
            return None;
        }

        let mut forward = self.hashes.forward;
        let mut reverse = self.hashes.reverse;
        // Fold orders are forced by the transpose property: the reverse hash
        // must equal the forward hash the mirrored occurrence computes for
        // its own (opposite-side) extension.
        match direction {
            GapDirection::Right => {
                for idx in ext_range.clone() {
                    forward = fold_tail(forward, view.code_at(idx));
                }
                for idx in ext_range {
                    reverse = fold_head(reverse, crate::sequence::complement_code(view.code_at(idx)));
                }
            }
            GapDirection::Left => {
                for idx in ext_range.clone().rev() {
                    forward = fold_head(forward, view.code_at(idx));
                }
                for idx in ext_range.rev() {
                    reverse = fold_tail(reverse, crate::sequence::complement_code(view.code_at(idx)));
                }
            }
        }

        let hashes = HashPair { forward, reverse };
        Some(Block {
            start_index: self.start_index,
            length: self.length,
            num_basepairs_used: self.length + ext,
            merge_bits: self.merge_bits,
            hashes,
            gap_direction: Some(direction),
            extra_gapmer_length: ext,
        })
    }
}
