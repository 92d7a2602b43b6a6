//! The content-defined merge rule.
//!
//! Every block leans toward merging with its left or right neighbour, derived
//! purely from its own hash pair, so identical content leans identically no
//! matter where (or on which strand) it occurs. An adjacent pair merges when
//! the votes agree; disagreements are settled by the longer block, then by
//! the larger canonical hash. The winning boundary must additionally be a
//! strict local maximum of the strand-symmetric bind score among the
//! boundaries that want to merge - that keeps two overlapping candidate
//! merges from claiming the same block and makes the tree shape a pure
//! function of content.

use super::block::Block;
use super::hash::HashPair;

/// Which neighbour a block wants to merge with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lean {
    /// Prefers its left neighbour.
    Left,
    /// Prefers its right neighbour.
    Right,
}

impl Lean {
    /// Derive a lean from a hash pair.
    ///
    /// A forward-primary block leans right; a reverse-primary block leans
    /// left. Under strand reflection the pair transposes, so the lean flips
    /// exactly as the left/right axis does - boundaries mirror.
    pub fn of(pair: &HashPair) -> Lean {
        if pair.forward == pair.reverse {
            // Palindromic content reads the same on both strands; break the
            // tie on hash parity, which is also strand-independent.
            if pair.forward.count_ones() % 2 == 0 {
                Lean::Right
            } else {
                Lean::Left
            }
        } else if pair.forward > pair.reverse {
            Lean::Right
        } else {
            Lean::Left
        }
    }

    /// The mirrored lean.
    pub fn flipped(self) -> Lean {
        match self {
            Lean::Left => Lean::Right,
            Lean::Right => Lean::Left,
        }
    }
}

/// The four recorded merge-direction bits: this block's lean and the next
/// block's lean, each one-hot over left/right.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MergeBits(u8);

impl MergeBits {
    const SELF_LEFT: u8 = 0b0001;
    const SELF_RIGHT: u8 = 0b0010;
    const NEXT_LEFT: u8 = 0b0100;
    const NEXT_RIGHT: u8 = 0b1000;

    /// Bits with only the block's own lean recorded.
    pub fn from_lean(lean: Lean) -> MergeBits {
        match lean {
            Lean::Left => MergeBits(Self::SELF_LEFT),
            Lean::Right => MergeBits(Self::SELF_RIGHT),
        }
    }

    /// Record the next block's lean.
    pub fn with_next(self, lean: Lean) -> MergeBits {
        let cleared = self.0 & !(Self::NEXT_LEFT | Self::NEXT_RIGHT);
        MergeBits(match lean {
            Lean::Left => cleared | Self::NEXT_LEFT,
            Lean::Right => cleared | Self::NEXT_RIGHT,
        })
    }

    /// This block's recorded lean, if any.
    pub fn self_lean(self) -> Option<Lean> {
        if self.0 & Self::SELF_LEFT != 0 {
            Some(Lean::Left)
        } else if self.0 & Self::SELF_RIGHT != 0 {
            Some(Lean::Right)
        } else {
            None
        }
    }

    /// The next block's recorded lean, if known.
    pub fn next_lean(self) -> Option<Lean> {
        if self.0 & Self::NEXT_LEFT != 0 {
            Some(Lean::Left)
        } else if self.0 & Self::NEXT_RIGHT != 0 {
            Some(Lean::Right)
        } else {
            None
        }
    }

    /// Raw bits (low nibble).
    pub fn bits(self) -> u8 {
        self.0
    }
}

/// Do adjacent blocks `a` and `b` want to merge with each other?
pub fn wants_merge(a: &Block, b: &Block) -> bool {
    let a_votes_yes = a.lean() == Lean::Right;
    let b_votes_yes = b.lean() == Lean::Left;
    match (a_votes_yes, b_votes_yes) {
        (true, true) => true,
        (false, false) => false,
        _ => {
            // Disagreement: the longer block's vote wins; equal lengths fall
            // back to the larger canonical hash.
            if a.length() != b.length() {
                if a.length() > b.length() {
                    a_votes_yes
                } else {
                    b_votes_yes
                }
            } else if a.canonical_hash() != b.canonical_hash() {
                if a.canonical_hash() > b.canonical_hash() {
                    a_votes_yes
                } else {
                    b_votes_yes
                }
            } else {
                // Identical content on both sides (a homopolymer run): any
                // per-block tie-break would flip under strand reflection, so
                // decide from the shared hash itself.
                a.canonical_hash().count_ones() % 2 == 0
            }
        }
    }
}
