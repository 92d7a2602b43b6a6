//! Conditional hypotheses over ambiguous positions.
//!
//! A position whose base is ambiguous cannot produce one concrete block;
//! instead the rows carry a set of hypotheses, each a concrete block (or an
//! absence marker) guarded by a conjunction of "position p equals base b"
//! constraints.

use crate::sequence::BaseCode;

use super::block::Block;

/// Conjunction of `(position, concrete base)` constraints, sorted by
/// position.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Condition {
    constraints: Vec<(usize, BaseCode)>,
}

impl Condition {
    /// The empty (always-true) condition.
    pub fn always() -> Condition {
        Condition::default()
    }

    /// A single-position constraint.
    pub fn assigns(position: usize, code: BaseCode) -> Condition {
        Condition {
            constraints: vec![(position, code)],
        }
    }

    /// Number of constrained positions.
    pub fn len(&self) -> usize {
        self.constraints.len()
    }

    /// Returns `true` for the always-true condition.
    pub fn is_empty(&self) -> bool {
        self.constraints.is_empty()
    }

    /// The constrained positions in order.
    pub fn constraints(&self) -> &[(usize, BaseCode)] {
        &self.constraints
    }

    /// Intersect two conditions.
    ///
    /// Returns `None` when they assign different bases to the same position
    /// (mutually exclusive hypotheses), otherwise the merged conjunction.
    pub fn intersect(&self, other: &Condition) -> Option<Condition> {
        let mut merged = Vec::with_capacity(self.constraints.len() + other.constraints.len());
        let (mut i, mut j) = (0, 0);
        while i < self.constraints.len() && j < other.constraints.len() {
            let (pa, ca) = self.constraints[i];
            let (pb, cb) = other.constraints[j];
            if pa < pb {
                merged.push((pa, ca));
                i += 1;
            } else if pb < pa {
                merged.push((pb, cb));
                j += 1;
            } else if ca == cb {
                merged.push((pa, ca));
                i += 1;
                j += 1;
            } else {
                return None;
            }
        }
        merged.extend_from_slice(&self.constraints[i..]);
        merged.extend_from_slice(&other.constraints[j..]);
        Some(Condition {
            constraints: merged,
        })
    }
}

/// One hypothesis at an ambiguous site: a concrete block, or its absence at
/// this level, guarded by a condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hypothesis {
    /// The block this hypothesis yields, or `None` when the region is
    /// unavailable at this level under this condition.
    pub block: Option<Block>,
    /// The guarding condition.
    pub condition: Condition,
}

/// What a row yields at one cursor step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowItem {
    /// An unconditional concrete block.
    Single(Block),
    /// A set of conditional hypotheses covering an ambiguous region.
    Ambiguous(Vec<Hypothesis>),
}

impl RowItem {
    /// Start of the span this item covers.
    pub fn start_index(&self) -> usize {
        match self {
            RowItem::Single(block) => block.start_index(),
            RowItem::Ambiguous(hypotheses) => hypotheses
                .iter()
                .filter_map(|h| h.block.as_ref())
                .map(Block::start_index)
                .min()
                .unwrap_or_else(|| {
                    hypotheses
                        .iter()
                        .flat_map(|h| h.condition.constraints().first())
                        .map(|&(p, _)| p)
                        .min()
                        .unwrap_or(0)
                }),
        }
    }

    /// One past the furthest core position this item covers.
    pub fn end_index(&self) -> usize {
        match self {
            RowItem::Single(block) => block.end_index(),
            RowItem::Ambiguous(hypotheses) => hypotheses
                .iter()
                .filter_map(|h| h.block.as_ref())
                .map(Block::end_index)
                .max()
                .unwrap_or_else(|| self.start_index() + 1),
        }
    }

    /// The concrete block, when unconditional.
    pub fn as_single(&self) -> Option<&Block> {
        match self {
            RowItem::Single(block) => Some(block),
            RowItem::Ambiguous(_) => None,
        }
    }
}
