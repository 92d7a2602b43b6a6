//! One production step of a parent row.
//!
//! A parent row walks its child row boundary by boundary: a boundary that
//! wants to merge, and strictly out-scores its wanting neighbours, produces
//! a merged item consuming two children; every other child is carried up
//! unchanged. The same rule covers ambiguous items - their merge desire is
//! "any compatible hypothesis pair wants it" and their score comes from an
//! order-independent summary of their hypothesis hashes - so the row
//! structure mirrors exactly under strand reflection even around ambiguity.
//! A boundary whose pairwise condition intersections would exceed the
//! combination cap refuses to merge at all (a strand-stable refusal), so a
//! run of ambiguity degrades to "unavailable at this level" instead of
//! exploding.

use crate::block::{
    bind_score, wants_merge, Block, Condition, HashPair, Hypothesis, RowItem,
};

/// Result of one parent production step.
#[derive(Debug)]
pub struct ParentStep {
    /// The produced item.
    pub item: RowItem,
    /// How many child items the step consumed (1 = carried, 2 = merged).
    pub children_consumed: usize,
    /// Whether the item was created here (merged) rather than carried up.
    pub fresh: bool,
}

/// Strand-stable summary of an item for boundary scoring: a pseudo hash
/// pair whose canonical value is order-independent over the hypotheses.
fn summary(item: &RowItem) -> (HashPair, usize) {
    match item {
        RowItem::Single(block) => (*block.hashes(), block.length()),
        RowItem::Ambiguous(hypotheses) => {
            let mut sum = 0u64;
            for hypothesis in hypotheses {
                if let Some(block) = &hypothesis.block {
                    sum = sum.wrapping_add(block.canonical_hash());
                }
            }
            let span = item.end_index().saturating_sub(item.start_index());
            (
                HashPair {
                    forward: sum,
                    reverse: sum,
                },
                span,
            )
        }
    }
}

/// Does the boundary between these items want to merge: some
/// (condition-compatible, adjacent) hypothesis pair votes yes, and the
/// total combination count stays under the cap. Counting instead of
/// truncating keeps the decision independent of hypothesis order, which
/// strand reflection reverses.
fn items_want_merge(a: &RowItem, b: &RowItem, max_combos: usize) -> bool {
    match (a, b) {
        (RowItem::Single(a_block), RowItem::Single(b_block)) => wants_merge(a_block, b_block),
        _ => {
            if count_compatible(a, b) > max_combos {
                return false;
            }
            each_pair(a, b, |left, right, _| {
                left.end_index() == right.start_index() && wants_merge(left, right)
            })
        }
    }
}

/// Number of condition-compatible hypothesis pairs across a boundary.
fn count_compatible(a: &RowItem, b: &RowItem) -> usize {
    let mut count = 0;
    for ha in hypotheses_of(a).iter() {
        for hb in hypotheses_of(b).iter() {
            if ha.condition.intersect(&hb.condition).is_some() {
                count += 1;
            }
        }
    }
    count
}

/// Apply `f` to every condition-compatible hypothesis pair with both blocks
/// present; returns whether any application returned `true`.
fn each_pair(
    a: &RowItem,
    b: &RowItem,
    mut f: impl FnMut(&Block, &Block, &Condition) -> bool,
) -> bool {
    let mut any = false;
    for ha in hypotheses_of(a).iter() {
        for hb in hypotheses_of(b).iter() {
            let (Some(left), Some(right)) = (&ha.block, &hb.block) else {
                continue;
            };
            if let Some(condition) = ha.condition.intersect(&hb.condition) {
                any |= f(left, right, &condition);
            }
        }
    }
    any
}

fn hypotheses_of(item: &RowItem) -> Vec<Hypothesis> {
    match item {
        RowItem::Single(block) => vec![Hypothesis {
            block: Some(*block),
            condition: Condition::always(),
        }],
        RowItem::Ambiguous(hypotheses) => hypotheses.clone(),
    }
}

/// Score of the boundary between two items.
fn boundary_score_items(a: &RowItem, b: &RowItem) -> u64 {
    let (a_pair, a_len) = summary(a);
    let (b_pair, b_len) = summary(b);
    bind_score(&a_pair, a_len, &b_pair, b_len)
}

/// Produce the next parent item from the child window.
///
/// `window` holds the child items at the parent's cursor (`window[0]`), plus
/// up to two lookahead items; `prev` is the child item just before the
/// cursor, if any. Returns `None` when the child row is exhausted.
pub fn produce_parent_item(
    prev: Option<&RowItem>,
    window: &[RowItem],
    max_combos: usize,
) -> Option<ParentStep> {
    let a = window.first()?;
    let Some(b) = window.get(1) else {
        // Final child has no right neighbour: carry it up.
        return Some(ParentStep {
            item: a.clone(),
            children_consumed: 1,
            fresh: false,
        });
    };

    let merged = items_want_merge(a, b, max_combos) && {
        let score = boundary_score_items(a, b);
        let left_blocks = prev
            .map(|p| items_want_merge(p, a, max_combos) && boundary_score_items(p, a) >= score)
            .unwrap_or(false);
        let right_blocks = window
            .get(2)
            .map(|c| items_want_merge(b, c, max_combos) && boundary_score_items(b, c) >= score)
            .unwrap_or(false);
        !left_blocks && !right_blocks
    };

    if !merged {
        return Some(ParentStep {
            item: a.clone(),
            children_consumed: 1,
            fresh: false,
        });
    }

    if let (RowItem::Single(a_block), RowItem::Single(b_block)) = (a, b) {
        return Some(ParentStep {
            item: RowItem::Single(Block::merge(a_block, b_block)),
            children_consumed: 2,
            fresh: true,
        });
    }
    Some(merge_ambiguous(a, b))
}

/// Merge across a boundary touching ambiguity: every compatible hypothesis
/// pair contributes one combo. Only reached when the boundary wants to
/// merge, which bounds the combo count by the cap.
fn merge_ambiguous(a: &RowItem, b: &RowItem) -> ParentStep {
    let a_hyps = hypotheses_of(a);
    let b_hyps = hypotheses_of(b);

    let mut combos: Vec<Hypothesis> = Vec::new();
    for ha in &a_hyps {
        for hb in &b_hyps {
            let Some(condition) = ha.condition.intersect(&hb.condition) else {
                continue; // mutually exclusive hypotheses
            };
            let merged = match (&ha.block, &hb.block) {
                (Some(left), Some(right))
                    if left.end_index() == right.start_index()
                        && wants_merge(left, right) =>
                {
                    Some(Block::merge(left, right))
                }
                _ => None,
            };
            combos.push(Hypothesis {
                block: merged,
                condition,
            });
        }
    }

    ParentStep {
        item: RowItem::Ambiguous(combos),
        children_consumed: 2,
        fresh: true,
    }
}
