//! The base row: length-1 blocks streamed straight off a sequence strand.

use crate::block::{Block, Condition, Hypothesis, Lean, RowItem};
use crate::sequence::{is_concrete, possibilities, SequenceView};

/// A producer of one level's item stream.
pub trait RowSource {
    /// Produce the next item, or `None` at end of sequence.
    fn next_item(&mut self) -> Option<RowItem>;

    /// The level this source feeds.
    fn level(&self) -> usize;
}

/// Streams one item per basepair over a window of a strand.
#[derive(Debug)]
pub struct BaseRow {
    view: SequenceView,
    next: usize,
    end: usize,
}

impl BaseRow {
    /// Base row over a whole strand.
    pub fn new(view: SequenceView) -> Self {
        let end = view.len();
        Self { view, next: 0, end }
    }

    /// Base row restricted to `start..end` (used by compiled windows).
    pub fn over_range(view: SequenceView, start: usize, end: usize) -> Self {
        let end = end.min(view.len());
        Self {
            view,
            next: start,
            end,
        }
    }
}

impl RowSource for BaseRow {
    fn next_item(&mut self) -> Option<RowItem> {
        if self.next >= self.end {
            return None;
        }
        let idx = self.next;
        self.next += 1;
        let code = self.view.code_at(idx);

        if is_concrete(code) {
            let mut block = Block::single(idx, code);
            // Record the following base's lean while it is cheap to peek.
            if idx + 1 < self.end {
                let next_code = self.view.code_at(idx + 1);
                if is_concrete(next_code) {
                    block.stamp_next_lean(Lean::of(&crate::block::HashPair::single(next_code)));
                }
            }
            Some(RowItem::Single(block))
        } else {
            let hypotheses = possibilities(code)
                .map(|concrete| Hypothesis {
                    block: Some(Block::single(idx, concrete)),
                    condition: Condition::assigns(idx, concrete),
                })
                .collect();
            Some(RowItem::Ambiguous(hypotheses))
        }
    }

    fn level(&self) -> usize {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sequence::{SequenceDatabase, SequenceId, Strand};

    fn forward_view(ascii: &[u8]) -> SequenceView {
        let db = SequenceDatabase::from_named_ascii(&[("t", ascii)]).unwrap();
        db.view(SequenceId(0), Strand::Forward).unwrap()
    }

    #[test]
    fn concrete_bases_stream_as_singles() {
        let mut row = BaseRow::new(forward_view(b"ACGT"));
        let mut starts = Vec::new();
        while let Some(item) = row.next_item() {
            let block = item.as_single().expect("all concrete").clone();
            assert_eq!(block.length(), 1);
            starts.push(block.start_index());
        }
        assert_eq!(starts, vec![0, 1, 2, 3]);
    }

    #[test]
    fn ambiguous_bases_expand_to_hypotheses() {
        let mut row = BaseRow::new(forward_view(b"ANRT"));
        row.next_item();
        match row.next_item() {
            Some(RowItem::Ambiguous(hypotheses)) => assert_eq!(hypotheses.len(), 4),
            other => panic!("expected ambiguous item, got {:?}", other),
        }
        match row.next_item() {
            Some(RowItem::Ambiguous(hypotheses)) => {
                // R = A or G.
                assert_eq!(hypotheses.len(), 2);
                for h in &hypotheses {
                    assert_eq!(h.condition.constraints().len(), 1);
                    assert_eq!(h.condition.constraints()[0].0, 2);
                }
            }
            other => panic!("expected ambiguous item, got {:?}", other),
        }
    }

    #[test]
    fn range_restriction_is_honoured() {
        let mut row = BaseRow::over_range(forward_view(b"ACGTACGT"), 2, 5);
        let mut count = 0;
        while let Some(item) = row.next_item() {
            assert!(item.start_index() >= 2 && item.start_index() < 5);
            count += 1;
        }
        assert_eq!(count, 3);
    }
}
