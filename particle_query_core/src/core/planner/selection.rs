use std::ops::Range;

use crate::core::{catalog::BlockDescriptor, planner::read_plan::ReadGroup};

/// One flag per row of a concatenated read buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionMask {
    bits: Vec<bool>,
}

impl SelectionMask {
    pub fn all(len: usize) -> Self {
        Self {
            bits: vec![true; len],
        }
    }

    pub fn none(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[inline]
    pub fn get(&self, row: usize) -> bool {
        self.bits[row]
    }

    #[inline]
    pub fn set(&mut self, row: usize) {
        self.bits[row] = true;
    }

    pub fn as_slice(&self) -> &[bool] {
        &self.bits
    }

    pub fn count_selected(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Marks `rows`, clamped to the buffer.
    pub fn mark(&mut self, rows: Range<usize>) {
        let end = rows.end.min(self.bits.len());
        let start = rows.start.min(end);
        self.bits[start..end].fill(true);
    }

    /// Logical AND with a mask of the same length.
    pub fn and_assign(&mut self, other: &SelectionMask) {
        debug_assert_eq!(self.len(), other.len());
        for (a, b) in self.bits.iter_mut().zip(other.bits.iter()) {
            *a &= *b;
        }
    }

    /// Rows kept, in buffer order.
    pub fn selected_rows(&self) -> Vec<usize> {
        self.bits
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i))
            .collect()
    }

    /// Keeps the values of marked rows.
    pub fn apply<T: Copy>(&self, values: &[T]) -> Vec<T> {
        debug_assert_eq!(self.len(), values.len());
        values
            .iter()
            .zip(self.bits.iter())
            .filter_map(|(v, keep)| keep.then_some(*v))
            .collect()
    }
}

impl From<Vec<bool>> for SelectionMask {
    fn from(bits: Vec<bool>) -> Self {
        Self { bits }
    }
}

/// Structural mask over the buffer produced by reading one chunk per group.
///
/// Each group occupies `[offset, offset + group length)` of the buffer, where
/// `offset` accumulates the lengths of the preceding groups. Inside a group,
/// rows are addressed relative to the group's physical start.
pub fn group_mask(strategy: &[ReadGroup], blocks: &[BlockDescriptor], use_secondary: bool) -> SelectionMask {
    let total: usize = strategy.iter().map(|g| g.span(blocks).len() as usize).sum();
    let mut mask = SelectionMask::none(total);

    let mut offset = 0usize;
    for group in strategy {
        let group_span = group.span(blocks);

        for block in &blocks[group.first..=group.last] {
            mark_block(&mut mask, block, group_span.start, offset, use_secondary);
        }

        offset += group_span.len() as usize;
    }

    mask
}

/// Structural mask over the buffer produced by reading each block on its own.
pub fn block_mask(blocks: &[BlockDescriptor], use_secondary: bool) -> SelectionMask {
    let total: usize = blocks.iter().map(|b| b.len() as usize).sum();
    let mut mask = SelectionMask::none(total);

    let mut offset = 0usize;
    for block in blocks {
        mark_block(&mut mask, block, block.start, offset, use_secondary);
        offset += block.len() as usize;
    }

    mask
}

fn mark_block(mask: &mut SelectionMask, block: &BlockDescriptor, base: u64, offset: usize, use_secondary: bool) {
    let relative = |row: u64| offset + (row - base) as usize;

    match block.sub_slices.as_ref().filter(|_| use_secondary) {
        Some(slices) => {
            for slice in slices.values() {
                mask.mark(relative(slice.start)..relative(slice.end));
            }
        }
        None => mask.mark(relative(block.start)..relative(block.end)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::RowSpan;

    #[test]
    fn group_mask_marks_blocks_not_gaps() {
        let blocks = vec![
            BlockDescriptor::new(1, 0, 2),
            BlockDescriptor::new(2, 4, 6),
            BlockDescriptor::new(3, 100, 103),
        ];
        let strategy = [ReadGroup::new(0, 1), ReadGroup::new(2, 2)];

        let mask = group_mask(&strategy, &blocks, false);
        assert_eq!(mask.len(), 6 + 3);
        assert_eq!(
            mask.as_slice(),
            &[true, true, false, false, true, true, true, true, true]
        );
    }

    #[test]
    fn secondary_slices_use_group_offset() {
        let blocks = vec![
            BlockDescriptor::new(1, 0, 10),
            BlockDescriptor::new(2, 50, 60).with_sub_slices([(0, RowSpan::new(52, 54)), (1, RowSpan::new(58, 60))]),
        ];
        let strategy = [ReadGroup::new(0, 0), ReadGroup::new(1, 1)];

        let mask = group_mask(&strategy, &blocks, true);
        assert_eq!(mask.len(), 20);
        assert_eq!(mask.selected_rows(), vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 12, 13, 18, 19]);

        // Without the secondary index the whole block counts.
        assert_eq!(group_mask(&strategy, &blocks, false).count_selected(), 20);
    }

    #[test]
    fn block_mask_concatenates_blocks() {
        let blocks = vec![
            BlockDescriptor::new(1, 10, 14).with_sub_slices([(0, RowSpan::new(11, 12))]),
            BlockDescriptor::new(2, 40, 42).with_sub_slices([(0, RowSpan::new(40, 42))]),
        ];
        let mask = block_mask(&blocks, true);
        assert_eq!(mask.as_slice(), &[false, true, false, false, true, true]);
    }

    #[test]
    fn apply_and_combine() {
        let mut a = SelectionMask::from(vec![true, true, false, true]);
        a.and_assign(&SelectionMask::from(vec![false, true, true, true]));
        assert_eq!(a.apply(&[10, 20, 30, 40]), vec![20, 40]);
        assert_eq!(a.count_selected(), 2);
    }
}
