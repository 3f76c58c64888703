use smallvec::SmallVec;

use crate::core::catalog::{BlockDescriptor, CandidateSet, RowSpan};

/// Linear I/O cost of reading across a gap of `gap` rows: `gap * k + b`.
///
/// `b` is the fixed cost of issuing one more read, `k` the per-row cost of
/// reading rows that are not wanted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostModel {
    pub k: f64,
    pub b: f64,
}

impl CostModel {
    /// Profile measured on datasets of a few GB.
    pub const SMALL_DATASET: CostModel = CostModel { k: 3.35e-8, b: 6.2e-3 };

    /// Profile measured on datasets of hundreds of GB.
    pub const LARGE_DATASET: CostModel = CostModel { k: 1.86e-7, b: 6.2e-2 };

    pub const fn new(k: f64, b: f64) -> Self {
        Self { k, b }
    }

    /// Cost evaluated at a signed row offset.
    #[inline]
    pub fn cost(&self, offset: f64) -> f64 {
        offset * self.k + self.b
    }
}

impl Default for CostModel {
    fn default() -> Self {
        CostModel::LARGE_DATASET
    }
}

/// Inclusive range of block indices read as one contiguous chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadGroup {
    pub first: usize,
    pub last: usize,
}

impl ReadGroup {
    #[inline]
    pub fn new(first: usize, last: usize) -> Self {
        Self { first, last }
    }

    /// Physical rows covered by the group.
    #[inline]
    pub fn span(&self, blocks: &[BlockDescriptor]) -> RowSpan {
        RowSpan::new(blocks[self.first].start, blocks[self.last].end)
    }
}

pub type ReadStrategy = SmallVec<[ReadGroup; 16]>;

/// Recursive gap-splitting planner over blocks sorted by start.
#[derive(Debug, Clone, Copy)]
pub struct ReadPlanner {
    max_depth: usize,
    max_read_length: u64,
    cost: CostModel,
}

impl ReadPlanner {
    pub fn new(max_depth: usize, max_read_length: u64, cost: CostModel) -> Self {
        Self {
            max_depth,
            max_read_length,
            cost,
        }
    }

    /// Partition `blocks` into ordered, non-overlapping groups covering every index.
    pub fn plan(&self, blocks: &[BlockDescriptor]) -> ReadStrategy {
        let mut strategy = ReadStrategy::new();
        if blocks.is_empty() {
            return strategy;
        }

        self.plan_range(blocks, 0, blocks.len() - 1, 0, &mut strategy);

        log::trace!(
            "planned {} blocks into {} read groups",
            blocks.len(),
            strategy.len()
        );
        strategy
    }

    fn plan_range(
        &self,
        blocks: &[BlockDescriptor],
        start: usize,
        end: usize,
        depth: usize,
        out: &mut ReadStrategy,
    ) {
        if depth > self.max_depth || start == end {
            out.push(ReadGroup::new(start, end));
            return;
        }

        // Largest positive gap; the first one wins on ties.
        let mut max_gap = 0u64;
        let mut left_end = start;
        for i in start..end {
            let gap = blocks[i + 1].start.saturating_sub(blocks[i].end);
            if gap > max_gap {
                max_gap = gap;
                left_end = i;
            }
        }

        if max_gap == 0 {
            out.push(ReadGroup::new(start, end));
            return;
        }

        let right_start = left_end + 1;

        let cut = blocks[left_end].start as f64 - blocks[right_start].end as f64;
        let left_length = blocks[left_end].end - blocks[start].start;
        let right_length = blocks[end].end - blocks[right_start].start;

        if self.cost.cost(cut) < 0.0
            || left_length > self.max_read_length
            || right_length > self.max_read_length
        {
            self.plan_range(blocks, start, left_end, depth + 1, out);
            self.plan_range(blocks, right_start, end, depth + 1, out);
        } else {
            out.push(ReadGroup::new(start, end));
        }
    }
}

/// Surviving blocks ordered by physical start.
pub fn sort_blocks(candidates: CandidateSet) -> Vec<BlockDescriptor> {
    let mut blocks: Vec<BlockDescriptor> = candidates.into_values().collect();
    blocks.sort_by_key(|b| b.start);
    blocks
}

/// One contiguous read per group.
pub fn chunk_ranges(strategy: &[ReadGroup], blocks: &[BlockDescriptor]) -> Vec<RowSpan> {
    strategy.iter().map(|g| g.span(blocks)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks(spans: &[(u64, u64, u64)]) -> Vec<BlockDescriptor> {
        spans
            .iter()
            .map(|&(id, s, e)| BlockDescriptor::new(id, s, e))
            .collect()
    }

    fn groups(strategy: &ReadStrategy) -> Vec<(usize, usize)> {
        strategy.iter().map(|g| (g.first, g.last)).collect()
    }

    fn assert_partition(strategy: &ReadStrategy, n: usize) {
        let mut next = 0;
        for g in strategy {
            assert_eq!(g.first, next, "groups must be contiguous and ordered");
            assert!(g.last >= g.first);
            next = g.last + 1;
        }
        assert_eq!(next, n, "every block must be covered");
    }

    #[test]
    fn zero_slope_merges_everything() {
        let b = blocks(&[(1, 0, 10), (2, 10, 12), (3, 1000, 1010)]);
        let planner = ReadPlanner::new(999, 2000, CostModel::new(0.0, 1.0));
        assert_eq!(groups(&planner.plan(&b)), vec![(0, 2)]);
    }

    #[test]
    fn max_read_length_forces_split() {
        let b = blocks(&[(1, 0, 10), (2, 10, 12), (3, 1000, 1010)]);
        let planner = ReadPlanner::new(999, 5, CostModel::new(0.0, 1.0));
        assert_eq!(groups(&planner.plan(&b)), vec![(0, 1), (2, 2)]);

        assert_eq!(
            chunk_ranges(&planner.plan(&b), &b),
            vec![RowSpan::new(0, 12), RowSpan::new(1000, 1010)]
        );
    }

    #[test]
    fn costly_gaps_are_split() {
        let b = blocks(&[(1, 0, 10), (2, 10_000_000, 10_000_010)]);
        let planner = ReadPlanner::new(999, 10_000_000_000, CostModel::LARGE_DATASET);
        assert_eq!(groups(&planner.plan(&b)), vec![(0, 0), (1, 1)]);

        let close = blocks(&[(1, 0, 10), (2, 20, 30)]);
        assert_eq!(groups(&planner.plan(&close)), vec![(0, 1)]);
    }

    #[test]
    fn depth_limit_stops_recursion() {
        let b = blocks(&[(1, 0, 1), (2, 100, 101), (3, 300, 301), (4, 700, 701)]);
        let planner = ReadPlanner::new(0, 0, CostModel::new(0.0, 1.0));
        let strategy = planner.plan(&b);
        assert_partition(&strategy, b.len());
        assert_eq!(strategy.len(), 2);
    }

    #[test]
    fn empty_and_single_inputs() {
        let planner = ReadPlanner::new(999, 1, CostModel::default());
        assert!(planner.plan(&[]).is_empty());
        assert_eq!(groups(&planner.plan(&blocks(&[(9, 5, 50)]))), vec![(0, 0)]);
    }

    #[test]
    fn output_is_a_partition() {
        let b: Vec<BlockDescriptor> = (0..64u64)
            .map(|i| BlockDescriptor::new(i, i * 100 + (i % 7) * 1000, i * 100 + (i % 7) * 1000 + 50))
            .collect();
        let mut sorted = b.clone();
        sorted.sort_by_key(|b| b.start);

        for max_read_length in [1, 200, 5_000, u64::MAX] {
            let planner = ReadPlanner::new(999, max_read_length, CostModel::SMALL_DATASET);
            assert_partition(&planner.plan(&sorted), sorted.len());
        }
    }
}
