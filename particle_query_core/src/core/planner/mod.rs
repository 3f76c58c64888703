use std::time::Instant;

use crate::core::{
    catalog::{BlockDescriptor, CandidateSet, RowSpan, total_rows},
    error::{QueryError, Result},
};

pub mod batch;
pub mod intersect;
pub mod read_plan;
pub mod selection;

use read_plan::{ReadPlanner, chunk_ranges, sort_blocks};
use selection::{SelectionMask, block_mask, group_mask};

/// How surviving blocks are turned into physical reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadLayout {
    /// Optimizer groups, gap rows removed by a structural mask.
    Grouped,
    /// One read per surviving block.
    #[default]
    DirectBlock,
    /// One read per retained sub-slice. Needs a secondary index.
    SliceRead,
}

/// Physical reads of one query plus the structural mask over their buffer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadPlan {
    pub chunks: Vec<RowSpan>,
    pub mask: Option<SelectionMask>,
}

impl ReadPlan {
    pub fn total_rows(&self) -> usize {
        total_rows(&self.chunks)
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl ReadLayout {
    /// Builds the reads for the intersected candidate blocks.
    pub fn plan(&self, candidates: CandidateSet, planner: &ReadPlanner, use_secondary: bool) -> Result<ReadPlan> {
        let start = Instant::now();

        for block in candidates.values() {
            block.validate()?;
        }

        let blocks = sort_blocks(candidates);
        if blocks.is_empty() {
            return Ok(ReadPlan::default());
        }

        let plan = match self {
            ReadLayout::Grouped => {
                let strategy = planner.plan(&blocks);
                ReadPlan {
                    chunks: chunk_ranges(&strategy, &blocks),
                    mask: Some(group_mask(&strategy, &blocks, use_secondary)),
                }
            }
            ReadLayout::DirectBlock => ReadPlan {
                chunks: blocks.iter().map(BlockDescriptor::span).collect(),
                mask: use_secondary.then(|| block_mask(&blocks, true)),
            },
            ReadLayout::SliceRead => {
                if !use_secondary {
                    return Err(QueryError::MalformedPredicate(
                        "slice reads need a secondary index".to_string(),
                    ));
                }
                ReadPlan {
                    chunks: slice_chunks(&blocks),
                    mask: None,
                }
            }
        };

        log::debug!(
            "{:?} layout: {} blocks -> {} reads, {} rows in {:.2?}",
            self,
            blocks.len(),
            plan.chunks.len(),
            plan.total_rows(),
            start.elapsed()
        );

        Ok(plan)
    }
}

/// Retained sub-slices in physical order. Blocks without sub-slices are read whole.
fn slice_chunks(blocks: &[BlockDescriptor]) -> Vec<RowSpan> {
    let mut chunks = Vec::new();
    for block in blocks {
        match &block.sub_slices {
            Some(slices) => {
                let mut spans: Vec<RowSpan> = slices.values().copied().collect();
                spans.sort_unstable();
                chunks.extend(spans);
            }
            None => chunks.push(block.span()),
        }
    }
    chunks
}
