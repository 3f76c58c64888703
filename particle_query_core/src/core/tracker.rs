use std::time::Instant;

use ahash::AHashSet;

use crate::core::{
    catalog::BlockDescriptor,
    column::Column,
    error::{QueryError, Result},
    planner::{read_plan::ReadGroup, selection::SelectionMask},
    quantity::Quantity,
};

/// How a tracker locates its particles at a later iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    /// Read the whole identity column and merge-join it.
    #[default]
    Plain,
    /// Ask the index which blocks hold the tracked identities.
    IndexAccelerated,
}

/// Particles pinned at one iteration and followed through later ones.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleTracker {
    species: String,
    selected: Vec<u64>,
    preserve_particle_index: bool,
    mode: TrackingMode,
}

impl ParticleTracker {
    /// Tracker over `identities`, sorted ascending.
    pub fn from_identities(species: &str, mut identities: Vec<u64>, preserve_particle_index: bool) -> Self {
        identities.sort_unstable();
        Self {
            species: species.to_string(),
            selected: identities,
            preserve_particle_index,
            mode: TrackingMode::Plain,
        }
    }

    pub fn with_mode(mut self, mode: TrackingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn species(&self) -> &str {
        &self.species
    }

    pub fn selected(&self) -> &[u64] {
        &self.selected
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn mode(&self) -> TrackingMode {
        self.mode
    }

    pub fn preserve_particle_index(&self) -> bool {
        self.preserve_particle_index
    }

    /// Positions in `pid` of the tracked particles, in selected-identity order.
    ///
    /// `None` marks a tracked particle absent from `pid`; those are only
    /// emitted when `preserve_particle_index` is set.
    pub fn extraction_indices(&self, pid: &[u64]) -> Vec<Option<usize>> {
        let start = Instant::now();

        // Stable, so duplicates resolve to their first occurrence.
        let mut order: Vec<usize> = (0..pid.len()).collect();
        order.sort_by_key(|&i| pid[i]);

        let indices = merge_join(pid, &order, &self.selected, self.preserve_particle_index);

        log::debug!(
            "merge-join of {} tracked ids against {} ids: {} matched in {:.2?}",
            self.selected.len(),
            pid.len(),
            indices.iter().filter(|i| i.is_some()).count(),
            start.elapsed()
        );

        indices
    }

    /// Rows of `column` at `indices`; absent rows are `NaN`. The identity
    /// column yields the tracked identities themselves.
    pub fn extract_column(&self, quantity: Quantity, column: &Column, indices: &[Option<usize>]) -> Column {
        if quantity.is_identity() && self.preserve_particle_index {
            return Column::U64(self.selected.clone());
        }

        match column {
            Column::F64(values) => Column::F64(
                indices
                    .iter()
                    .map(|i| i.map_or(f64::NAN, |i| values[i]))
                    .collect(),
            ),
            Column::U64(values) => Column::U64(indices.iter().flatten().map(|&i| values[i]).collect()),
        }
    }
}

/// Sorted merge of `pid` (visited through `order`) with ascending `selected`.
pub fn merge_join(pid: &[u64], order: &[usize], selected: &[u64], preserve: bool) -> Vec<Option<usize>> {
    let mut out = Vec::with_capacity(selected.len());
    let mut i = 0;
    let mut s = 0;

    while i < order.len() && s < selected.len() {
        let id = pid[order[i]];
        let target = selected[s];

        if id < target {
            i += 1;
        } else if id == target {
            out.push(Some(order[i]));
            s += 1;
        } else {
            if preserve {
                out.push(None);
            }
            s += 1;
        }
    }

    if preserve {
        out.extend(std::iter::repeat_n(None, selected.len() - s));
    }

    out
}

/// Rows of a grouped read buffer holding a tracked identity of their block.
///
/// `ids` is the identity column read over the chunk ranges of `strategy`.
pub fn tracked_row_mask(blocks: &[BlockDescriptor], strategy: &[ReadGroup], ids: &[u64]) -> Result<SelectionMask> {
    let total: usize = strategy.iter().map(|g| g.span(blocks).len() as usize).sum();
    if ids.len() != total {
        return Err(QueryError::ColumnLength {
            quantity: Quantity::Id,
            expected: total,
            actual: ids.len(),
        });
    }

    let mut mask = SelectionMask::none(total);
    let mut offset = 0usize;

    for group in strategy {
        let group_span = group.span(blocks);

        for block in &blocks[group.first..=group.last] {
            let wanted: AHashSet<u64> = block.identities.iter().flatten().copied().collect();
            if wanted.is_empty() {
                continue;
            }

            let base = offset + (block.start - group_span.start) as usize;
            for row in base..base + block.len() as usize {
                if wanted.contains(&ids[row]) {
                    mask.set(row);
                }
            }
        }

        offset += group_span.len() as usize;
    }

    Ok(mask)
}
