use std::time::Instant;

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::core::{
    catalog::{
        BlockDescriptor, BoxBounds, CandidateSet, CatalogAdapter, IndexFamily, IndexKey, RowSpan,
        block_meta::BlockMetaRow, intersect_sorted,
    },
    error::{QueryError, Result},
    quantity::{Quantity, QuantityMap, Record},
    reader::ColumnReader,
};

/// Min/max of one quantity over a row span.
type ValueBox = (f64, f64);

#[derive(Debug, Clone)]
struct SliceIndex {
    key: u64,
    span: RowSpan,
    boxes: QuantityMap<ValueBox>,
}

#[derive(Debug, Clone)]
struct BlockIndex {
    span: RowSpan,
    boxes: QuantityMap<ValueBox>,
    slices: Vec<SliceIndex>,
    identities: Vec<u64>,
}

#[derive(Debug, Clone, Default)]
struct SnapshotIndex {
    blocks: Vec<BlockIndex>,
    values: QuantityMap<Vec<f64>>,
}

/// Reference catalog computed from a dataset.
///
/// Values are indexed in the index unit system: positions include their
/// offset, momenta stay in stored units (`kg m/s`).
#[derive(Debug, Clone)]
pub struct InMemoryCatalog {
    snapshots: AHashMap<(u64, String), SnapshotIndex>,
    families: SmallVec<[IndexFamily; 3]>,
    secondary: bool,
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self {
            snapshots: AHashMap::new(),
            families: SmallVec::from_slice(&[IndexFamily::MinMax, IndexFamily::RTree, IndexFamily::Bitmap]),
            secondary: false,
        }
    }
}

/// `rows` split into consecutive blocks of `block_len` rows.
pub fn uniform_blocks(rows: u64, block_len: u64) -> Vec<RowSpan> {
    let block_len = block_len.max(1);
    (0..rows)
        .step_by(block_len as usize)
        .map(|start| RowSpan::new(start, (start + block_len).min(rows)))
        .collect()
}

fn value_box(values: &[f64]) -> ValueBox {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

#[inline]
fn box_overlaps(b: &ValueBox, lower: f64, upper: f64) -> bool {
    b.1 >= lower && b.0 <= upper
}

fn boxes_for(values: &QuantityMap<Vec<f64>>, span: RowSpan) -> QuantityMap<ValueBox> {
    values
        .iter()
        .map(|(q, v)| (q, value_box(&v[span.start as usize..span.end as usize])))
        .collect()
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restricts the index families lookups are answered for.
    pub fn with_families(mut self, families: &[IndexFamily]) -> Self {
        self.families = SmallVec::from_slice(families);
        self
    }

    fn require(&self, family: IndexFamily) -> Result<()> {
        if self.families.contains(&family) {
            Ok(())
        } else {
            Err(QueryError::IndexUnavailable(family))
        }
    }

    /// Indexes one snapshot. With `slice_len`, every block is further split
    /// into sub-slices of that many rows, keyed by their first row.
    pub fn index_snapshot(
        &mut self,
        reader: &dyn ColumnReader,
        iteration: u64,
        species: &str,
        blocks: &[RowSpan],
        slice_len: Option<u64>,
    ) -> Result<()> {
        let start = Instant::now();
        let available = reader.available_quantities(iteration, species)?;

        let mut values: QuantityMap<Vec<f64>> = QuantityMap::new();
        for &quantity in available.iter().filter(|q| !q.is_identity()) {
            // Positions are indexed with their offset, momenta in stored units.
            let skip_offset = !quantity.is_position();
            let column = reader.read_species_data(iteration, species, quantity, None, skip_offset)?;
            if let Some(v) = column.as_f64() {
                values.insert(quantity, v.to_vec());
            }
        }

        let identities = if available.contains(&Quantity::Id) {
            reader
                .read_raw(iteration, species, Quantity::Id, None)?
                .as_u64()
                .map(<[u64]>::to_vec)
        } else {
            None
        };

        let rows = values
            .iter()
            .map(|(_, v)| v.len())
            .chain(identities.as_ref().map(Vec::len))
            .max()
            .unwrap_or(0) as u64;

        let mut index = SnapshotIndex {
            blocks: Vec::with_capacity(blocks.len()),
            values: QuantityMap::new(),
        };

        for (block_id, &span) in blocks.iter().enumerate() {
            let descriptor = BlockDescriptor::new(block_id as u64, span.start, span.end);
            descriptor.validate()?;
            if span.end > rows {
                return Err(QueryError::InvalidBlock {
                    block_id: block_id as u64,
                    reason: format!("ends at row {} past the {} stored rows", span.end, rows),
                });
            }

            let slices = match slice_len {
                Some(len) => uniform_blocks(span.len(), len)
                    .into_iter()
                    .map(|s| {
                        let slice = RowSpan::new(span.start + s.start, span.start + s.end);
                        SliceIndex {
                            key: slice.start,
                            span: slice,
                            boxes: boxes_for(&values, slice),
                        }
                    })
                    .collect(),
                None => Vec::new(),
            };

            let mut block_ids = identities
                .as_ref()
                .map(|ids| ids[span.start as usize..span.end as usize].to_vec())
                .unwrap_or_default();
            block_ids.sort_unstable();
            block_ids.dedup();

            index.blocks.push(BlockIndex {
                span,
                boxes: boxes_for(&values, span),
                slices,
                identities: block_ids,
            });
        }

        index.values = values;
        self.secondary |= slice_len.is_some();

        log::debug!(
            "indexed {} at iteration {}: {} blocks over {} rows in {:.2?}",
            species,
            iteration,
            index.blocks.len(),
            rows,
            start.elapsed()
        );

        self.snapshots.insert((iteration, species.to_string()), index);
        Ok(())
    }

    fn snapshot(&self, key: &IndexKey) -> Option<&SnapshotIndex> {
        let found = self.snapshots.get(&(key.iteration, key.species.clone()));
        if found.is_none() {
            log::warn!("no index metadata for {}", key);
        }
        found
    }

    fn indexed_quantity(key: &IndexKey) -> Result<Quantity> {
        key.quantity()
            .filter(|q| !q.is_identity())
            .ok_or_else(|| QueryError::MalformedPredicate(format!("{} is not a range-indexed column", key)))
    }

    fn descriptor(
        &self,
        block_id: usize,
        block: &BlockIndex,
        mut slice_matches: impl FnMut(&SliceIndex) -> bool,
    ) -> BlockDescriptor {
        let descriptor = BlockDescriptor::new(block_id as u64, block.span.start, block.span.end);
        if !self.secondary || block.slices.is_empty() {
            return descriptor;
        }

        descriptor.with_sub_slices(
            block
                .slices
                .iter()
                .filter(|s| slice_matches(s))
                .map(|s| (s.key, s.span)),
        )
    }
}

impl CatalogAdapter for InMemoryCatalog {
    fn has_secondary(&self) -> bool {
        self.secondary
    }

    fn lookup_range(&self, key: &IndexKey, lower: f64, upper: f64) -> Result<CandidateSet> {
        let quantity = Self::indexed_quantity(key)?;
        if quantity.axis().is_some() {
            self.require(IndexFamily::MinMax)?;
        } else {
            self.require(IndexFamily::MinMax)
                .or_else(|_| self.require(IndexFamily::RTree))?;
        }

        let Some(snapshot) = self.snapshot(key) else {
            return Ok(CandidateSet::new());
        };

        let mut out = CandidateSet::new();
        for (block_id, block) in snapshot.blocks.iter().enumerate() {
            let Some(b) = block.boxes.get(quantity) else {
                return Err(QueryError::MalformedPredicate(format!("no index for {}", key)));
            };
            if !box_overlaps(b, lower, upper) {
                continue;
            }

            let descriptor = self.descriptor(block_id, block, |s| {
                s.boxes.get(quantity).is_some_and(|b| box_overlaps(b, lower, upper))
            });
            out.insert(block_id as u64, descriptor);
        }

        Ok(out)
    }

    fn lookup_box(&self, key: &IndexKey, bounds: &BoxBounds) -> Result<CandidateSet> {
        self.require(IndexFamily::RTree)?;
        if !matches!(key.record, Record::Position | Record::Momentum) {
            return Err(QueryError::MalformedPredicate(format!("{} is not a vector record", key)));
        }

        let Some(snapshot) = self.snapshot(key) else {
            return Ok(CandidateSet::new());
        };

        let components = key.record.components();
        let record_box = |boxes: &QuantityMap<ValueBox>| {
            let mut min = [f64::NEG_INFINITY; 3];
            let mut max = [f64::INFINITY; 3];
            for (axis, q) in components.iter().enumerate() {
                if let Some(b) = boxes.get(*q) {
                    min[axis] = b.0;
                    max[axis] = b.1;
                }
            }
            (min, max)
        };

        let mut out = CandidateSet::new();
        for (block_id, block) in snapshot.blocks.iter().enumerate() {
            let (min, max) = record_box(&block.boxes);
            if !bounds.intersects(&min, &max) {
                continue;
            }

            let descriptor = self.descriptor(block_id, block, |s| {
                let (min, max) = record_box(&s.boxes);
                bounds.intersects(&min, &max)
            });
            out.insert(block_id as u64, descriptor);
        }

        Ok(out)
    }

    fn lookup_identities(&self, key: &IndexKey, identities: &[u64]) -> Result<CandidateSet> {
        self.require(IndexFamily::RTree)?;

        let Some(snapshot) = self.snapshot(key) else {
            return Ok(CandidateSet::new());
        };

        let mut out = CandidateSet::new();
        for (block_id, block) in snapshot.blocks.iter().enumerate() {
            let matching = intersect_sorted(&block.identities, identities);
            if matching.is_empty() {
                continue;
            }
            out.insert(
                block_id as u64,
                BlockDescriptor::new(block_id as u64, block.span.start, block.span.end).with_identities(matching),
            );
        }

        Ok(out)
    }

    fn lookup_block_rows(
        &self,
        key: &IndexKey,
        _block_index: usize,
        block: &BlockMetaRow,
        lower: f64,
        upper: f64,
    ) -> Result<Vec<u64>> {
        self.require(IndexFamily::Bitmap)?;
        let quantity = Self::indexed_quantity(key)?;

        let Some(snapshot) = self.snapshot(key) else {
            return Ok(Vec::new());
        };
        let Some(values) = snapshot.values.get(quantity) else {
            return Err(QueryError::MalformedPredicate(format!("no bitmap index for {}", key)));
        };

        let span = block.span();
        if span.end as usize > values.len() {
            return Err(QueryError::InvalidBlock {
                block_id: block.block_start,
                reason: format!("ends at row {} past the {} indexed rows", span.end, values.len()),
            });
        }

        Ok(values[span.start as usize..span.end as usize]
            .iter()
            .enumerate()
            .filter(|(_, v)| **v >= lower && **v <= upper)
            .map(|(i, _)| i as u64)
            .collect())
    }
}
