use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use itertools::{EitherOrBoth, Itertools};

use crate::core::{
    error::{QueryError, Result},
    predicate::{Bound, Envelope},
    quantity::{Axis, Quantity, QuantityMap, Record},
};

pub mod block_meta;
pub mod memory;

use block_meta::BlockMetaRow;

/// Index structures a catalog adapter can be backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFamily {
    /// Per-block min/max boxes, queried one quantity at a time.
    MinMax,
    /// Spatial tree over the three axes of a record, queried with a 6-bound box.
    /// Also carries the embedded identity lists used for tracking.
    RTree,
    /// Per-block bitmap index answering exact row offsets.
    Bitmap,
}

impl fmt::Display for IndexFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexFamily::MinMax => f.write_str("minmax"),
            IndexFamily::RTree => f.write_str("rtree"),
            IndexFamily::Bitmap => f.write_str("bitmap"),
        }
    }
}

/// Half-open row span `[start, end)` inside one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowSpan {
    pub start: u64,
    pub end: u64,
}

impl RowSpan {
    #[inline]
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }
}

/// Total number of rows covered by a sequence of spans.
pub fn total_rows(spans: &[RowSpan]) -> usize {
    spans.iter().map(|s| s.len() as usize).sum()
}

/// One physical block of a column as reported by an index lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockDescriptor {
    pub block_id: u64,
    /// First row of the block (inclusive).
    pub start: u64,
    /// One past the last row of the block.
    pub end: u64,
    /// Secondary index slices keyed by slice id, absolute row offsets.
    pub sub_slices: Option<BTreeMap<u64, RowSpan>>,
    /// Identities physically present in the block, sorted ascending.
    pub identities: Option<Vec<u64>>,
}

impl BlockDescriptor {
    pub fn new(block_id: u64, start: u64, end: u64) -> Self {
        Self {
            block_id,
            start,
            end,
            sub_slices: None,
            identities: None,
        }
    }

    pub fn with_sub_slices(mut self, slices: impl IntoIterator<Item = (u64, RowSpan)>) -> Self {
        self.sub_slices = Some(slices.into_iter().collect());
        self
    }

    pub fn with_identities(mut self, mut identities: Vec<u64>) -> Self {
        identities.sort_unstable();
        identities.dedup();
        self.identities = Some(identities);
        self
    }

    #[inline]
    pub fn span(&self) -> RowSpan {
        RowSpan::new(self.start, self.end)
    }

    #[inline]
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Checks `start < end` and that sub-slices are disjoint and inside the block.
    pub fn validate(&self) -> Result<()> {
        if self.start >= self.end {
            return Err(QueryError::InvalidBlock {
                block_id: self.block_id,
                reason: format!("empty or inverted span [{}, {})", self.start, self.end),
            });
        }

        if let Some(slices) = &self.sub_slices {
            let mut spans: Vec<RowSpan> = slices.values().copied().collect();
            spans.sort_unstable();

            let mut prev_end = self.start;
            for span in spans {
                if span.is_empty() || span.start < prev_end || span.end > self.end {
                    return Err(QueryError::InvalidBlock {
                        block_id: self.block_id,
                        reason: format!(
                            "sub-slice [{}, {}) overlaps or leaves [{}, {})",
                            span.start, span.end, self.start, self.end
                        ),
                    });
                }
                prev_end = span.end;
            }
        }

        Ok(())
    }
}

/// Blocks matching one lookup, keyed by block id.
pub type CandidateSet = BTreeMap<u64, BlockDescriptor>;

/// Names one indexed column (or record) of one snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey {
    pub iteration: u64,
    pub species: String,
    pub record: Record,
    pub axis: Option<Axis>,
}

impl IndexKey {
    pub fn for_quantity(iteration: u64, species: &str, quantity: Quantity) -> Self {
        Self {
            iteration,
            species: species.to_string(),
            record: quantity.record(),
            axis: quantity.axis(),
        }
    }

    pub fn for_record(iteration: u64, species: &str, record: Record) -> Self {
        Self {
            iteration,
            species: species.to_string(),
            record,
            axis: None,
        }
    }

    /// The quantity this key names, if it names a single column.
    pub fn quantity(&self) -> Option<Quantity> {
        match (self.record, self.axis) {
            (record, Some(axis)) => Quantity::from_record_axis(record, axis),
            (Record::Weighting, None) => Some(Quantity::W),
            (Record::Id, None) => Some(Quantity::Id),
            _ => None,
        }
    }
}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/data/{}/particles/{}/{}", self.iteration, self.species, self.record)?;
        if let Some(axis) = self.axis {
            write!(f, "/{}", axis.name())?;
        }
        Ok(())
    }
}

/// Three-axis box used by spatial-tree lookups. Open sides are infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxBounds {
    pub min: [f64; 3],
    pub max: [f64; 3],
}

impl BoxBounds {
    pub fn everything() -> Self {
        Self {
            min: [f64::NEG_INFINITY; 3],
            max: [f64::INFINITY; 3],
        }
    }

    pub fn set_axis(&mut self, axis: Axis, lower: f64, upper: f64) {
        self.min[axis.index()] = lower;
        self.max[axis.index()] = upper;
    }

    /// Inclusive box intersection test against another box.
    pub fn intersects(&self, min: &[f64; 3], max: &[f64; 3]) -> bool {
        (0..3).all(|i| max[i] >= self.min[i] && min[i] <= self.max[i])
    }
}

/// Query interface of an external index.
///
/// Lookups must be free of side effects so a single adapter can serve
/// concurrent queries. Every family defaults to [`QueryError::IndexUnavailable`].
pub trait CatalogAdapter: Send + Sync {
    /// Whether lookups fill [`BlockDescriptor::sub_slices`].
    fn has_secondary(&self) -> bool {
        false
    }

    /// Blocks whose values of one quantity may fall in `[lower, upper]`.
    fn lookup_range(&self, _key: &IndexKey, _lower: f64, _upper: f64) -> Result<CandidateSet> {
        Err(QueryError::IndexUnavailable(IndexFamily::MinMax))
    }

    /// Blocks whose record box intersects `bounds`.
    fn lookup_box(&self, _key: &IndexKey, _bounds: &BoxBounds) -> Result<CandidateSet> {
        Err(QueryError::IndexUnavailable(IndexFamily::RTree))
    }

    /// Blocks holding any of `identities` (sorted), with
    /// [`BlockDescriptor::identities`] restricted to the matching ones.
    fn lookup_identities(&self, _key: &IndexKey, _identities: &[u64]) -> Result<CandidateSet> {
        Err(QueryError::IndexUnavailable(IndexFamily::RTree))
    }

    /// Row offsets (relative to the block start) whose value falls in
    /// `[lower, upper]`, for the `block_index`-th metadata row.
    fn lookup_block_rows(
        &self,
        _key: &IndexKey,
        _block_index: usize,
        _block: &BlockMetaRow,
        _lower: f64,
        _upper: f64,
    ) -> Result<Vec<u64>> {
        Err(QueryError::IndexUnavailable(IndexFamily::Bitmap))
    }
}

impl<A: CatalogAdapter + ?Sized> CatalogAdapter for Arc<A> {
    fn has_secondary(&self) -> bool {
        (**self).has_secondary()
    }

    fn lookup_range(&self, key: &IndexKey, lower: f64, upper: f64) -> Result<CandidateSet> {
        (**self).lookup_range(key, lower, upper)
    }

    fn lookup_box(&self, key: &IndexKey, bounds: &BoxBounds) -> Result<CandidateSet> {
        (**self).lookup_box(key, bounds)
    }

    fn lookup_identities(&self, key: &IndexKey, identities: &[u64]) -> Result<CandidateSet> {
        (**self).lookup_identities(key, identities)
    }

    fn lookup_block_rows(
        &self,
        key: &IndexKey,
        block_index: usize,
        block: &BlockMetaRow,
        lower: f64,
        upper: f64,
    ) -> Result<Vec<u64>> {
        (**self).lookup_block_rows(key, block_index, block, lower, upper)
    }
}

/// Turns an envelope into the per-quantity (or per-record) lookups of one
/// index family.
pub struct BlockCatalog<'a> {
    adapter: &'a dyn CatalogAdapter,
    family: IndexFamily,
}

impl<'a> BlockCatalog<'a> {
    pub fn new(adapter: &'a dyn CatalogAdapter, family: IndexFamily) -> Self {
        Self { adapter, family }
    }

    pub fn has_secondary(&self) -> bool {
        self.adapter.has_secondary()
    }

    /// Bounds of `quantity` in the index's unit system.
    ///
    /// `momentum_to_index` is `mass * c` of the species.
    pub fn index_bound(quantity: Quantity, bound: &Bound, momentum_to_index: f64) -> Bound {
        if quantity.is_momentum() {
            bound.scaled(momentum_to_index)
        } else {
            *bound
        }
    }

    /// One candidate set per lookup, in envelope order.
    pub fn candidate_sets(
        &self,
        iteration: u64,
        species: &str,
        envelope: &Envelope,
        momentum_to_index: f64,
    ) -> Result<Vec<CandidateSet>> {
        let start = Instant::now();

        let sets = match self.family {
            IndexFamily::MinMax => self.range_lookups(iteration, species, envelope, momentum_to_index)?,
            IndexFamily::RTree => self.box_lookups(iteration, species, envelope, momentum_to_index)?,
            IndexFamily::Bitmap => {
                return Err(QueryError::Configuration(
                    "bitmap indexes are queried per block, not through candidate sets".to_string(),
                ));
            }
        };

        log::debug!(
            "query {} index: {} lookups in {:.2?}",
            self.family,
            sets.len(),
            start.elapsed()
        );

        Ok(sets)
    }

    fn range_lookups(
        &self,
        iteration: u64,
        species: &str,
        envelope: &Envelope,
        momentum_to_index: f64,
    ) -> Result<Vec<CandidateSet>> {
        envelope
            .iter()
            .map(|(quantity, bound)| {
                let key = IndexKey::for_quantity(iteration, species, quantity);
                let bound = Self::index_bound(quantity, bound, momentum_to_index);
                let set = self
                    .adapter
                    .lookup_range(&key, bound.lower_or_neg_inf(), bound.upper_or_inf())?;
                log::trace!("{} -> {} blocks", key, set.len());
                Ok(set)
            })
            .collect()
    }

    fn box_lookups(
        &self,
        iteration: u64,
        species: &str,
        envelope: &Envelope,
        momentum_to_index: f64,
    ) -> Result<Vec<CandidateSet>> {
        // Axes of one record share a physical record and are merged into one box.
        let mut boxes: QuantityMap<BoxBounds> = QuantityMap::new();
        let mut scalar_lookups = Vec::new();

        for (quantity, bound) in envelope.iter() {
            let Some(axis) = quantity.axis() else {
                scalar_lookups.push((quantity, *bound));
                continue;
            };

            // Keyed by the first component of the record.
            let slot = quantity.record().components()[0];
            if !boxes.contains(slot) {
                boxes.insert(slot, BoxBounds::everything());
            }

            if bound.is_unbounded() {
                continue;
            }

            let bound = Self::index_bound(quantity, bound, momentum_to_index);
            if let Some(b) = boxes.get_mut(slot) {
                b.set_axis(axis, bound.lower_or_neg_inf(), bound.upper_or_inf());
            }
        }

        let mut sets = Vec::with_capacity(boxes.len() + scalar_lookups.len());

        for (slot, bounds) in boxes.iter() {
            let key = IndexKey::for_record(iteration, species, slot.record());
            let set = self.adapter.lookup_box(&key, bounds)?;
            log::trace!("{} {:?} -> {} blocks", key, bounds, set.len());
            sets.push(set);
        }

        for (quantity, bound) in scalar_lookups {
            let key = IndexKey::for_quantity(iteration, species, quantity);
            let bound = Self::index_bound(quantity, &bound, momentum_to_index);
            sets.push(
                self.adapter
                    .lookup_range(&key, bound.lower_or_neg_inf(), bound.upper_or_inf())?,
            );
        }

        Ok(sets)
    }

    /// Blocks holding tracked identities in both the position and the
    /// momentum record, with their identity lists intersected.
    pub fn tracked_blocks(&self, iteration: u64, species: &str, identities: &[u64]) -> Result<CandidateSet> {
        let position_key = IndexKey::for_record(iteration, species, Record::Position);
        let momentum_key = IndexKey::for_record(iteration, species, Record::Momentum);

        let mut by_position = self.adapter.lookup_identities(&position_key, identities)?;
        let by_momentum = self.adapter.lookup_identities(&momentum_key, identities)?;

        by_position.retain(|block_id, block| {
            let Some(other) = by_momentum.get(block_id) else {
                return false;
            };

            let ids = match (block.identities.take(), other.identities.as_deref()) {
                (Some(a), Some(b)) => intersect_sorted(&a, b),
                (Some(a), None) => a,
                (None, Some(b)) => b.to_vec(),
                (None, None) => Vec::new(),
            };

            let keep = !ids.is_empty();
            block.identities = Some(ids);
            keep
        });

        log::debug!("tracking lookup: {} blocks hold tracked identities", by_position.len());
        Ok(by_position)
    }
}

/// Intersection of two ascending slices.
pub fn intersect_sorted(a: &[u64], b: &[u64]) -> Vec<u64> {
    a.iter()
        .merge_join_by(b.iter(), |x, y| x.cmp(y))
        .filter_map(|either| match either {
            EitherOrBoth::Both(x, _) => Some(*x),
            _ => None,
        })
        .dedup()
        .collect()
}
