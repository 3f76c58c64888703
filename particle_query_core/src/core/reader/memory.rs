use ahash::AHashMap;
use smallvec::SmallVec;

use crate::core::{
    catalog::RowSpan,
    column::Column,
    error::{QueryError, Result},
    quantity::{Quantity, QuantityMap},
    reader::{ColumnReader, gather},
};

/// Columns of one species at one iteration.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParticleSnapshot {
    columns: QuantityMap<Column>,
    support: QuantityMap<Vec<f64>>,
}

impl ParticleSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_column(mut self, quantity: Quantity, column: Column) -> Self {
        self.columns.insert(quantity, column);
        self
    }

    pub fn with_values(self, quantity: Quantity, values: Vec<f64>) -> Self {
        self.with_column(quantity, Column::F64(values))
    }

    pub fn with_identities(self, ids: Vec<u64>) -> Self {
        self.with_column(Quantity::Id, Column::U64(ids))
    }

    /// Per-row `positionOffset` of one position axis.
    pub fn with_position_offset(mut self, quantity: Quantity, offsets: Vec<f64>) -> Self {
        debug_assert!(quantity.is_position());
        self.support.insert(quantity, offsets);
        self
    }

    /// Per-row mass, shared by the three momentum axes.
    pub fn with_mass(mut self, masses: Vec<f64>) -> Self {
        for q in [Quantity::Ux, Quantity::Uy, Quantity::Uz] {
            self.support.insert(q, masses.clone());
        }
        self
    }

    pub fn with_uniform_mass(self, mass: f64) -> Self {
        let rows = self.row_count();
        self.with_mass(vec![mass; rows])
    }

    pub fn column(&self, quantity: Quantity) -> Option<&Column> {
        self.columns.get(quantity)
    }

    pub fn support(&self, quantity: Quantity) -> Option<&[f64]> {
        self.support.get(quantity).map(Vec::as_slice)
    }

    pub fn quantities(&self) -> SmallVec<[Quantity; 8]> {
        self.columns.keys().collect()
    }

    /// Length of the longest stored column.
    pub fn row_count(&self) -> usize {
        self.columns.iter().map(|(_, c)| c.len()).max().unwrap_or(0)
    }
}

/// Dataset held entirely in memory, keyed by `(iteration, species)`.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDataset {
    snapshots: AHashMap<(u64, String), ParticleSnapshot>,
}

impl InMemoryDataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, iteration: u64, species: &str, snapshot: ParticleSnapshot) {
        self.snapshots.insert((iteration, species.to_string()), snapshot);
    }

    pub fn with_snapshot(mut self, iteration: u64, species: &str, snapshot: ParticleSnapshot) -> Self {
        self.insert(iteration, species, snapshot);
        self
    }

    pub fn snapshot(&self, iteration: u64, species: &str) -> Result<&ParticleSnapshot> {
        self.snapshots
            .get(&(iteration, species.to_string()))
            .ok_or_else(|| QueryError::UnknownSpecies(format!("{} at iteration {}", species, iteration)))
    }
}

impl ColumnReader for InMemoryDataset {
    fn available_quantities(&self, iteration: u64, species: &str) -> Result<SmallVec<[Quantity; 8]>> {
        Ok(self.snapshot(iteration, species)?.quantities())
    }

    fn row_count(&self, iteration: u64, species: &str) -> Result<u64> {
        Ok(self.snapshot(iteration, species)?.row_count() as u64)
    }

    fn read_raw(
        &self,
        iteration: u64,
        species: &str,
        quantity: Quantity,
        ranges: Option<&[RowSpan]>,
    ) -> Result<Column> {
        let snapshot = self.snapshot(iteration, species)?;
        let column = snapshot.column(quantity).ok_or_else(|| missing_column(quantity, species))?;

        Ok(match column {
            Column::F64(values) => Column::F64(gather(values, ranges)?),
            Column::U64(values) => Column::U64(gather(values, ranges)?),
        })
    }

    fn read_support(
        &self,
        iteration: u64,
        species: &str,
        quantity: Quantity,
        ranges: Option<&[RowSpan]>,
    ) -> Result<Option<Vec<f64>>> {
        let snapshot = self.snapshot(iteration, species)?;
        snapshot
            .support(quantity)
            .map(|values| gather(values, ranges))
            .transpose()
    }
}

pub(crate) fn missing_column(quantity: Quantity, species: &str) -> QueryError {
    if quantity.is_identity() {
        QueryError::IdentityColumnMissing(species.to_string())
    } else {
        QueryError::MalformedPredicate(format!("species '{}' has no '{}' column", species, quantity))
    }
}
