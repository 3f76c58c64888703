use smallvec::SmallVec;

use crate::core::{
    catalog::{RowSpan, total_rows},
    column::Column,
    error::{QueryError, Result},
    quantity::Quantity,
};

pub mod memory;
pub mod normalize;
pub mod raw_store;

use normalize::{DeferredTransform, Normalization};

/// Read access to the particle columns of a dataset.
///
/// `ranges` are read in the given order and concatenated; `None` reads the
/// whole column. Readers are shared between queries and must not keep
/// per-query state.
pub trait ColumnReader: Send + Sync {
    /// Quantities stored for a species at an iteration.
    fn available_quantities(&self, iteration: u64, species: &str) -> Result<SmallVec<[Quantity; 8]>>;

    /// Number of particles of a species at an iteration.
    fn row_count(&self, iteration: u64, species: &str) -> Result<u64>;

    /// Stored values without unit normalization.
    fn read_raw(&self, iteration: u64, species: &str, quantity: Quantity, ranges: Option<&[RowSpan]>)
    -> Result<Column>;

    /// Per-row support values of the normalization of `quantity`: position
    /// offsets for positions, masses for momenta, `None` for the rest.
    fn read_support(
        &self,
        iteration: u64,
        species: &str,
        quantity: Quantity,
        ranges: Option<&[RowSpan]>,
    ) -> Result<Option<Vec<f64>>>;

    fn has_quantity(&self, iteration: u64, species: &str, quantity: Quantity) -> Result<bool> {
        Ok(self.available_quantities(iteration, species)?.contains(&quantity))
    }

    /// Values of `quantity`, normalized unless `skip_offset` is set.
    fn read_species_data(
        &self,
        iteration: u64,
        species: &str,
        quantity: Quantity,
        ranges: Option<&[RowSpan]>,
        skip_offset: bool,
    ) -> Result<Column> {
        let mut column = self.read_raw(iteration, species, quantity, ranges)?;

        if let Some(ranges) = ranges {
            column.expect_len(quantity, total_rows(ranges))?;
        }

        if skip_offset {
            return Ok(column);
        }

        if let Some(transform) = self.deferred_transform(iteration, species, quantity, ranges)? {
            if let Some(values) = column.as_f64_mut() {
                transform.apply_in_place(values);
            }
        }

        Ok(column)
    }

    /// Normalization of `quantity` over `ranges`, to apply later.
    fn deferred_transform(
        &self,
        iteration: u64,
        species: &str,
        quantity: Quantity,
        ranges: Option<&[RowSpan]>,
    ) -> Result<Option<DeferredTransform>> {
        let kind = Normalization::for_quantity(quantity);
        if kind == Normalization::None {
            return Ok(None);
        }

        Ok(self
            .read_support(iteration, species, quantity, ranges)?
            .map(|support| DeferredTransform::new(kind, support)))
    }
}

/// Gathers `ranges` of `values` in order, or clones all of it.
pub(crate) fn gather<T: Copy>(values: &[T], ranges: Option<&[RowSpan]>) -> Result<Vec<T>> {
    let Some(ranges) = ranges else {
        return Ok(values.to_vec());
    };

    let mut out = Vec::with_capacity(total_rows(ranges));
    for span in ranges {
        let (start, end) = (span.start as usize, span.end as usize);
        if start > end || end > values.len() {
            return Err(QueryError::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                format!("read [{}, {}) out of bounds ({} rows)", start, end, values.len()),
            )));
        }
        out.extend_from_slice(&values[start..end]);
    }
    Ok(out)
}
