use std::time::Instant;

use crate::core::{
    column::Column,
    error::{QueryError, Result},
    planner::selection::SelectionMask,
    predicate::Envelope,
    quantity::QuantityMap,
    reader::normalize::DeferredTransform,
};

/// Exact predicate mask over `rows` retrieved rows.
///
/// Every constrained quantity must be present in `columns`. A quantity with a
/// deferred transform is compared on its transformed value, computed per row
/// without materializing the transformed column.
pub fn particle_mask(
    envelope: &Envelope,
    columns: &QuantityMap<Column>,
    transforms: &QuantityMap<DeferredTransform>,
    rows: usize,
) -> Result<SelectionMask> {
    let start = Instant::now();
    let mut mask = SelectionMask::all(rows);

    for (quantity, bound) in envelope.iter() {
        if bound.is_unbounded() {
            continue;
        }

        let values = columns
            .get(quantity)
            .and_then(Column::as_f64)
            .ok_or_else(|| QueryError::MalformedPredicate(format!("no numeric column for {}", quantity)))?;

        if values.len() != rows {
            return Err(QueryError::ColumnLength {
                quantity,
                expected: rows,
                actual: values.len(),
            });
        }

        let keep: Vec<bool> = match transforms.get(quantity).filter(|t| t.is_active()) {
            Some(transform) => values
                .iter()
                .enumerate()
                .map(|(row, v)| bound.contains(transform.value(*v, row)))
                .collect(),
            None => values.iter().map(|v| bound.contains(*v)).collect(),
        };

        mask.and_assign(&SelectionMask::from(keep));
    }

    log::trace!(
        "particle filter kept {}/{} rows in {:.2?}",
        mask.count_selected(),
        rows,
        start.elapsed()
    );

    Ok(mask)
}

/// Applies `mask` to `column`, then its deferred transform to the kept rows.
pub fn reduce_column(column: &Column, mask: &SelectionMask, transform: Option<&DeferredTransform>) -> Column {
    let mut out = column.filter(mask);
    if let (Some(transform), Some(values)) = (transform, out.as_f64_mut()) {
        transform.filtered(mask).apply_in_place(values);
    }
    out
}
