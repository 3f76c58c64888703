use crate::core::{
    error::{QueryError, Result},
    planner::selection::SelectionMask,
    quantity::Quantity,
};

/// A retrieved particle column.
///
/// Every physical quantity is held as `f64`; the identity column is `u64`.
#[derive(Debug, Clone, PartialEq)]
pub enum Column {
    F64(Vec<f64>),
    U64(Vec<u64>),
}

impl Column {
    /// Zero-length column with the storage type of `quantity`.
    pub fn empty_for(quantity: Quantity) -> Self {
        if quantity.is_identity() {
            Column::U64(Vec::new())
        } else {
            Column::F64(Vec::new())
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Column::F64(v) => v.len(),
            Column::U64(v) => v.len(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_f64(&self) -> Option<&[f64]> {
        match self {
            Column::F64(v) => Some(v),
            Column::U64(_) => None,
        }
    }

    pub fn as_u64(&self) -> Option<&[u64]> {
        match self {
            Column::U64(v) => Some(v),
            Column::F64(_) => None,
        }
    }

    pub fn as_f64_mut(&mut self) -> Option<&mut Vec<f64>> {
        match self {
            Column::F64(v) => Some(v),
            Column::U64(_) => None,
        }
    }

    /// Fails with [`QueryError::ColumnLength`] if the column does not hold
    /// exactly `expected` rows.
    pub fn expect_len(&self, quantity: Quantity, expected: usize) -> Result<()> {
        if self.len() != expected {
            return Err(QueryError::ColumnLength {
                quantity,
                expected,
                actual: self.len(),
            });
        }
        Ok(())
    }

    /// Keeps the rows marked in `mask`.
    pub fn filter(&self, mask: &SelectionMask) -> Column {
        match self {
            Column::F64(v) => Column::F64(mask.apply(v)),
            Column::U64(v) => Column::U64(mask.apply(v)),
        }
    }

    /// Appends `other`; both columns must share a storage type.
    pub fn append(&mut self, other: Column) {
        match (self, other) {
            (Column::F64(a), Column::F64(b)) => a.extend(b),
            (Column::U64(a), Column::U64(b)) => a.extend(b),
            (a, b) => panic!(
                "cannot append column of a different storage type ({} rows onto {} rows)",
                b.len(),
                a.len()
            ),
        }
    }
}
