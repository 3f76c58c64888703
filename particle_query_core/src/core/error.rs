use thiserror::Error;

use crate::core::{catalog::IndexFamily, quantity::Quantity};

/// Failures that abort a particle query.
///
/// An empty selection is not an error: the query returns empty columns.
#[derive(Error, Debug)]
pub enum QueryError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Block metadata error: {0}")]
    BlockMeta(#[from] csv::Error),

    #[error("Index family {0} is not configured")]
    IndexUnavailable(IndexFamily),

    #[error("The number of blocks is {count} (limit {limit}), please reduce the range of the selection")]
    TooManyBlocks { count: usize, limit: usize },

    #[error("Species '{0}' has no particle identity column")]
    IdentityColumnMissing(String),

    #[error("Malformed predicate: {0}")]
    MalformedPredicate(String),

    #[error("Unknown species '{0}'")]
    UnknownSpecies(String),

    #[error("Invalid configuration: {0}")]
    Configuration(String),

    #[error("Invalid block {block_id}: {reason}")]
    InvalidBlock { block_id: u64, reason: String },

    #[error("Column {quantity} has {actual} rows, expected {expected}")]
    ColumnLength {
        quantity: Quantity,
        expected: usize,
        actual: usize,
    },
}

/// Custom Result type for query operations
pub type Result<T> = std::result::Result<T, QueryError>;
