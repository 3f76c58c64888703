use crate::{
    BYTES_PER_VALUE,
    core::{
        catalog::{RowSpan, block_meta::BlockMetaRow},
        error::{QueryError, Result},
    },
};

/// Memory ceiling for one batch of column reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudget {
    pub max_bytes: u64,
    /// Number of 8-byte values held per row while a batch is processed.
    pub usage_factor: f64,
}

impl MemoryBudget {
    pub fn new(max_bytes: u64, usage_factor: f64) -> Self {
        Self {
            max_bytes,
            usage_factor,
        }
    }

    /// Parses limits such as `"64GB"`, `"512MB"`, `"16KB"` or a plain byte count.
    pub fn parse(limit: &str, usage_factor: f64) -> Result<Self> {
        let trimmed = limit.trim();
        let upper = trimmed.to_ascii_uppercase();

        let (digits, multiplier) = if let Some(v) = upper.strip_suffix("GB") {
            (v, 1024u64.pow(3))
        } else if let Some(v) = upper.strip_suffix("MB") {
            (v, 1024u64.pow(2))
        } else if let Some(v) = upper.strip_suffix("KB") {
            (v, 1024)
        } else if let Some(v) = upper.strip_suffix('B') {
            (v, 1)
        } else {
            (upper.as_str(), 1)
        };

        let value: u64 = digits
            .trim()
            .parse()
            .map_err(|_| QueryError::Configuration(format!("invalid memory limit '{}'", limit)))?;

        if !(usage_factor > 0.0) {
            return Err(QueryError::Configuration(format!(
                "memory usage factor must be positive, got {}",
                usage_factor
            )));
        }

        let max_bytes = value
            .checked_mul(multiplier)
            .ok_or_else(|| QueryError::Configuration(format!("memory limit '{}' does not fit in 64 bits", limit)))?;

        Ok(Self::new(max_bytes, usage_factor))
    }

    /// Rows that fit in one batch.
    pub fn max_rows(&self) -> u64 {
        (self.max_bytes as f64 / BYTES_PER_VALUE as f64 / self.usage_factor) as u64
    }
}

/// Greedy partition of the metadata rows into batches of at most `max_rows`
/// rows. A block larger than `max_rows` forms a batch of its own.
pub fn partition_batches(rows: &[BlockMetaRow], max_rows: u64) -> Vec<Vec<RowSpan>> {
    let mut batches: Vec<Vec<RowSpan>> = Vec::new();
    let mut current: Vec<RowSpan> = Vec::new();
    let mut current_rows = 0u64;

    for row in rows {
        if !current.is_empty() && current_rows + row.block_count > max_rows {
            batches.push(std::mem::take(&mut current));
            current_rows = 0;
        }

        current_rows += row.block_count;
        current.push(row.span());
    }

    if !current.is_empty() {
        batches.push(current);
    }

    batches
}

/// Logs resident and virtual memory of the process.
pub(crate) fn log_memory_usage(label: &str) {
    if let Some(usage) = memory_stats::memory_stats() {
        log::debug!(
            "{}: physical {} MB, virtual {} MB",
            label,
            usage.physical_mem / (1024 * 1024),
            usage.virtual_mem / (1024 * 1024)
        );
    } else {
        log::trace!("{}: memory statistics unavailable", label);
    }
}
