//! Block metadata side channel.
//!
//! The bitmap and memory-bounded read paths walk the physical blocks of a
//! snapshot from a header-less CSV of `iteration,block_start,block_count`
//! rows written next to the dataset.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use serde::Deserialize;

use crate::core::{catalog::RowSpan, error::Result};

/// One row of the block metadata CSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BlockMetaRow {
    pub iteration: u64,
    pub block_start: u64,
    pub block_count: u64,
}

impl BlockMetaRow {
    pub fn new(iteration: u64, block_start: u64, block_count: u64) -> Self {
        Self {
            iteration,
            block_start,
            block_count,
        }
    }

    #[inline]
    pub fn span(&self) -> RowSpan {
        RowSpan::new(self.block_start, self.block_start + self.block_count)
    }
}

/// All metadata rows of a dataset, every iteration mixed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlockMetaTable {
    rows: Vec<BlockMetaRow>,
}

impl BlockMetaTable {
    pub fn new(rows: Vec<BlockMetaRow>) -> Self {
        Self { rows }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let table = Self::from_reader(BufReader::new(file))?;
        log::debug!("loaded {} block metadata rows from {}", table.rows.len(), path.display());
        Ok(table)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut rows = Vec::new();
        for result in csv_reader.deserialize() {
            let row: BlockMetaRow = result?;
            rows.push(row);
        }

        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Rows of one iteration, sorted by `block_start`, first row kept per start.
    pub fn for_iteration(&self, iteration: u64) -> Vec<BlockMetaRow> {
        let mut rows: Vec<BlockMetaRow> = self
            .rows
            .iter()
            .filter(|r| r.iteration == iteration)
            .copied()
            .collect();

        rows.sort_by_key(|r| r.block_start);
        rows.dedup_by_key(|r| r.block_start);
        rows
    }
}
