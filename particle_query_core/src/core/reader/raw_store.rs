//! Raw little-endian column files, memory-mapped on read.
//!
//! Layout: `<root>/<iteration>/<species>/<name>.bin`, one file per column,
//! 8 bytes per row. Physical quantities are `f64`, identities `u64`.
//! Position offsets live in `position_offset_<axis>.bin`, per-row masses in
//! `mass.bin`.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use memmap2::{Mmap, MmapOptions};
use smallvec::SmallVec;

use crate::{
    BYTES_PER_VALUE,
    core::{
        catalog::{RowSpan, total_rows},
        column::Column,
        error::{QueryError, Result},
        quantity::Quantity,
        reader::{ColumnReader, memory::ParticleSnapshot, memory::missing_column},
    },
};

const MASS_FILE: &str = "mass";

pub struct RawColumnStore {
    root: PathBuf,
}

impl RawColumnStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_dir(&self, iteration: u64, species: &str) -> PathBuf {
        self.root.join(iteration.to_string()).join(species)
    }

    fn column_path(&self, iteration: u64, species: &str, name: &str) -> PathBuf {
        self.snapshot_dir(iteration, species).join(format!("{}.bin", name))
    }

    fn support_name(quantity: Quantity) -> Option<String> {
        if quantity.is_position() {
            Some(format!("position_offset_{}", quantity.name()))
        } else if quantity.is_momentum() {
            Some(MASS_FILE.to_string())
        } else {
            None
        }
    }

    /// Writes every column and support array of `snapshot`.
    pub fn write_snapshot(&self, iteration: u64, species: &str, snapshot: &ParticleSnapshot) -> Result<()> {
        let dir = self.snapshot_dir(iteration, species);
        fs::create_dir_all(&dir)?;

        for quantity in snapshot.quantities() {
            if let Some(column) = snapshot.column(quantity) {
                write_column(&self.column_path(iteration, species, quantity.name()), column)?;
            }
        }

        for quantity in [Quantity::X, Quantity::Y, Quantity::Z, Quantity::Ux] {
            let (Some(values), Some(name)) = (snapshot.support(quantity), Self::support_name(quantity)) else {
                continue;
            };
            write_column(&self.column_path(iteration, species, &name), &Column::F64(values.to_vec()))?;
        }

        log::debug!(
            "wrote {} columns of {} rows to {}",
            snapshot.quantities().len(),
            snapshot.row_count(),
            dir.display()
        );
        Ok(())
    }

    fn map(&self, path: &Path) -> Result<Option<Mmap>> {
        let file = File::open(path)?;
        if file.metadata()?.len() == 0 {
            return Ok(None);
        }
        // Column files are only written before a query runs and never mutated while mapped.
        let mmap = unsafe { MmapOptions::new().map(&file)? };
        Ok(Some(mmap))
    }

    fn read_file(&self, path: &Path, identity: bool, ranges: Option<&[RowSpan]>) -> Result<Column> {
        let mmap = self.map(path)?;
        let bytes: &[u8] = mmap.as_deref().unwrap_or(&[]);

        if bytes.len() as u64 % BYTES_PER_VALUE != 0 {
            return Err(QueryError::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} is not a whole number of 8-byte values", path.display()),
            )));
        }

        let rows = bytes.len() as u64 / BYTES_PER_VALUE;
        let full = [RowSpan::new(0, rows)];
        let ranges = ranges.unwrap_or(&full);

        let mut column = if identity {
            Column::U64(vec![0; total_rows(ranges)])
        } else {
            Column::F64(vec![0.0; total_rows(ranges)])
        };

        let mut at = 0usize;
        for span in ranges {
            if span.start > span.end || span.end > rows {
                return Err(QueryError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    format!("read [{}, {}) out of bounds ({} rows in {})", span.start, span.end, rows, path.display()),
                )));
            }

            let src = &bytes[(span.start * BYTES_PER_VALUE) as usize..(span.end * BYTES_PER_VALUE) as usize];
            let len = span.len() as usize;
            match &mut column {
                Column::F64(out) => LittleEndian::read_f64_into(src, &mut out[at..at + len]),
                Column::U64(out) => LittleEndian::read_u64_into(src, &mut out[at..at + len]),
            }
            at += len;
        }

        Ok(column)
    }
}

fn write_column(path: &Path, column: &Column) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    match column {
        Column::F64(values) => {
            for v in values {
                writer.write_f64::<LittleEndian>(*v)?;
            }
        }
        Column::U64(values) => {
            for v in values {
                writer.write_u64::<LittleEndian>(*v)?;
            }
        }
    }
    writer.flush()?;
    Ok(())
}

impl ColumnReader for RawColumnStore {
    fn available_quantities(&self, iteration: u64, species: &str) -> Result<SmallVec<[Quantity; 8]>> {
        let dir = self.snapshot_dir(iteration, species);
        if !dir.is_dir() {
            return Err(QueryError::UnknownSpecies(format!("{} at iteration {}", species, iteration)));
        }

        Ok(Quantity::ALL
            .iter()
            .copied()
            .filter(|q| self.column_path(iteration, species, q.name()).is_file())
            .collect())
    }

    fn row_count(&self, iteration: u64, species: &str) -> Result<u64> {
        let available = self.available_quantities(iteration, species)?;
        let Some(first) = available.first() else {
            return Ok(0);
        };
        let len = fs::metadata(self.column_path(iteration, species, first.name()))?.len();
        Ok(len / BYTES_PER_VALUE)
    }

    fn read_raw(
        &self,
        iteration: u64,
        species: &str,
        quantity: Quantity,
        ranges: Option<&[RowSpan]>,
    ) -> Result<Column> {
        let path = self.column_path(iteration, species, quantity.name());
        if !path.is_file() {
            if !self.snapshot_dir(iteration, species).is_dir() {
                return Err(QueryError::UnknownSpecies(format!("{} at iteration {}", species, iteration)));
            }
            return Err(missing_column(quantity, species));
        }

        self.read_file(&path, quantity.is_identity(), ranges)
    }

    fn read_support(
        &self,
        iteration: u64,
        species: &str,
        quantity: Quantity,
        ranges: Option<&[RowSpan]>,
    ) -> Result<Option<Vec<f64>>> {
        let Some(name) = Self::support_name(quantity) else {
            return Ok(None);
        };

        let path = self.column_path(iteration, species, &name);
        if !path.is_file() {
            return Ok(None);
        }

        match self.read_file(&path, false, ranges)? {
            Column::F64(values) => Ok(Some(values)),
            Column::U64(_) => Ok(None),
        }
    }
}
