#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use log::LevelFilter;
use rand::{Rng, SeedableRng, rngs::StdRng, seq::SliceRandom};
use smallvec::SmallVec;

use particle_query_core::{
    ELECTRON_MASS, SPEED_OF_LIGHT,
    configuration::Configuration,
    core::{
        catalog::{
            RowSpan,
            block_meta::{BlockMetaRow, BlockMetaTable},
            memory::{InMemoryCatalog, uniform_blocks},
        },
        column::Column,
        error::Result,
        quantity::Quantity,
        reader::{
            ColumnReader,
            memory::{InMemoryDataset, ParticleSnapshot},
        },
    },
};

pub const SPECIES: &str = "electrons";
pub const FIRST: u64 = 100;
pub const LATER: u64 = 200;
pub const ROWS: u64 = 2_000;
pub const BLOCK_LEN: u64 = 100;

pub fn init_logging() {
    let config = Configuration {
        log_level: Some(LevelFilter::Warn),
        ..Default::default()
    };
    let _ = config.logger().is_test(true).try_init();
}

fn snapshot(rng: &mut StdRng, ids: Vec<u64>) -> ParticleSnapshot {
    let n = ids.len();
    let mc = ELECTRON_MASS * SPEED_OF_LIGHT;

    // Slowly increasing x, so min/max boxes prune well.
    let x: Vec<f64> = (0..n).map(|i| i as f64 * 0.005 + rng.random_range(0.0..0.01)).collect();
    let y: Vec<f64> = (0..n).map(|_| rng.random_range(-1.0..1.0)).collect();
    let z: Vec<f64> = (0..n).map(|_| rng.random_range(-1.0..1.0)).collect();
    let ux: Vec<f64> = (0..n).map(|_| rng.random_range(-2.0..2.0) * mc).collect();
    let uy: Vec<f64> = (0..n).map(|_| rng.random_range(-2.0..2.0) * mc).collect();
    let uz: Vec<f64> = (0..n).map(|_| rng.random_range(-2.0..2.0) * mc).collect();
    let w: Vec<f64> = (0..n).map(|_| rng.random_range(0.0..1.0)).collect();

    let x_offset: Vec<f64> = (0..n).map(|i| (i % 3) as f64 * 0.25).collect();

    ParticleSnapshot::new()
        .with_values(Quantity::X, x)
        .with_values(Quantity::Y, y)
        .with_values(Quantity::Z, z)
        .with_values(Quantity::Ux, ux)
        .with_values(Quantity::Uy, uy)
        .with_values(Quantity::Uz, uz)
        .with_values(Quantity::W, w)
        .with_identities(ids)
        .with_position_offset(Quantity::X, x_offset)
        .with_position_offset(Quantity::Y, vec![0.0; n])
        .with_position_offset(Quantity::Z, vec![-0.5; n])
        .with_uniform_mass(ELECTRON_MASS)
}

/// Two iterations of one species. At the later one the particles are
/// shuffled and every seventh one is gone.
pub fn dataset() -> InMemoryDataset {
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let first_ids: Vec<u64> = (1..=ROWS).collect();
    let mut later_ids: Vec<u64> = first_ids.iter().copied().filter(|id| id % 7 != 0).collect();
    later_ids.shuffle(&mut rng);

    let first = snapshot(&mut rng, first_ids);
    let later = snapshot(&mut rng, later_ids);

    InMemoryDataset::new()
        .with_snapshot(FIRST, SPECIES, first)
        .with_snapshot(LATER, SPECIES, later)
}

pub fn catalog(dataset: &InMemoryDataset, slice_len: Option<u64>) -> InMemoryCatalog {
    let mut catalog = InMemoryCatalog::new();
    for iteration in [FIRST, LATER] {
        let rows = dataset.row_count(iteration, SPECIES).unwrap();
        catalog
            .index_snapshot(dataset, iteration, SPECIES, &uniform_blocks(rows, BLOCK_LEN), slice_len)
            .unwrap();
    }
    catalog
}

pub fn block_meta(dataset: &InMemoryDataset) -> BlockMetaTable {
    let mut rows = Vec::new();
    for iteration in [FIRST, LATER] {
        let count = dataset.row_count(iteration, SPECIES).unwrap();
        // Listed backwards with one duplicate; the table sorts and dedups.
        for span in uniform_blocks(count, BLOCK_LEN).into_iter().rev() {
            rows.push(BlockMetaRow::new(iteration, span.start, span.len()));
        }
        rows.push(BlockMetaRow::new(iteration, 0, BLOCK_LEN.min(count)));
    }
    BlockMetaTable::new(rows)
}

pub fn f64s(column: Option<&Column>) -> Vec<f64> {
    column.and_then(Column::as_f64).map(<[f64]>::to_vec).unwrap()
}

pub fn u64s(column: Option<&Column>) -> Vec<u64> {
    column.and_then(Column::as_u64).map(<[u64]>::to_vec).unwrap()
}

/// Reader wrapper counting column reads.
pub struct CountingReader {
    pub inner: InMemoryDataset,
    pub reads: AtomicUsize,
}

impl CountingReader {
    pub fn new(inner: InMemoryDataset) -> Self {
        Self {
            inner,
            reads: AtomicUsize::new(0),
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

impl ColumnReader for CountingReader {
    fn available_quantities(&self, iteration: u64, species: &str) -> Result<SmallVec<[Quantity; 8]>> {
        self.inner.available_quantities(iteration, species)
    }

    fn row_count(&self, iteration: u64, species: &str) -> Result<u64> {
        self.inner.row_count(iteration, species)
    }

    fn read_raw(
        &self,
        iteration: u64,
        species: &str,
        quantity: Quantity,
        ranges: Option<&[RowSpan]>,
    ) -> Result<Column> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.inner.read_raw(iteration, species, quantity, ranges)
    }

    fn read_support(
        &self,
        iteration: u64,
        species: &str,
        quantity: Quantity,
        ranges: Option<&[RowSpan]>,
    ) -> Result<Option<Vec<f64>>> {
        self.inner.read_support(iteration, species, quantity, ranges)
    }
}
