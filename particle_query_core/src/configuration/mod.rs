use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashMap;
use log::LevelFilter;

use crate::{
    DEFAULT_MAX_PLAN_DEPTH, DEFAULT_MAX_READ_LENGTH, ELECTRON_MASS, HYDROGEN_MASS, SPEED_OF_LIGHT,
    core::{
        catalog::{IndexFamily, block_meta::BlockMetaTable},
        error::{QueryError, Result},
        planner::{
            ReadLayout,
            batch::MemoryBudget,
            read_plan::{CostModel, ReadPlanner},
        },
    },
};

/// Which read path answers a query with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadMode {
    /// Read every column in full.
    FullScan,
    /// Candidate blocks from the min/max or spatial-tree index.
    #[default]
    Indexed,
    /// Exact row offsets from a per-block bitmap index.
    Bitmap,
    /// Full scan in batches bounded by a memory budget.
    MemoryBounded,
}

/// Where block metadata rows come from.
#[derive(Debug, Clone)]
pub enum BlockMetaSource {
    /// Header-less CSV, loaded for every query.
    Path(PathBuf),
    Table(Arc<BlockMetaTable>),
}

impl BlockMetaSource {
    pub fn load(&self) -> Result<Arc<BlockMetaTable>> {
        match self {
            BlockMetaSource::Path(path) => Ok(Arc::new(BlockMetaTable::load(path)?)),
            BlockMetaSource::Table(table) => Ok(table.clone()),
        }
    }
}

/// Particle masses by species name, in kg.
#[derive(Debug, Clone)]
pub struct SpeciesRegistry {
    masses: AHashMap<String, f64>,
}

impl Default for SpeciesRegistry {
    fn default() -> Self {
        let mut masses = AHashMap::new();
        masses.insert("electrons".to_string(), ELECTRON_MASS);
        masses.insert("hydrogen".to_string(), HYDROGEN_MASS);
        Self { masses }
    }
}

impl SpeciesRegistry {
    pub fn with_species(mut self, species: &str, mass: f64) -> Self {
        self.masses.insert(species.to_string(), mass);
        self
    }

    pub fn mass(&self, species: &str) -> Result<f64> {
        self.masses
            .get(species)
            .copied()
            .ok_or_else(|| QueryError::UnknownSpecies(species.to_string()))
    }

    /// Factor turning normalized momentum bounds into index units: `mass * c`.
    pub fn momentum_to_index(&self, species: &str) -> Result<f64> {
        Ok(self.mass(species)? * SPEED_OF_LIGHT)
    }
}

/// Query engine settings. Unset fields fall back to the defaults below.
#[derive(Clone, Default)]
pub struct Configuration {
    pub read_mode: Option<ReadMode>,
    pub index_family: Option<IndexFamily>,
    pub read_layout: Option<ReadLayout>,
    pub use_secondary: Option<bool>,
    pub skip_offset: Option<bool>,
    pub limit_block_num: Option<usize>,
    /// e.g. `"64GB"`
    pub limit_memory_usage: Option<String>,
    pub memory_usage_factor: Option<f64>,
    pub block_meta: Option<BlockMetaSource>,
    pub max_plan_depth: Option<usize>,
    pub max_read_length: Option<u64>,
    pub cost_model: Option<CostModel>,
    pub species: Option<SpeciesRegistry>,
    pub log_level: Option<LevelFilter>,
}

impl Configuration {
    pub fn read_mode(&self) -> ReadMode {
        self.read_mode.unwrap_or_default()
    }

    pub fn index_family(&self) -> IndexFamily {
        self.index_family.unwrap_or(IndexFamily::MinMax)
    }

    pub fn read_layout(&self) -> ReadLayout {
        self.read_layout.unwrap_or_default()
    }

    pub fn use_secondary(&self) -> bool {
        self.use_secondary.unwrap_or(false)
    }

    pub fn skip_offset(&self) -> bool {
        self.skip_offset.unwrap_or(false)
    }

    pub fn memory_budget(&self) -> Result<MemoryBudget> {
        let limit = self.limit_memory_usage.as_deref().ok_or_else(|| {
            QueryError::Configuration("memory-bounded reads need limit_memory_usage".to_string())
        })?;
        MemoryBudget::parse(limit, self.memory_usage_factor.unwrap_or(1.0))
    }

    pub fn block_meta(&self) -> Result<Arc<BlockMetaTable>> {
        self.block_meta
            .as_ref()
            .ok_or_else(|| QueryError::Configuration("no block metadata configured".to_string()))?
            .load()
    }

    pub fn planner(&self) -> ReadPlanner {
        ReadPlanner::new(
            self.max_plan_depth.unwrap_or(DEFAULT_MAX_PLAN_DEPTH),
            self.max_read_length.unwrap_or(DEFAULT_MAX_READ_LENGTH),
            self.cost_model.unwrap_or_default(),
        )
    }

    pub fn species_registry(&self) -> SpeciesRegistry {
        self.species.clone().unwrap_or_default()
    }

    /// `env_logger` builder at the configured level (errors only by default).
    /// Callers install it with `init` or `try_init`.
    pub fn logger(&self) -> env_logger::Builder {
        let mut builder = env_logger::Builder::new();
        builder.filter_level(self.log_level.unwrap_or(LevelFilter::Error));
        builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_resolve() {
        let config = Configuration::default();
        assert_eq!(config.read_mode(), ReadMode::Indexed);
        assert_eq!(config.read_layout(), ReadLayout::DirectBlock);
        assert_eq!(config.index_family(), IndexFamily::MinMax);
        assert!(!config.skip_offset());
        assert!(config.memory_budget().is_err());
        assert!(config.block_meta().is_err());
    }

    #[test]
    fn logger_installs_once() {
        let config = Configuration {
            log_level: Some(LevelFilter::Debug),
            ..Default::default()
        };
        let _ = config.logger().is_test(true).try_init();
        assert!(config.logger().is_test(true).try_init().is_err());
    }

    #[test]
    fn species_masses() {
        let registry = SpeciesRegistry::default().with_species("positrons", ELECTRON_MASS);
        assert_eq!(registry.mass("hydrogen").unwrap(), HYDROGEN_MASS);
        assert_eq!(registry.momentum_to_index("positrons").unwrap(), ELECTRON_MASS * SPEED_OF_LIGHT);
        assert!(matches!(registry.mass("muons"), Err(QueryError::UnknownSpecies(_))));
    }

    #[test]
    fn memory_budget_from_settings() {
        let config = Configuration {
            limit_memory_usage: Some("2GB".to_string()),
            memory_usage_factor: Some(2.0),
            ..Default::default()
        };
        assert_eq!(config.memory_budget().unwrap().max_rows(), 2 * 1024u64.pow(3) / 8 / 2);
    }
}
