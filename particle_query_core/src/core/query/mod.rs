use std::sync::Arc;
use std::time::Instant;

use smallvec::SmallVec;

use crate::{
    configuration::{Configuration, ReadMode},
    core::{
        catalog::{CatalogAdapter, IndexFamily},
        column::Column,
        error::{QueryError, Result},
        predicate::Envelope,
        quantity::Quantity,
        reader::ColumnReader,
        tracker::{ParticleTracker, TrackingMode},
    },
};

pub mod paths;
pub mod tracking;

use paths::{BitmapRead, FullScan, IndexedRead, MemoryBoundedRead};

/// Columns requested from one species at one iteration, optionally filtered.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleQuery {
    pub iteration: u64,
    pub species: String,
    pub var_list: SmallVec<[Quantity; 8]>,
    pub select: Option<Envelope>,
}

impl ParticleQuery {
    pub fn new(iteration: u64, species: &str, var_list: &[Quantity]) -> Self {
        Self {
            iteration,
            species: species.to_string(),
            var_list: SmallVec::from_slice(var_list),
            select: None,
        }
    }

    /// Same as [`ParticleQuery::new`] with quantity names such as `"x"` or `"uz"`.
    pub fn from_names(iteration: u64, species: &str, names: &[&str]) -> Result<Self> {
        let var_list = names
            .iter()
            .map(|n| n.parse::<Quantity>())
            .collect::<Result<SmallVec<[Quantity; 8]>>>()?;
        Ok(Self::new(iteration, species, &var_list))
    }

    pub fn with_select(mut self, envelope: Envelope) -> Self {
        self.select = Some(envelope);
        self
    }

    /// The envelope, if at least one of its bounds constrains anything.
    pub fn envelope(&self) -> Option<&Envelope> {
        self.select
            .as_ref()
            .filter(|e| e.iter().any(|(_, b)| !b.is_unbounded()))
    }
}

/// Result columns in the order of the requested quantities.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParticleData {
    columns: SmallVec<[(Quantity, Column); 8]>,
}

impl ParticleData {
    pub fn empty(var_list: &[Quantity]) -> Self {
        Self {
            columns: var_list.iter().map(|q| (*q, Column::empty_for(*q))).collect(),
        }
    }

    pub fn from_columns(columns: impl IntoIterator<Item = (Quantity, Column)>) -> Self {
        Self {
            columns: columns.into_iter().collect(),
        }
    }

    pub fn get(&self, quantity: Quantity) -> Option<&Column> {
        self.columns.iter().find(|(q, _)| *q == quantity).map(|(_, c)| c)
    }

    pub fn quantities(&self) -> impl Iterator<Item = Quantity> + '_ {
        self.columns.iter().map(|(q, _)| *q)
    }

    pub fn columns(&self) -> impl Iterator<Item = &Column> {
        self.columns.iter().map(|(_, c)| c)
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.columns.first().map_or(0, |(_, c)| c.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Concatenates partial results of the same quantities, in order.
    pub fn concat(var_list: &[Quantity], parts: Vec<ParticleData>) -> Self {
        let mut out = ParticleData::empty(var_list);
        for part in parts {
            for (quantity, column) in part.columns {
                if let Some((_, acc)) = out.columns.iter_mut().find(|(q, _)| *q == quantity) {
                    acc.append(column);
                }
            }
        }
        out
    }
}

/// Shared collaborators of one query execution.
pub struct QueryContext<'a> {
    pub reader: &'a dyn ColumnReader,
    pub catalog: Option<&'a dyn CatalogAdapter>,
    pub config: &'a Configuration,
}

impl<'a> QueryContext<'a> {
    pub fn catalog(&self, family: IndexFamily) -> Result<&'a dyn CatalogAdapter> {
        self.catalog.ok_or(QueryError::IndexUnavailable(family))
    }

    /// `mass * c` of the species when the envelope bounds a momentum, `1` otherwise.
    pub fn momentum_to_index(&self, species: &str, envelope: &Envelope) -> Result<f64> {
        let needs_mass = envelope
            .iter()
            .any(|(q, b)| q.is_momentum() && !b.is_unbounded());
        if !needs_mass {
            return Ok(1.0);
        }
        self.config.species_registry().momentum_to_index(species)
    }
}

/// One way of answering a filtered query.
pub trait QueryStrategy {
    fn name(&self) -> &'static str;

    fn execute(&self, ctx: &QueryContext<'_>, query: &ParticleQuery, envelope: &Envelope) -> Result<ParticleData>;
}

/// Entry point for particle queries over one dataset.
pub struct ParticleQueryEngine {
    reader: Arc<dyn ColumnReader>,
    catalog: Option<Arc<dyn CatalogAdapter>>,
    config: Configuration,
}

impl ParticleQueryEngine {
    pub fn new(reader: Arc<dyn ColumnReader>, config: Configuration) -> Self {
        Self {
            reader,
            catalog: None,
            config,
        }
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn CatalogAdapter>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn config(&self) -> &Configuration {
        &self.config
    }

    fn context(&self) -> QueryContext<'_> {
        QueryContext {
            reader: self.reader.as_ref(),
            catalog: self.catalog.as_deref(),
            config: &self.config,
        }
    }

    /// Index-backed modes scan in full when no catalog is attached.
    fn strategy(&self) -> Box<dyn QueryStrategy> {
        match self.config.read_mode() {
            ReadMode::Indexed | ReadMode::Bitmap if self.catalog.is_none() => Box::new(FullScan),
            ReadMode::FullScan => Box::new(FullScan),
            ReadMode::Indexed => Box::new(IndexedRead {
                family: self.config.index_family(),
                layout: self.config.read_layout(),
            }),
            ReadMode::Bitmap => Box::new(BitmapRead),
            ReadMode::MemoryBounded => Box::new(MemoryBoundedRead),
        }
    }

    fn validate(&self, iteration: u64, species: &str, var_list: &[Quantity], envelope: Option<&Envelope>) -> Result<()> {
        let available = self.reader.available_quantities(iteration, species)?;

        let mut requested: SmallVec<[Quantity; 16]> = SmallVec::from_slice(var_list);
        if let Some(envelope) = envelope {
            requested.extend(envelope.quantities());
        }

        for quantity in &requested {
            if available.contains(quantity) {
                continue;
            }
            if quantity.is_identity() {
                return Err(QueryError::IdentityColumnMissing(species.to_string()));
            }
            return Err(QueryError::MalformedPredicate(format!(
                "species '{}' has no '{}' column at iteration {}",
                species, quantity, iteration
            )));
        }

        Ok(())
    }

    /// Columns of `query.var_list` for the particles inside `query.select`.
    pub fn get_particle(&self, query: &ParticleQuery) -> Result<ParticleData> {
        let start = Instant::now();

        if let Some(envelope) = &query.select {
            envelope.validate()?;
        }
        self.validate(query.iteration, &query.species, &query.var_list, query.select.as_ref())?;

        let ctx = self.context();
        let (name, data) = match query.envelope() {
            Some(envelope) => {
                let strategy = self.strategy();
                (strategy.name(), strategy.execute(&ctx, query, envelope)?)
            }
            None => (FullScan.name(), FullScan.execute(&ctx, query, &Envelope::new())?),
        };

        log::info!(
            "{} at iteration {} via {}: {} particles in {:.2?}",
            query.species,
            query.iteration,
            name,
            data.len(),
            start.elapsed()
        );

        Ok(data)
    }

    /// Pins the identities of the particles selected by `query`.
    pub fn track(&self, query: &ParticleQuery, preserve_particle_index: bool) -> Result<ParticleTracker> {
        if !self.reader.has_quantity(query.iteration, &query.species, Quantity::Id)? {
            return Err(QueryError::IdentityColumnMissing(query.species.clone()));
        }

        let id_query = ParticleQuery {
            var_list: SmallVec::from_slice(&[Quantity::Id]),
            ..query.clone()
        };
        let data = self.get_particle(&id_query)?;
        let ids = data
            .get(Quantity::Id)
            .and_then(Column::as_u64)
            .map(<[u64]>::to_vec)
            .unwrap_or_default();

        Ok(ParticleTracker::from_identities(&query.species, ids, preserve_particle_index))
    }

    /// Columns of `var_list` for the tracked particles at `iteration`.
    pub fn get_tracked(&self, tracker: &ParticleTracker, iteration: u64, var_list: &[Quantity]) -> Result<ParticleData> {
        let start = Instant::now();
        let species = tracker.species();

        if !self.reader.has_quantity(iteration, species, Quantity::Id)? {
            return Err(QueryError::IdentityColumnMissing(species.to_string()));
        }
        self.validate(iteration, species, var_list, None)?;

        let ctx = self.context();
        let data = match tracker.mode() {
            TrackingMode::Plain => tracking::plain(&ctx, tracker, iteration, var_list)?,
            TrackingMode::IndexAccelerated => tracking::index_accelerated(&ctx, tracker, iteration, var_list)?,
        };

        log::info!(
            "tracked {} {} particles at iteration {} ({:?}): {} rows in {:.2?}",
            tracker.len(),
            species,
            iteration,
            tracker.mode(),
            data.len(),
            start.elapsed()
        );

        Ok(data)
    }
}
