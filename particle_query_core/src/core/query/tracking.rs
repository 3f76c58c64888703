use std::time::Instant;

use crate::core::{
    catalog::{BlockCatalog, IndexFamily},
    column::Column,
    error::{QueryError, Result},
    planner::read_plan::{chunk_ranges, sort_blocks},
    quantity::Quantity,
    query::{ParticleData, QueryContext},
    tracker::{ParticleTracker, tracked_row_mask},
};

fn identity_column(column: &Column, species: &str) -> Result<Vec<u64>> {
    column
        .as_u64()
        .map(<[u64]>::to_vec)
        .ok_or_else(|| QueryError::IdentityColumnMissing(species.to_string()))
}

/// Whole identity column, merge-joined with the tracked identities.
pub(crate) fn plain(
    ctx: &QueryContext<'_>,
    tracker: &ParticleTracker,
    iteration: u64,
    var_list: &[Quantity],
) -> Result<ParticleData> {
    let species = tracker.species();
    let pid_column = ctx.reader.read_species_data(iteration, species, Quantity::Id, None, false)?;
    let pid = identity_column(&pid_column, species)?;

    let indices = tracker.extraction_indices(&pid);

    let mut out = Vec::with_capacity(var_list.len());
    for &quantity in var_list {
        let column = if quantity.is_identity() {
            tracker.extract_column(quantity, &pid_column, &indices)
        } else {
            let full = ctx.reader.read_species_data(iteration, species, quantity, None, false)?;
            full.expect_len(quantity, pid.len())?;
            tracker.extract_column(quantity, &full, &indices)
        };
        out.push((quantity, column));
    }

    Ok(ParticleData::from_columns(out))
}

/// Blocks holding tracked identities from the index, read as planned groups.
///
/// Particles come back in storage order.
pub(crate) fn index_accelerated(
    ctx: &QueryContext<'_>,
    tracker: &ParticleTracker,
    iteration: u64,
    var_list: &[Quantity],
) -> Result<ParticleData> {
    let species = tracker.species();
    let catalog = ctx.catalog(IndexFamily::RTree)?;

    let start = Instant::now();
    let candidates = BlockCatalog::new(catalog, IndexFamily::RTree).tracked_blocks(
        iteration,
        species,
        tracker.selected(),
    )?;
    if candidates.is_empty() {
        return Ok(ParticleData::empty(var_list));
    }
    for block in candidates.values() {
        block.validate()?;
    }

    let blocks = sort_blocks(candidates);
    let strategy = ctx.config.planner().plan(&blocks);
    let chunks = chunk_ranges(&strategy, &blocks);
    log::debug!(
        "tracking {} ids: {} blocks in {} reads, planned in {:.2?}",
        tracker.len(),
        blocks.len(),
        chunks.len(),
        start.elapsed()
    );

    let id_column = ctx
        .reader
        .read_species_data(iteration, species, Quantity::Id, Some(&chunks), false)?;
    let ids = identity_column(&id_column, species)?;
    let mask = tracked_row_mask(&blocks, &strategy, &ids)?;

    let mut out = Vec::with_capacity(var_list.len());
    for &quantity in var_list {
        let column = if quantity.is_identity() {
            id_column.filter(&mask)
        } else {
            ctx.reader
                .read_species_data(iteration, species, quantity, Some(&chunks), false)?
                .filter(&mask)
        };
        out.push((quantity, column));
    }

    Ok(ParticleData::from_columns(out))
}
