use std::time::Instant;

use crate::core::{
    catalog::{BlockCatalog, IndexFamily, IndexKey, RowSpan, intersect_sorted, total_rows},
    column::Column,
    error::{QueryError, Result},
    filter::{particle_mask, reduce_column},
    planner::{
        ReadLayout,
        batch::{log_memory_usage, partition_batches},
        intersect::intersect_candidates,
        selection::SelectionMask,
    },
    predicate::Envelope,
    quantity::{Quantity, QuantityMap},
    query::{ParticleData, ParticleQuery, QueryContext, QueryStrategy},
    reader::normalize::DeferredTransform,
};

/// Read every column in full and filter.
pub struct FullScan;

/// Candidate blocks from an index, read with a configurable layout.
pub struct IndexedRead {
    pub family: IndexFamily,
    pub layout: ReadLayout,
}

/// Exact row offsets per metadata block from a bitmap index.
pub struct BitmapRead;

/// Sequential batches of metadata blocks under a memory budget.
pub struct MemoryBoundedRead;

impl QueryStrategy for FullScan {
    fn name(&self) -> &'static str {
        "full scan"
    }

    fn execute(&self, ctx: &QueryContext<'_>, query: &ParticleQuery, envelope: &Envelope) -> Result<ParticleData> {
        read_and_reduce(ctx, query, envelope, None, None)
    }
}

impl QueryStrategy for IndexedRead {
    fn name(&self) -> &'static str {
        match self.family {
            IndexFamily::RTree => "rtree index",
            _ => "minmax index",
        }
    }

    fn execute(&self, ctx: &QueryContext<'_>, query: &ParticleQuery, envelope: &Envelope) -> Result<ParticleData> {
        let catalog = ctx.catalog(self.family)?;
        let lookup = BlockCatalog::new(catalog, self.family);
        let factor = ctx.momentum_to_index(&query.species, envelope)?;

        let sets = lookup.candidate_sets(query.iteration, &query.species, envelope, factor)?;
        let use_secondary = ctx.config.use_secondary() && lookup.has_secondary();
        let candidates = intersect_candidates(sets, use_secondary, ctx.config.limit_block_num)?;

        if candidates.is_empty() {
            log::debug!("no block matches the envelope");
            return Ok(ParticleData::empty(&query.var_list));
        }

        let plan = self.layout.plan(candidates, &ctx.config.planner(), use_secondary)?;
        read_and_reduce(ctx, query, envelope, Some(&plan.chunks), plan.mask.as_ref())
    }
}

impl QueryStrategy for BitmapRead {
    fn name(&self) -> &'static str {
        "bitmap index"
    }

    fn execute(&self, ctx: &QueryContext<'_>, query: &ParticleQuery, envelope: &Envelope) -> Result<ParticleData> {
        let catalog = ctx.catalog(IndexFamily::Bitmap)?;
        let table = ctx.config.block_meta()?;
        let rows = table.for_iteration(query.iteration);
        let factor = ctx.momentum_to_index(&query.species, envelope)?;

        let start = Instant::now();
        let mut parts = Vec::new();

        for (block_index, row) in rows.iter().enumerate() {
            if row.block_count == 0 {
                continue;
            }

            let mut offsets: Option<Vec<u64>> = None;
            for (quantity, bound) in envelope.iter() {
                let key = IndexKey::for_quantity(query.iteration, &query.species, quantity);
                let bound = BlockCatalog::index_bound(quantity, bound, factor);

                let mut found = catalog.lookup_block_rows(
                    &key,
                    block_index,
                    row,
                    bound.lower_or_neg_inf(),
                    bound.upper_or_inf(),
                )?;
                found.sort_unstable();
                found.dedup();

                let merged = match offsets.take() {
                    None => found,
                    Some(previous) => intersect_sorted(&previous, &found),
                };
                let done = merged.is_empty();
                offsets = Some(merged);
                if done {
                    break;
                }
            }

            let Some(offsets) = offsets.filter(|o| !o.is_empty()) else {
                continue;
            };

            let mut mask = SelectionMask::none(row.block_count as usize);
            for offset in offsets {
                if offset >= row.block_count {
                    return Err(QueryError::InvalidBlock {
                        block_id: row.block_start,
                        reason: format!("bitmap offset {} outside {} rows", offset, row.block_count),
                    });
                }
                mask.set(offset as usize);
            }

            log::trace!(
                "bitmap block {} at {}: {}/{} rows",
                block_index,
                row.block_start,
                mask.count_selected(),
                row.block_count
            );

            parts.push(read_and_reduce(ctx, query, envelope, Some(&[row.span()]), Some(&mask))?);
        }

        log::debug!(
            "bitmap path: {} of {} blocks read in {:.2?}",
            parts.len(),
            rows.len(),
            start.elapsed()
        );

        Ok(ParticleData::concat(&query.var_list, parts))
    }
}

impl QueryStrategy for MemoryBoundedRead {
    fn name(&self) -> &'static str {
        "memory-bounded scan"
    }

    fn execute(&self, ctx: &QueryContext<'_>, query: &ParticleQuery, envelope: &Envelope) -> Result<ParticleData> {
        let budget = ctx.config.memory_budget()?;
        let table = ctx.config.block_meta()?;
        let rows = table.for_iteration(query.iteration);
        let batches = partition_batches(&rows, budget.max_rows());

        log::debug!(
            "{} blocks in {} batches of at most {} rows",
            rows.len(),
            batches.len(),
            budget.max_rows()
        );

        let mut parts = Vec::with_capacity(batches.len());
        for (i, batch) in batches.iter().enumerate() {
            let start = Instant::now();
            let part = read_and_reduce(ctx, query, envelope, Some(batch), None)?;
            log::trace!(
                "batch {}: {} rows -> {} particles in {:.2?}",
                i,
                total_rows(batch),
                part.len(),
                start.elapsed()
            );
            log_memory_usage(&format!("after batch {}", i));
            parts.push(part);
        }

        Ok(ParticleData::concat(&query.var_list, parts))
    }
}

fn retrieve(
    ctx: &QueryContext<'_>,
    query: &ParticleQuery,
    quantity: Quantity,
    chunks: Option<&[RowSpan]>,
    structural: Option<&SelectionMask>,
) -> Result<(Column, Option<DeferredTransform>)> {
    let skip_offset = ctx.config.skip_offset();
    let mut column = ctx
        .reader
        .read_species_data(query.iteration, &query.species, quantity, chunks, skip_offset)?;

    let mut transform = if skip_offset {
        ctx.reader
            .deferred_transform(query.iteration, &query.species, quantity, chunks)?
    } else {
        None
    };

    if let Some(mask) = structural {
        column.expect_len(quantity, mask.len())?;
        column = column.filter(mask);
        transform = transform.map(|t| t.filtered(mask));
    }

    Ok((column, transform))
}

/// Reads the constrained columns over `chunks`, drops the rows outside
/// `structural`, filters on the envelope, then returns the requested columns
/// reduced to the surviving rows.
///
/// Constrained columns are reused as outputs; other outputs are read after
/// the mask is known.
pub(crate) fn read_and_reduce(
    ctx: &QueryContext<'_>,
    query: &ParticleQuery,
    envelope: &Envelope,
    chunks: Option<&[RowSpan]>,
    structural: Option<&SelectionMask>,
) -> Result<ParticleData> {
    if chunks.is_some_and(|c| total_rows(c) == 0) {
        return Ok(ParticleData::empty(&query.var_list));
    }

    let mut columns: QuantityMap<Column> = QuantityMap::new();
    let mut transforms: QuantityMap<DeferredTransform> = QuantityMap::new();
    let mut rows: Option<usize> = None;

    for (quantity, bound) in envelope.iter() {
        if bound.is_unbounded() {
            continue;
        }

        let (column, transform) = retrieve(ctx, query, quantity, chunks, structural)?;
        match rows {
            Some(expected) => column.expect_len(quantity, expected)?,
            None => rows = Some(column.len()),
        }

        columns.insert(quantity, column);
        if let Some(t) = transform {
            transforms.insert(quantity, t);
        }
    }

    let mask = match rows {
        Some(0) => return Ok(ParticleData::empty(&query.var_list)),
        Some(rows) => Some(particle_mask(envelope, &columns, &transforms, rows)?),
        None => None,
    };

    let mut out = Vec::with_capacity(query.var_list.len());
    for &quantity in &query.var_list {
        let (column, transform) = match columns.remove(quantity) {
            Some(column) => (column, transforms.remove(quantity)),
            None => retrieve(ctx, query, quantity, chunks, structural)?,
        };

        let all;
        let keep = match &mask {
            Some(mask) => {
                column.expect_len(quantity, mask.len())?;
                mask
            }
            None => {
                all = SelectionMask::all(column.len());
                &all
            }
        };
        out.push((quantity, reduce_column(&column, keep, transform.as_ref())));
    }

    Ok(ParticleData::from_columns(out))
}
