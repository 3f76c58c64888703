mod common;

use std::sync::Arc;

use common::*;
use particle_query_core::{
    configuration::{BlockMetaSource, Configuration, ReadMode},
    core::{
        catalog::{IndexFamily, memory::InMemoryCatalog, memory::uniform_blocks},
        error::QueryError,
        planner::ReadLayout,
        predicate::{Bound, Envelope},
        quantity::Quantity,
        query::{ParticleData, ParticleQuery, ParticleQueryEngine},
        reader::{
            ColumnReader,
            memory::{InMemoryDataset, ParticleSnapshot},
        },
    },
};

const OUTPUTS: [Quantity; 5] = [Quantity::X, Quantity::Ux, Quantity::Z, Quantity::W, Quantity::Id];

fn envelope() -> Envelope {
    Envelope::new()
        .with(Quantity::X, Bound::between(2.0, 4.5))
        .with(Quantity::Ux, Bound::between(-0.5, 1.0))
        .with(Quantity::W, Bound::above(0.1))
}

fn query() -> ParticleQuery {
    ParticleQuery::new(FIRST, SPECIES, &OUTPUTS).with_select(envelope())
}

fn run(config: Configuration, slice_len: Option<u64>) -> Result<ParticleData, QueryError> {
    init_logging();
    let ds = dataset();
    let catalog = catalog(&ds, slice_len);
    let meta = block_meta(&ds);

    let config = Configuration {
        block_meta: Some(BlockMetaSource::Table(Arc::new(meta))),
        ..config
    };

    ParticleQueryEngine::new(Arc::new(ds), config)
        .with_catalog(Arc::new(catalog))
        .get_particle(&query())
}

fn full_scan() -> ParticleData {
    run(
        Configuration {
            read_mode: Some(ReadMode::FullScan),
            ..Default::default()
        },
        None,
    )
    .unwrap()
}

#[test]
fn full_scan_matches_manual_filter() {
    let ds = dataset();
    let x = ds.read_species_data(FIRST, SPECIES, Quantity::X, None, false).unwrap();
    let ux = ds.read_species_data(FIRST, SPECIES, Quantity::Ux, None, false).unwrap();
    let w = ds.read_species_data(FIRST, SPECIES, Quantity::W, None, false).unwrap();
    let ids = ds.read_species_data(FIRST, SPECIES, Quantity::Id, None, false).unwrap();

    let (x, ux, w, ids) = (x.as_f64().unwrap(), ux.as_f64().unwrap(), w.as_f64().unwrap(), ids.as_u64().unwrap());
    let expected: Vec<u64> = (0..ids.len())
        .filter(|&i| x[i] > 2.0 && x[i] < 4.5 && ux[i] > -0.5 && ux[i] < 1.0 && w[i] > 0.1)
        .map(|i| ids[i])
        .collect();

    let data = full_scan();
    assert!(!expected.is_empty());
    assert_eq!(u64s(data.get(Quantity::Id)), expected);
    assert_eq!(data.quantities().collect::<Vec<_>>(), OUTPUTS.to_vec());

    for v in f64s(data.get(Quantity::X)) {
        assert!(v > 2.0 && v < 4.5);
    }
}

#[test]
fn indexed_layouts_match_full_scan() {
    let reference = full_scan();

    for family in [IndexFamily::MinMax, IndexFamily::RTree] {
        for (layout, slice_len) in [
            (ReadLayout::Grouped, None),
            (ReadLayout::DirectBlock, None),
            (ReadLayout::Grouped, Some(25)),
            (ReadLayout::DirectBlock, Some(25)),
            (ReadLayout::SliceRead, Some(25)),
        ] {
            let data = run(
                Configuration {
                    read_mode: Some(ReadMode::Indexed),
                    index_family: Some(family),
                    read_layout: Some(layout),
                    use_secondary: Some(slice_len.is_some()),
                    ..Default::default()
                },
                slice_len,
            )
            .unwrap();

            assert_eq!(data, reference, "{:?} with {:?} slices={:?}", family, layout, slice_len);
        }
    }
}

#[test]
fn skip_offset_matches_eager_normalization() {
    for mode in [ReadMode::FullScan, ReadMode::Indexed, ReadMode::MemoryBounded] {
        let base = Configuration {
            read_mode: Some(mode),
            read_layout: Some(ReadLayout::Grouped),
            limit_memory_usage: Some("16KB".to_string()),
            ..Default::default()
        };

        let eager = run(base.clone(), None).unwrap();
        let lazy = run(
            Configuration {
                skip_offset: Some(true),
                ..base
            },
            None,
        )
        .unwrap();

        assert_eq!(eager, lazy, "{:?}", mode);
    }
}

#[test]
fn bitmap_matches_full_scan() {
    let data = run(
        Configuration {
            read_mode: Some(ReadMode::Bitmap),
            ..Default::default()
        },
        None,
    )
    .unwrap();
    assert_eq!(data, full_scan());
}

#[test]
fn memory_bounded_matches_full_scan() {
    for (limit, factor) in [("8KB", 4.0), ("1MB", 1.0), ("100", 1.0)] {
        let data = run(
            Configuration {
                read_mode: Some(ReadMode::MemoryBounded),
                limit_memory_usage: Some(limit.to_string()),
                memory_usage_factor: Some(factor),
                ..Default::default()
            },
            None,
        )
        .unwrap();
        assert_eq!(data, full_scan(), "limit {}", limit);
    }
}

#[test]
fn empty_selection_is_not_an_error() {
    init_logging();
    let ds = dataset();
    let catalog = catalog(&ds, None);
    let engine = ParticleQueryEngine::new(Arc::new(ds), Configuration::default()).with_catalog(Arc::new(catalog));

    let query = ParticleQuery::new(FIRST, SPECIES, &OUTPUTS)
        .with_select(Envelope::new().with(Quantity::X, Bound::above(1_000.0)));
    let data = engine.get_particle(&query).unwrap();

    assert!(data.is_empty());
    assert_eq!(data.quantities().count(), OUTPUTS.len());
    assert!(data.columns().all(|c| c.is_empty()));
}

#[test]
fn no_envelope_reads_everything() {
    init_logging();
    let engine = ParticleQueryEngine::new(Arc::new(dataset()), Configuration::default());
    let data = engine
        .get_particle(&ParticleQuery::from_names(LATER, SPECIES, &["id", "uz"]).unwrap())
        .unwrap();
    assert_eq!(data.len(), (ROWS - ROWS / 7) as usize);
}

#[test]
fn too_many_blocks_fails_before_reading() {
    init_logging();
    let rows = 501u64;
    let snapshot = ParticleSnapshot::new()
        .with_values(Quantity::X, (0..rows).map(|i| i as f64).collect())
        .with_identities((0..rows).collect());
    let ds = InMemoryDataset::new().with_snapshot(1, SPECIES, snapshot);

    let mut catalog = InMemoryCatalog::new();
    catalog
        .index_snapshot(&ds, 1, SPECIES, &uniform_blocks(rows, 1), None)
        .unwrap();

    let reader = Arc::new(CountingReader::new(ds));
    let engine = ParticleQueryEngine::new(
        reader.clone(),
        Configuration {
            limit_block_num: Some(500),
            ..Default::default()
        },
    )
    .with_catalog(Arc::new(catalog));

    let query = ParticleQuery::new(1, SPECIES, &[Quantity::X])
        .with_select(Envelope::new().with(Quantity::X, Bound::between(-1.0, 1e9)));

    let err = engine.get_particle(&query).unwrap_err();
    assert!(matches!(err, QueryError::TooManyBlocks { count: 501, limit: 500 }));
    assert_eq!(reader.reads(), 0);

    // Open bounds constrain nothing, so the index is never consulted.
    let open = ParticleQuery::new(1, SPECIES, &[Quantity::X])
        .with_select(Envelope::new().with(Quantity::X, Bound::new(Some(f64::NEG_INFINITY), None)));
    assert_eq!(engine.get_particle(&open).unwrap().len(), rows as usize);
}

#[test]
fn index_modes_without_catalog_scan_in_full() {
    init_logging();
    let expected = full_scan();
    assert!(!expected.is_empty());

    for read_mode in [ReadMode::Indexed, ReadMode::Bitmap] {
        let engine = ParticleQueryEngine::new(
            Arc::new(dataset()),
            Configuration {
                read_mode: Some(read_mode),
                ..Default::default()
            },
        );
        assert_eq!(engine.get_particle(&query()).unwrap(), expected);
    }

    let ds = dataset();
    let catalog = catalog(&ds, None).with_families(&[IndexFamily::MinMax]);
    let engine = ParticleQueryEngine::new(
        Arc::new(ds),
        Configuration {
            index_family: Some(IndexFamily::RTree),
            ..Default::default()
        },
    )
    .with_catalog(Arc::new(catalog));
    assert!(matches!(
        engine.get_particle(&query()),
        Err(QueryError::IndexUnavailable(IndexFamily::RTree))
    ));
}

#[test]
fn malformed_queries_are_rejected() {
    init_logging();
    let engine = ParticleQueryEngine::new(Arc::new(dataset()), Configuration::default());

    let on_id = ParticleQuery::new(FIRST, SPECIES, &[Quantity::X])
        .with_select(Envelope::new().with(Quantity::Id, Bound::below(10.0)));
    assert!(matches!(engine.get_particle(&on_id), Err(QueryError::MalformedPredicate(_))));

    assert!(matches!(
        ParticleQuery::from_names(FIRST, SPECIES, &["x", "vx"]),
        Err(QueryError::MalformedPredicate(_))
    ));

    let slices_without_secondary = run(
        Configuration {
            read_layout: Some(ReadLayout::SliceRead),
            ..Default::default()
        },
        None,
    );
    assert!(matches!(slices_without_secondary, Err(QueryError::MalformedPredicate(_))));

    let unknown = ParticleQuery::new(FIRST, "muons", &[Quantity::X]);
    assert!(matches!(engine.get_particle(&unknown), Err(QueryError::UnknownSpecies(_))));
}

#[test]
fn momentum_bounds_need_a_known_mass() {
    init_logging();
    let ds = dataset();
    let snapshot = ds.snapshot(FIRST, SPECIES).unwrap().clone();
    let ds = ds.with_snapshot(FIRST, "positrons", snapshot);

    let mut catalog = catalog(&ds, None);
    catalog
        .index_snapshot(&ds, FIRST, "positrons", &uniform_blocks(ROWS, BLOCK_LEN), None)
        .unwrap();

    let query = ParticleQuery::new(FIRST, "positrons", &[Quantity::Id]).with_select(envelope());
    let engine = ParticleQueryEngine::new(Arc::new(ds), Configuration::default()).with_catalog(Arc::new(catalog));
    assert!(matches!(engine.get_particle(&query), Err(QueryError::UnknownSpecies(_))));
}
