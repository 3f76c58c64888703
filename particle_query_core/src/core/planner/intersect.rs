use std::time::Instant;

use crate::core::{
    catalog::CandidateSet,
    error::{QueryError, Result},
};

/// Intersect per-quantity candidate sets by folding them onto the first one.
///
/// - Blocks of the first set missing from any other set are dropped.
/// - With `use_secondary`, sub-slices of each surviving block are narrowed to
///   the keys shared by every set that defines sub-slices for that block.
/// - An empty result is returned as-is; otherwise more than `limit_block_num`
///   surviving blocks fails before any read happens.
pub fn intersect_candidates(
    sets: Vec<CandidateSet>,
    use_secondary: bool,
    limit_block_num: Option<usize>,
) -> Result<CandidateSet> {
    let start = Instant::now();

    let mut it = sets.into_iter();
    let Some(mut base) = it.next() else {
        return Err(QueryError::MalformedPredicate(
            "at least one constrained quantity is required for an index lookup".to_string(),
        ));
    };
    let others: Vec<CandidateSet> = it.collect();

    let before = base.len();
    base.retain(|block_id, _| others.iter().all(|other| other.contains_key(block_id)));

    if use_secondary {
        for (block_id, block) in base.iter_mut() {
            let mut slices = block.sub_slices.take();

            for other in &others {
                let Some(other_slices) = other.get(block_id).and_then(|b| b.sub_slices.as_ref()) else {
                    continue;
                };
                match slices.as_mut() {
                    None => slices = Some(other_slices.clone()),
                    Some(slices) => slices.retain(|key, _| other_slices.contains_key(key)),
                }
            }

            block.sub_slices = slices;
        }
    }

    log::debug!(
        "intersected {} candidate sets: {} -> {} blocks in {:.2?}",
        others.len() + 1,
        before,
        base.len(),
        start.elapsed()
    );

    if base.is_empty() {
        return Ok(base);
    }

    if let Some(limit) = limit_block_num {
        if base.len() > limit {
            return Err(QueryError::TooManyBlocks {
                count: base.len(),
                limit,
            });
        }
    }

    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::catalog::{BlockDescriptor, RowSpan};

    fn set(ids: &[u64]) -> CandidateSet {
        ids.iter()
            .map(|&id| (id, BlockDescriptor::new(id, id * 10, id * 10 + 10)))
            .collect()
    }

    fn sliced(id: u64, keys: &[u64]) -> (u64, BlockDescriptor) {
        let block = BlockDescriptor::new(id, id * 10, id * 10 + 10)
            .with_sub_slices(keys.iter().map(|&k| (k, RowSpan::new(id * 10 + k, id * 10 + k + 1))));
        (id, block)
    }

    #[test]
    fn keeps_blocks_common_to_all_sets() {
        let out = intersect_candidates(vec![set(&[1, 2, 3, 4]), set(&[2, 3, 9]), set(&[3, 2])], false, None)
            .unwrap();
        assert_eq!(out.keys().copied().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn surviving_ids_do_not_depend_on_set_order() {
        let a = set(&[1, 2, 5, 7]);
        let b = set(&[2, 5, 8]);
        let c = set(&[0, 2, 5, 7]);

        let abc = intersect_candidates(vec![a.clone(), b.clone(), c.clone()], false, None).unwrap();
        let cba = intersect_candidates(vec![c, b, a], false, None).unwrap();
        assert_eq!(
            abc.keys().collect::<Vec<_>>(),
            cba.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn narrows_sub_slices() {
        let a: CandidateSet = [sliced(1, &[0, 2, 4, 6])].into_iter().collect();
        let b: CandidateSet = [sliced(1, &[2, 3, 4])].into_iter().collect();
        let c = set(&[1]);

        let out = intersect_candidates(vec![a.clone(), b.clone(), c], true, None).unwrap();
        let keys: Vec<u64> = out[&1].sub_slices.as_ref().unwrap().keys().copied().collect();
        assert_eq!(keys, vec![2, 4]);

        let out = intersect_candidates(vec![a, b], false, None).unwrap();
        assert_eq!(out[&1].sub_slices.as_ref().unwrap().len(), 4);
    }

    #[test]
    fn sub_slices_do_not_depend_on_set_order() {
        let plain = set(&[1, 2]);
        let sliced_set: CandidateSet = [sliced(1, &[2, 5]), sliced(2, &[1])].into_iter().collect();
        let narrower: CandidateSet = [sliced(1, &[2, 7]), (2, BlockDescriptor::new(2, 20, 30))]
            .into_iter()
            .collect();

        let reference =
            intersect_candidates(vec![sliced_set.clone(), plain.clone(), narrower.clone()], true, None).unwrap();
        assert_eq!(
            reference[&1].sub_slices.as_ref().unwrap().keys().copied().collect::<Vec<_>>(),
            vec![2]
        );

        for order in [
            vec![plain.clone(), sliced_set.clone(), narrower.clone()],
            vec![plain.clone(), narrower.clone(), sliced_set.clone()],
            vec![narrower.clone(), plain.clone(), sliced_set.clone()],
        ] {
            let out = intersect_candidates(order, true, None).unwrap();
            for id in [1, 2] {
                assert_eq!(out[&id].sub_slices, reference[&id].sub_slices, "block {}", id);
            }
        }
    }

    #[test]
    fn too_many_blocks_is_typed() {
        let ids: Vec<u64> = (0..501).collect();
        let err = intersect_candidates(vec![set(&ids)], false, Some(500)).unwrap_err();
        assert!(matches!(err, QueryError::TooManyBlocks { count: 501, limit: 500 }));

        assert!(intersect_candidates(vec![set(&ids)], false, Some(501)).is_ok());
    }

    #[test]
    fn empty_intersection_is_not_an_error() {
        let out = intersect_candidates(vec![set(&[1]), set(&[2])], false, Some(0)).unwrap();
        assert!(out.is_empty());
    }
}
