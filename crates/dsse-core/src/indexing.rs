//! Canonical node ordering and lossless reindexing.
//!
//! Two operations move data between id orderings, and they are deliberately
//! different:
//!
//! - **Strict lookup** ([`CanonicalIndex::get_indices`], [`reindex`]): every id
//!   must exist in the ids it is looked up against, otherwise
//!   [`DsseError::IdLookup`] is raised. This feeds the estimator; a dropped or
//!   zero-filled id would shift measurements onto the wrong node.
//! - **Aggregation** ([`agg_to_ids`]): sums contributor values per node and
//!   zero-fills nodes the contributor does not mention. This is only used to
//!   combine per-equipment injections into per-node totals.

use num_complex::Complex64;
use std::collections::HashMap;
use tracing::debug;

use crate::error::{DsseError, DsseResult};
use crate::measurement::{LabelledArray, MeasurementArray};
use crate::NodeId;

/// Fixed node ordering with an inverse map for O(1) position lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalIndex {
    ids: Vec<NodeId>,
    positions: HashMap<NodeId, usize>,
}

impl CanonicalIndex {
    /// Build the index; ids must be unique.
    pub fn new(ids: Vec<NodeId>) -> DsseResult<Self> {
        let mut positions = HashMap::with_capacity(ids.len());
        for (i, id) in ids.iter().enumerate() {
            if positions.insert(id.clone(), i).is_some() {
                return Err(DsseError::Validation(format!(
                    "duplicate canonical id {id}"
                )));
            }
        }
        Ok(Self { ids, positions })
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[NodeId] {
        &self.ids
    }

    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// Position of `id` in canonical order.
    pub fn position(&self, id: &str) -> DsseResult<usize> {
        self.positions
            .get(id)
            .copied()
            .ok_or_else(|| DsseError::id_lookup(id, "topology ids"))
    }

    /// Canonical position of every id in `measurement`, in measurement order.
    pub fn get_indices(&self, measurement: &MeasurementArray) -> DsseResult<Vec<usize>> {
        measurement
            .ids
            .iter()
            .map(|id| self.position(id.as_str()))
            .collect()
    }
}

/// Permute `array` so its ids equal `target`.
///
/// Every target id must be present in `array`; ids of `array` that `target`
/// does not name are left out. Optional parallel fields are permuted along
/// with `values`. Reindexing to any order and back is the identity.
pub fn reindex(array: &MeasurementArray, target: &[NodeId]) -> DsseResult<MeasurementArray> {
    let inverse: HashMap<&str, usize> = array
        .ids
        .iter()
        .enumerate()
        .map(|(i, id)| (id.as_str(), i))
        .collect();

    let order = target
        .iter()
        .map(|id| {
            inverse
                .get(id.as_str())
                .copied()
                .ok_or_else(|| DsseError::id_lookup(id, "measurement ids"))
        })
        .collect::<DsseResult<Vec<usize>>>()?;

    fn pick<T: Clone>(source: &[T], order: &[usize]) -> Vec<T> {
        order.iter().map(|&i| source[i].clone()).collect()
    }

    Ok(MeasurementArray {
        values: pick(&array.values, &order),
        ids: target.to_vec(),
        units: array.units.clone(),
        equipment_type: array.equipment_type.as_ref().map(|v| pick(v, &order)),
        accuracy: array.accuracy.as_ref().map(|v| pick(v, &order)),
        bad_data_threshold: array.bad_data_threshold.as_ref().map(|v| pick(v, &order)),
        time: array.time,
    })
}

/// Sum `contributor` values per canonical node, zero-filling nodes it does
/// not mention.
///
/// Contributor ids outside the canonical index are dropped (logged at debug).
pub fn agg_to_ids(contributor: &LabelledArray<Complex64>, index: &CanonicalIndex) -> Vec<Complex64> {
    let mut totals = vec![Complex64::new(0.0, 0.0); index.len()];
    for (id, value) in contributor.iter() {
        match index.positions.get(id.as_str()) {
            Some(&i) => totals[i] += value,
            None => debug!(%id, "dropping contribution for id outside canonical index"),
        }
    }
    totals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_ids;

    fn index() -> CanonicalIndex {
        CanonicalIndex::new(node_ids(["n1", "n2", "n3"])).unwrap()
    }

    #[test]
    fn get_indices_maps_to_canonical_positions() {
        let m = MeasurementArray::new(vec![1.0, 2.0], node_ids(["n3", "n1"]), "V");
        assert_eq!(index().get_indices(&m).unwrap(), vec![2, 0]);
    }

    #[test]
    fn get_indices_fails_on_unknown_id() {
        let m = MeasurementArray::new(vec![1.0, 2.0], node_ids(["n3", "ghost"]), "V");
        match index().get_indices(&m) {
            Err(DsseError::IdLookup { id, .. }) => assert_eq!(id.as_str(), "ghost"),
            other => panic!("expected IdLookup, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_canonical_ids_rejected() {
        assert!(CanonicalIndex::new(node_ids(["a", "a"])).is_err());
    }

    #[test]
    fn reindex_subset_and_permute() {
        let mut m = MeasurementArray::new(vec![1.0, 2.0, 3.0], node_ids(["n1", "n2", "n3"]), "V");
        m.accuracy = Some(vec![0.1, 0.2, 0.3]);
        let sub = reindex(&m, &node_ids(["n3", "n1"])).unwrap();
        assert_eq!(sub.values, vec![3.0, 1.0]);
        assert_eq!(sub.accuracy, Some(vec![0.3, 0.1]));
        assert_eq!(sub.units, "V");
    }

    #[test]
    fn reindex_fails_when_target_missing() {
        let m = MeasurementArray::new(vec![1.0], node_ids(["n1"]), "V");
        assert!(matches!(
            reindex(&m, &node_ids(["n2"])),
            Err(DsseError::IdLookup { .. })
        ));
    }

    #[test]
    fn aggregation_sums_and_zero_fills() {
        let loads = LabelledArray::new(
            node_ids(["n1", "n1", "n3", "elsewhere"]),
            vec![
                Complex64::new(1.0, 0.5),
                Complex64::new(2.0, 0.5),
                Complex64::new(4.0, 0.0),
                Complex64::new(100.0, 0.0),
            ],
        )
        .unwrap();
        let totals = agg_to_ids(&loads, &index());
        assert_eq!(totals[0], Complex64::new(3.0, 1.0));
        assert_eq!(totals[1], Complex64::new(0.0, 0.0));
        assert_eq!(totals[2], Complex64::new(4.0, 0.0));
    }

    #[test]
    fn aggregation_of_empty_contributor_is_zero() {
        let totals = agg_to_ids(&LabelledArray::empty(), &index());
        assert!(totals.iter().all(|c| c.norm() == 0.0));
    }
}
