//! # dsse-core: Measurement and Topology Model for Distribution State Estimation
//!
//! Provides the data structures exchanged between federates and the indexing
//! rules every numeric routine relies on.
//!
//! ## Design Philosophy
//!
//! Every array in the system is keyed by a [`NodeId`] (a bus-phase terminal such
//! as `"BUS1.1"`). Arrays arrive in arbitrary device order; the topology's
//! admittance ids fix the **canonical order** and all solver vectors are laid out
//! in it. Moving between orders is always done through strict lookup, so an
//! unknown id fails loudly instead of silently shifting values onto the wrong
//! node.
//!
//! ## Quick Start
//!
//! ```rust
//! use dsse_core::*;
//!
//! let topology_ids: Vec<NodeId> = vec!["A.1".into(), "A.2".into(), "B.1".into()];
//! let index = CanonicalIndex::new(topology_ids.clone()).unwrap();
//!
//! let v = VoltagesMagnitude::new(vec![7.2, 7.1], vec!["B.1".into(), "A.1".into()]);
//! assert_eq!(index.get_indices(&v).unwrap(), vec![2, 0]);
//!
//! let reordered = reindex(&v, &["A.1".into(), "B.1".into()]).unwrap();
//! assert_eq!(reordered.values, vec![7.1, 7.2]);
//! ```
//!
//! ## Modules
//!
//! - [`measurement`] - `MeasurementArray` and its typed channel variants
//! - [`topology`] - admittance (dense or sparse), base voltages, slack buses
//! - [`indexing`] - canonical index, strict reindexing and zero-filling aggregation
//! - [`units`] - unit systems, algorithm parameters and per-unit bases
//! - [`solver`] - dense linear-system backends used by the estimator

use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

pub mod error;
pub mod indexing;
pub mod measurement;
pub mod solver;
pub mod topology;
pub mod units;

pub use error::{DsseError, DsseResult, ImbalancedNode};
pub use indexing::{agg_to_ids, reindex, CanonicalIndex};
pub use measurement::{
    Injection, LabelledArray, MeasurementArray, PowersImaginary, PowersReal, VoltagesAngle,
    VoltagesImaginary, VoltagesMagnitude, VoltagesReal,
};
pub use num_complex::Complex64;
pub use solver::*;
pub use topology::{Admittance, AdmittanceMatrix, AdmittanceSparse, Topology};
pub use units::{AlgorithmParameters, PerUnitBase, UnitSystem, DEFAULT_BASE_POWER};

/// Identifier of a bus-phase terminal, unique within a topology snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    #[inline]
    pub fn new(value: impl Into<String>) -> Self {
        NodeId(value.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId(value.to_string())
    }
}

impl From<String> for NodeId {
    fn from(value: String) -> Self {
        NodeId(value)
    }
}

impl From<&NodeId> for NodeId {
    fn from(value: &NodeId) -> Self {
        value.clone()
    }
}

impl Borrow<str> for NodeId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for NodeId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Convenience constructor for id lists in tests and fixtures.
pub fn node_ids<I, S>(ids: I) -> Vec<NodeId>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    ids.into_iter().map(|s| NodeId::new(s)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_serializes_as_plain_string() {
        let id = NodeId::from("P1UDT942-P1UHS0_1247X.1");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"P1UDT942-P1UHS0_1247X.1\"");
        let back: NodeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn node_ids_builds_in_order() {
        let ids = node_ids(["a", "b"]);
        assert_eq!(ids[0].as_str(), "a");
        assert_eq!(ids[1].to_string(), "b");
    }
}
