//! Network topology snapshot published once by the producer.
//!
//! The admittance arrives either as a dense matrix with its own ordered ids or
//! as a sparse edge list. For the dense form the matrix ids are canonical; for
//! the sparse form the ids of `base_voltage_magnitudes` are.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::error::{DsseError, DsseResult};
use crate::indexing::CanonicalIndex;
use crate::measurement::{Injection, MeasurementArray};
use crate::NodeId;

/// Dense admittance with row/column ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmittanceMatrix {
    pub admittance_matrix: Vec<Vec<Complex64>>,
    pub ids: Vec<NodeId>,
}

/// Sparse admittance as parallel `(from, to, value)` lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdmittanceSparse {
    pub from_equipment: Vec<NodeId>,
    pub to_equipment: Vec<NodeId>,
    pub admittance_list: Vec<Complex64>,
}

impl AdmittanceSparse {
    pub fn len(&self) -> usize {
        self.admittance_list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.admittance_list.is_empty()
    }

    /// Resolve every entry to canonical `(row, col, value)` triplets.
    pub fn triplets(&self, index: &CanonicalIndex) -> DsseResult<Vec<(usize, usize, Complex64)>> {
        self.from_equipment
            .iter()
            .zip(&self.to_equipment)
            .zip(&self.admittance_list)
            .map(|((from, to), &y)| Ok((index.position(from.as_str())?, index.position(to.as_str())?, y)))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Admittance {
    Matrix(AdmittanceMatrix),
    Sparse(AdmittanceSparse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub admittance: Admittance,
    pub base_voltage_angles: MeasurementArray,
    pub base_voltage_magnitudes: MeasurementArray,
    pub injections: Injection,
    pub slack_bus: Vec<NodeId>,
}

impl Topology {
    /// Ids in canonical order.
    pub fn ids(&self) -> &[NodeId] {
        match &self.admittance {
            Admittance::Matrix(m) => &m.ids,
            Admittance::Sparse(_) => &self.base_voltage_magnitudes.ids,
        }
    }

    pub fn canonical_index(&self) -> DsseResult<CanonicalIndex> {
        CanonicalIndex::new(self.ids().to_vec())
    }

    /// Canonical position of the first slack bus.
    pub fn slack_index(&self, index: &CanonicalIndex) -> DsseResult<usize> {
        let slack = self
            .slack_bus
            .first()
            .ok_or_else(|| DsseError::Validation("topology has no slack bus".into()))?;
        index.position(slack.as_str())
    }

    /// Check the structural invariants and return the canonical index.
    pub fn validate(&self) -> DsseResult<CanonicalIndex> {
        let index = self.canonical_index()?;
        let n = index.len();
        if n == 0 {
            return Err(DsseError::Validation("topology has no nodes".into()));
        }

        match &self.admittance {
            Admittance::Matrix(m) => {
                if m.admittance_matrix.len() != n {
                    return Err(DsseError::Validation(format!(
                        "admittance matrix has {} rows for {} ids",
                        m.admittance_matrix.len(),
                        n
                    )));
                }
                if let Some((row, r)) = m
                    .admittance_matrix
                    .iter()
                    .enumerate()
                    .find(|(_, r)| r.len() != n)
                {
                    return Err(DsseError::Validation(format!(
                        "admittance row {row} has {} columns, expected {n}",
                        r.len()
                    )));
                }
            }
            Admittance::Sparse(s) => {
                if s.from_equipment.len() != s.len() || s.to_equipment.len() != s.len() {
                    return Err(DsseError::Validation(format!(
                        "sparse admittance lists differ in length ({}, {}, {})",
                        s.from_equipment.len(),
                        s.to_equipment.len(),
                        s.len()
                    )));
                }
                s.triplets(&index)?;
            }
        }

        if self.slack_bus.is_empty() {
            return Err(DsseError::Validation("topology has no slack bus".into()));
        }
        for id in &self.slack_bus {
            index.position(id.as_str())?;
        }

        self.base_voltage_magnitudes.validate()?;
        self.base_voltage_angles.validate()?;
        self.base_voltages(&index)?;
        Ok(index)
    }

    /// Base magnitudes and angles laid out in canonical order.
    pub fn base_voltages(&self, index: &CanonicalIndex) -> DsseResult<(Vec<f64>, Vec<f64>)> {
        let magnitudes = canonical_values(&self.base_voltage_magnitudes, index, "magnitude")?;
        let angles = canonical_values(&self.base_voltage_angles, index, "angle")?;
        if let Some(i) = magnitudes.iter().position(|&v| !(v > 0.0)) {
            return Err(DsseError::Validation(format!(
                "base voltage magnitude at {} is not positive",
                index.ids()[i]
            )));
        }
        Ok((magnitudes, angles))
    }
}

fn canonical_values(
    array: &MeasurementArray,
    index: &CanonicalIndex,
    what: &str,
) -> DsseResult<Vec<f64>> {
    let mut out = vec![None; index.len()];
    for (id, &value) in array.ids.iter().zip(&array.values) {
        let i = index.position(id.as_str())?;
        out[i] = Some(value);
    }
    out.into_iter()
        .zip(index.ids())
        .map(|(v, id)| {
            v.ok_or_else(|| DsseError::Validation(format!("no base voltage {what} for {id}")))
        })
        .collect()
}
