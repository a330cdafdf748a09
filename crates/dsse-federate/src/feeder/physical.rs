//! Contract of the physical solver behind the feeder federate.

use std::fmt;

use dsse_algo::wls::SparseAdmittance;
use dsse_algo::AdmittanceOperator;
use dsse_core::{
    Admittance, AdmittanceMatrix, AdmittanceSparse, CanonicalIndex, Complex64, DsseResult,
    LabelledArray, NodeId,
};
use serde::{Deserialize, Serialize};

/// Equipment whose injections are declared per node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipmentClass {
    Load,
    #[serde(rename = "PVSystem")]
    PvSystem,
    Generator,
    Capacitor,
}

impl EquipmentClass {
    /// Publication order of the injections channel.
    pub const ALL: [EquipmentClass; 4] = [
        EquipmentClass::Load,
        EquipmentClass::PvSystem,
        EquipmentClass::Generator,
        EquipmentClass::Capacitor,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EquipmentClass::Load => "Load",
            EquipmentClass::PvSystem => "PVSystem",
            EquipmentClass::Generator => "Generator",
            EquipmentClass::Capacitor => "Capacitor",
        }
    }
}

impl fmt::Display for EquipmentClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Bus admittance matrix in siemens over the solver's canonical ids.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverAdmittance {
    pub ids: Vec<NodeId>,
    /// `(row, column, value)`, duplicates summed
    pub entries: Vec<(usize, usize, Complex64)>,
}

impl SolverAdmittance {
    pub fn index(&self) -> DsseResult<CanonicalIndex> {
        CanonicalIndex::new(self.ids.clone())
    }

    pub fn operator(&self) -> AdmittanceOperator {
        AdmittanceOperator::Sparse(SparseAdmittance::from_triplets(self.ids.len(), &self.entries))
    }

    pub fn to_dense(&self) -> Vec<Vec<Complex64>> {
        let n = self.ids.len();
        let mut dense = vec![vec![Complex64::new(0.0, 0.0); n]; n];
        for &(i, j, y) in &self.entries {
            dense[i][j] += y;
        }
        dense
    }

    /// Topology representation: an edge list when `sparse`, else a dense matrix.
    pub fn to_topology(&self, sparse: bool) -> Admittance {
        if sparse {
            Admittance::Sparse(AdmittanceSparse {
                from_equipment: self.entries.iter().map(|e| self.ids[e.0].clone()).collect(),
                to_equipment: self.entries.iter().map(|e| self.ids[e.1].clone()).collect(),
                admittance_list: self.entries.iter().map(|e| e.2).collect(),
            })
        } else {
            Admittance::Matrix(AdmittanceMatrix {
                admittance_matrix: self.to_dense(),
                ids: self.ids.clone(),
            })
        }
    }
}

/// Physical network simulator driven by the feeder federate.
///
/// Powers are kVA, consumption-positive; voltages are volts. Queries reflect
/// the state after the most recent [`PhysicalSolver::advance`].
pub trait PhysicalSolver {
    fn admittance(&self) -> DsseResult<SolverAdmittance>;

    /// Solved node phasors.
    fn actual_voltages(&self) -> DsseResult<LabelledArray<Complex64>>;

    /// Per-equipment injections of `class`, labelled by terminal id.
    /// `static_only` reports nominal rather than time-varying values.
    fn injections(
        &self,
        class: EquipmentClass,
        static_only: bool,
    ) -> DsseResult<LabelledArray<Complex64>>;

    /// Base voltage magnitudes per node.
    fn base_voltages(&self) -> DsseResult<LabelledArray<f64>>;

    /// Source (slack) terminals.
    fn source_ids(&self) -> Vec<NodeId>;

    /// Solve the network at `hour` and `second` within the hour.
    fn advance(&mut self, hour: u32, second: u32) -> DsseResult<()>;
}
