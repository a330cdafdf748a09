//! Physical solver replaying recorded voltage phasors.
//!
//! A case file holds the network and one solved phasor set per recorded
//! instant:
//!
//! ```text
//! { "ids": ["src.1", "n2.1"],
//!   "admittance": [[0, 0, [2.0, -4.0]], [0, 1, [-2.0, 4.0]], ...],   siemens
//!   "base_voltages": [2401.8, 2401.8],
//!   "source_ids": ["src.1"],
//!   "equipment": { "n2.1": "PVSystem" },                              default Load
//!   "steps": [ { "hour": 0, "second": 0, "voltages": [[2401.8, 0.0], ...] } ] }
//! ```
//!
//! Equipment injections are derived from the recorded phasors, so every
//! replayed tick balances by construction. [`PhysicalSolver::advance`] selects
//! the latest recorded instant at or before the requested one.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use dsse_algo::calculated_power;
use dsse_algo::AdmittanceOperator;
use dsse_core::{CanonicalIndex, Complex64, DsseError, DsseResult, LabelledArray, NodeId};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::load_json;
use crate::feeder::physical::{EquipmentClass, PhysicalSolver, SolverAdmittance};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayStep {
    pub hour: u32,
    pub second: u32,
    pub voltages: Vec<Complex64>,
}

impl ReplayStep {
    fn seconds_of_day(&self) -> u32 {
        self.hour * 3600 + self.second
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayCase {
    pub ids: Vec<NodeId>,
    pub admittance: Vec<(usize, usize, Complex64)>,
    pub base_voltages: Vec<f64>,
    pub source_ids: Vec<NodeId>,
    #[serde(default)]
    pub equipment: HashMap<NodeId, EquipmentClass>,
    pub steps: Vec<ReplayStep>,
}

#[derive(Debug, Clone)]
pub struct ReplaySolver {
    case: ReplayCase,
    operator: AdmittanceOperator,
    sources: HashSet<usize>,
    current: usize,
}

impl ReplaySolver {
    pub fn new(mut case: ReplayCase) -> DsseResult<Self> {
        let index = CanonicalIndex::new(case.ids.clone())?;
        let n = index.len();
        if case.base_voltages.len() != n {
            return Err(DsseError::Validation(format!(
                "case has {} base voltages for {n} nodes",
                case.base_voltages.len()
            )));
        }
        if let Some(&(i, j, _)) = case.admittance.iter().find(|e| e.0 >= n || e.1 >= n) {
            return Err(DsseError::Validation(format!(
                "admittance entry ({i}, {j}) outside {n} nodes"
            )));
        }
        if case.steps.is_empty() {
            return Err(DsseError::Validation("case has no recorded steps".into()));
        }
        if let Some(step) = case.steps.iter().find(|s| s.voltages.len() != n) {
            return Err(DsseError::Validation(format!(
                "step at hour {} second {} has {} voltages for {n} nodes",
                step.hour,
                step.second,
                step.voltages.len()
            )));
        }
        for id in case.equipment.keys() {
            index.position(id.as_str())?;
        }
        let sources = case
            .source_ids
            .iter()
            .map(|id| index.position(id.as_str()))
            .collect::<DsseResult<HashSet<_>>>()?;

        case.steps.sort_by_key(ReplayStep::seconds_of_day);
        let operator = SolverAdmittance {
            ids: case.ids.clone(),
            entries: case.admittance.clone(),
        }
        .operator();

        Ok(Self {
            case,
            operator,
            sources,
            current: 0,
        })
    }

    pub fn from_file(path: &Path) -> DsseResult<Self> {
        Self::new(load_json(path)?)
    }

    pub fn case(&self) -> &ReplayCase {
        &self.case
    }

    /// Index of the recorded step currently replayed.
    pub fn current_step(&self) -> usize {
        self.current
    }

    fn class_of(&self, node: usize) -> EquipmentClass {
        self.case
            .equipment
            .get(&self.case.ids[node])
            .copied()
            .unwrap_or(EquipmentClass::Load)
    }
}

impl PhysicalSolver for ReplaySolver {
    fn admittance(&self) -> DsseResult<SolverAdmittance> {
        Ok(SolverAdmittance {
            ids: self.case.ids.clone(),
            entries: self.case.admittance.clone(),
        })
    }

    fn actual_voltages(&self) -> DsseResult<LabelledArray<Complex64>> {
        LabelledArray::new(
            self.case.ids.clone(),
            self.case.steps[self.current].voltages.clone(),
        )
    }

    fn injections(
        &self,
        class: EquipmentClass,
        static_only: bool,
    ) -> DsseResult<LabelledArray<Complex64>> {
        let step = if static_only { 0 } else { self.current };
        let generated = calculated_power(&self.operator, &self.case.steps[step].voltages);

        let (ids, values): (Vec<NodeId>, Vec<Complex64>) = generated
            .iter()
            .enumerate()
            .filter(|&(i, _)| !self.sources.contains(&i) && self.class_of(i) == class)
            .map(|(i, s)| (self.case.ids[i].clone(), -s))
            .unzip();
        LabelledArray::new(ids, values)
    }

    fn base_voltages(&self) -> DsseResult<LabelledArray<f64>> {
        LabelledArray::new(self.case.ids.clone(), self.case.base_voltages.clone())
    }

    fn source_ids(&self) -> Vec<NodeId> {
        self.case.source_ids.clone()
    }

    fn advance(&mut self, hour: u32, second: u32) -> DsseResult<()> {
        let target = hour * 3600 + second;
        self.current = self
            .case
            .steps
            .iter()
            .rposition(|s| s.seconds_of_day() <= target)
            .unwrap_or(0);
        debug!(hour, second, step = self.current, "replaying recorded step");
        Ok(())
    }
}
