//! Feeder federate: the producer of ground truth.
//!
//! Wraps a [`PhysicalSolver`] and, once per tick, publishes what the relays
//! and the estimator consume:
//!
//! | Key | Payload |
//! |-----|---------|
//! | `topology` | [`Topology`], once after entering execution mode |
//! | `voltages_real`, `voltages_imag`, `voltages_magnitude` | node phasors (V) |
//! | `powers_real`, `powers_imag` | net node injections (kW, kVAR, consumption-positive) |
//! | `injections` | per-equipment injections (generation-positive), tagged by class |
//!
//! Before anything is published for a tick, the declared injections are
//! checked against the power implied by the solved voltages; an imbalance
//! stops the federate.

pub mod phases;
pub mod physical;
pub mod replay;

use std::fs;

use chrono::{Duration, NaiveDateTime, Timelike};
use dsse_algo::{
    calculated_power, declared_injections, override_slack, AdmittanceOperator,
    PowerBalanceChecker,
};
use dsse_core::{
    reindex, CanonicalIndex, Complex64, DsseError, DsseResult, Injection, LabelledArray,
    MeasurementArray, PowersImaginary, PowersReal, Topology, VoltagesImaginary,
    VoltagesMagnitude, VoltagesReal,
};
use tracing::{debug, info};

use crate::config::FeederConfig;
use crate::handle::FederateHandle;
use crate::substrate::{SimTime, Substrate};

pub use phases::{snap_to_phase, PHASE_SNAP_TOLERANCE};
pub use physical::{EquipmentClass, PhysicalSolver, SolverAdmittance};
pub use replay::{ReplayCase, ReplaySolver, ReplayStep};

pub const TOPOLOGY_OUTPUT: &str = "topology";
pub const VOLTAGES_REAL_OUTPUT: &str = "voltages_real";
pub const VOLTAGES_IMAG_OUTPUT: &str = "voltages_imag";
pub const VOLTAGES_MAGNITUDE_OUTPUT: &str = "voltages_magnitude";
pub const POWERS_REAL_OUTPUT: &str = "powers_real";
pub const POWERS_IMAG_OUTPUT: &str = "powers_imag";
pub const INJECTIONS_OUTPUT: &str = "injections";

/// Everything published for one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FeederSnapshot {
    pub time: NaiveDateTime,
    pub voltages_real: VoltagesReal,
    pub voltages_imag: VoltagesImaginary,
    pub voltages_magnitude: VoltagesMagnitude,
    pub powers_real: PowersReal,
    pub powers_imag: PowersImaginary,
    pub injections: Injection,
}

/// Per-equipment injections, negated into generation-positive and
/// concatenated in [`EquipmentClass::ALL`] order.
fn injection_payload(
    classes: &[(EquipmentClass, LabelledArray<Complex64>)],
    time: Option<NaiveDateTime>,
) -> Injection {
    let mut ids = Vec::new();
    let mut values = Vec::new();
    let mut tags = Vec::new();
    for (class, array) in classes {
        for (id, value) in array.iter() {
            ids.push(id.clone());
            values.push(-value);
            tags.push(class.as_str().to_string());
        }
    }
    let (real, imag) = LabelledArray { ids, values }.split(("kW", "kVAR"));
    Injection {
        power_real: PowersReal::from(real.with_equipment_type(tags.clone()).with_time(time)),
        power_imaginary: PowersImaginary::from(imag.with_equipment_type(tags).with_time(time)),
    }
}

pub struct Feeder<P: PhysicalSolver> {
    solver: P,
    index: CanonicalIndex,
    operator: AdmittanceOperator,
    slack: Vec<usize>,
    checker: PowerBalanceChecker,
    topology: Topology,
    start: NaiveDateTime,
    run_freq_sec: f64,
}

impl<P: PhysicalSolver> Feeder<P> {
    /// Solve the initial state and build the topology.
    pub fn new(mut solver: P, config: &FeederConfig) -> DsseResult<Self> {
        let start = config.start()?;
        if !(config.run_freq_sec > 0.0) {
            return Err(DsseError::Configuration(format!(
                "run_freq_sec must be positive, got {}",
                config.run_freq_sec
            )));
        }
        solver.advance(start.hour(), 60 * start.minute() + start.second())?;

        let admittance = solver.admittance()?;
        let index = admittance.index()?;
        let operator = admittance.operator();
        let slack = solver
            .source_ids()
            .iter()
            .map(|id| index.position(id.as_str()))
            .collect::<DsseResult<Vec<_>>>()?;

        let base = solver.base_voltages()?;
        let base = MeasurementArray::new(base.values, base.ids, "V");
        let base_voltage_magnitudes = reindex(&base, index.ids())?;

        let voltages = canonical_phasors(&solver, &index)?;
        let base_voltage_angles = MeasurementArray::new(
            voltages.iter().map(|v| snap_to_phase(v.arg())).collect(),
            index.ids().to_vec(),
            "radians",
        );

        let topology = Topology {
            admittance: admittance.to_topology(config.use_sparse_admittance),
            base_voltage_angles,
            base_voltage_magnitudes,
            injections: injection_payload(&class_injections(&solver)?, None),
            slack_bus: solver.source_ids(),
        };
        info!(
            nodes = index.len(),
            sparse = config.use_sparse_admittance,
            "feeder topology built"
        );

        Ok(Self {
            solver,
            index,
            operator,
            slack,
            checker: PowerBalanceChecker::default(),
            topology,
            start,
            run_freq_sec: config.run_freq_sec,
        })
    }

    pub fn with_checker(mut self, checker: PowerBalanceChecker) -> Self {
        self.checker = checker;
        self
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn solver(&self) -> &P {
        &self.solver
    }

    /// `start + granted * run_freq_sec`.
    pub fn timestamp(&self, granted: SimTime) -> NaiveDateTime {
        let millis = (granted * self.run_freq_sec * 1000.0).round() as i64;
        self.start + Duration::milliseconds(millis)
    }

    /// Advance the solver to `granted` and assemble the tick's publications.
    pub fn step(&mut self, granted: SimTime) -> DsseResult<FeederSnapshot> {
        let time = self.timestamp(granted);
        let floored = self.timestamp(granted.floor());
        self.solver
            .advance(floored.hour(), 60 * floored.minute() + floored.second())?;

        let voltages = canonical_phasors(&self.solver, &self.index)?;
        let classes = class_injections(&self.solver)?;
        let contributors: Vec<&LabelledArray<Complex64>> = classes.iter().map(|(_, a)| a).collect();

        let calculated = calculated_power(&self.operator, &voltages);
        let mut declared = declared_injections(&contributors, &self.index);
        override_slack(&mut declared, &calculated, &self.slack);
        self.checker.check(&self.index, &declared, &calculated)?;

        let ids = self.index.ids().to_vec();
        let stamp = Some(time);
        debug!(%time, nodes = ids.len(), "feeder tick balanced");
        Ok(FeederSnapshot {
            time,
            voltages_real: VoltagesReal::new(voltages.iter().map(|v| v.re).collect(), ids.clone())
                .with_time(stamp),
            voltages_imag: VoltagesImaginary::new(
                voltages.iter().map(|v| v.im).collect(),
                ids.clone(),
            )
            .with_time(stamp),
            voltages_magnitude: VoltagesMagnitude::new(
                voltages.iter().map(|v| v.norm()).collect(),
                ids.clone(),
            )
            .with_time(stamp),
            powers_real: PowersReal::new(declared.iter().map(|s| s.re).collect(), ids.clone())
                .with_time(stamp),
            powers_imag: PowersImaginary::new(declared.iter().map(|s| s.im).collect(), ids)
                .with_time(stamp),
            injections: injection_payload(&classes, stamp),
        })
    }
}

fn canonical_phasors<P: PhysicalSolver>(
    solver: &P,
    index: &CanonicalIndex,
) -> DsseResult<Vec<Complex64>> {
    let actual = solver.actual_voltages()?;
    let mut out = vec![Complex64::new(0.0, 0.0); index.len()];
    let mut seen = vec![false; index.len()];
    for (id, v) in actual.iter() {
        let i = index.position(id.as_str())?;
        out[i] = v;
        seen[i] = true;
    }
    if let Some(i) = seen.iter().position(|s| !s) {
        return Err(DsseError::Validation(format!(
            "physical solver reported no voltage for {}",
            index.ids()[i]
        )));
    }
    Ok(out)
}

fn class_injections<P: PhysicalSolver>(
    solver: &P,
) -> DsseResult<Vec<(EquipmentClass, LabelledArray<Complex64>)>> {
    EquipmentClass::ALL
        .iter()
        .map(|&class| Ok((class, solver.injections(class, false)?)))
        .collect()
}

/// Publish the topology, then one snapshot per tick `0..number_of_timesteps`.
pub fn run_feeder<S: Substrate, P: PhysicalSolver>(
    mut handle: FederateHandle<S>,
    feeder: &mut Feeder<P>,
    config: &FeederConfig,
) -> DsseResult<usize> {
    handle.enter_execution_mode()?;

    if let Some(path) = &config.topology_output {
        fs::write(path, serde_json::to_string(feeder.topology())?)?;
        debug!(path = %path.display(), "topology written");
    }
    handle.publish(TOPOLOGY_OUTPUT, feeder.topology())?;

    for request in 0..config.number_of_timesteps {
        let granted = handle.request_time(request as SimTime)?;
        let snapshot = feeder.step(granted)?;
        info!(time = %snapshot.time, granted, "publishing feeder state");

        handle.publish(VOLTAGES_REAL_OUTPUT, &snapshot.voltages_real)?;
        handle.publish(VOLTAGES_IMAG_OUTPUT, &snapshot.voltages_imag)?;
        handle.publish(VOLTAGES_MAGNITUDE_OUTPUT, &snapshot.voltages_magnitude)?;
        handle.publish(POWERS_REAL_OUTPUT, &snapshot.powers_real)?;
        handle.publish(POWERS_IMAG_OUTPUT, &snapshot.powers_imag)?;
        handle.publish(INJECTIONS_OUTPUT, &snapshot.injections)?;
    }

    handle.disconnect()?;
    Ok(config.number_of_timesteps)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dsse_algo::test_utils::radial_feeder;
    use dsse_core::{node_ids, Admittance};
    use std::path::PathBuf;

    fn replay_case() -> ReplayCase {
        let case = radial_feeder();
        let mut admittance = Vec::new();
        for (i, row) in case.admittance.iter().enumerate() {
            for (j, &y) in row.iter().enumerate() {
                if y.norm() > 0.0 {
                    admittance.push((i, j, y));
                }
            }
        }
        ReplayCase {
            ids: case.ids.clone(),
            admittance,
            base_voltages: vec![2400.0; case.ids.len()],
            source_ids: node_ids(["src.1"]),
            equipment: [("end.1".into(), EquipmentClass::PvSystem)].into(),
            steps: vec![ReplayStep {
                hour: 0,
                second: 0,
                voltages: case.voltages.clone(),
            }],
        }
    }

    fn config(sparse: bool) -> FeederConfig {
        FeederConfig {
            name: "feeder".into(),
            start_date: "2017-01-01 00:00:00".into(),
            number_of_timesteps: 2,
            run_freq_sec: 900.0,
            use_sparse_admittance: sparse,
            topology_output: None,
            case_file: PathBuf::from("case.json"),
        }
    }

    #[test]
    fn replayed_tick_is_balanced_and_timestamped() {
        let solver = ReplaySolver::new(replay_case()).unwrap();
        let mut feeder = Feeder::new(solver, &config(false)).unwrap();
        let snapshot = feeder.step(1.0).unwrap();

        assert_eq!(snapshot.time.to_string(), "2017-01-01 00:15:00");
        assert_eq!(snapshot.voltages_magnitude.ids, radial_feeder().ids);
        assert!((snapshot.voltages_magnitude.values[0] - 2400.0).abs() < 1e-9);
        // the source supplies the feeder, the far ends consume
        assert!(snapshot.powers_real.values[0] < 0.0);
        assert!(snapshot.powers_real.values[2] > 0.0);
        assert!(snapshot.powers_real.values[3] > 0.0);
    }

    #[test]
    fn injections_are_generation_positive_and_tagged() {
        let solver = ReplaySolver::new(replay_case()).unwrap();
        let mut feeder = Feeder::new(solver, &config(false)).unwrap();
        let snapshot = feeder.step(0.0).unwrap();

        let real = &snapshot.injections.power_real;
        assert_eq!(real.ids, node_ids(["mid.1", "lat.1", "end.1"]));
        assert_eq!(
            real.equipment_type.as_deref(),
            Some(&["Load".to_string(), "Load".to_string(), "PVSystem".to_string()][..])
        );
        // injection sign is the negated node consumption
        let consumption = &snapshot.powers_real.values;
        assert!((real.values[0] + consumption[1]).abs() < 1e-9);
        assert!((real.values[1] + consumption[3]).abs() < 1e-9);
        assert!((real.values[2] + consumption[2]).abs() < 1e-9);
        assert!(real.values[2] < 0.0);
    }

    #[test]
    fn topology_uses_snapped_angles_and_requested_admittance_form() {
        let solver = ReplaySolver::new(replay_case()).unwrap();
        let feeder = Feeder::new(solver, &config(true)).unwrap();
        let topology = feeder.topology();
        assert!(topology.base_voltage_angles.values.iter().all(|a| *a == 0.0));
        assert!(matches!(topology.admittance, Admittance::Sparse(_)));
        assert_eq!(topology.slack_bus, node_ids(["src.1"]));
        assert!(topology.validate().is_ok());
    }

    /// Declares an extra 5 kW load at `mid.1` that the phasors do not carry.
    struct Skewed(ReplaySolver);

    impl PhysicalSolver for Skewed {
        fn admittance(&self) -> DsseResult<SolverAdmittance> {
            self.0.admittance()
        }
        fn actual_voltages(&self) -> DsseResult<LabelledArray<Complex64>> {
            self.0.actual_voltages()
        }
        fn injections(
            &self,
            class: EquipmentClass,
            static_only: bool,
        ) -> DsseResult<LabelledArray<Complex64>> {
            let mut out = self.0.injections(class, static_only)?;
            if class == EquipmentClass::Load {
                out.ids.push("mid.1".into());
                out.values.push(Complex64::new(5.0, 0.0));
            }
            Ok(out)
        }
        fn base_voltages(&self) -> DsseResult<LabelledArray<f64>> {
            self.0.base_voltages()
        }
        fn source_ids(&self) -> Vec<dsse_core::NodeId> {
            self.0.source_ids()
        }
        fn advance(&mut self, hour: u32, second: u32) -> DsseResult<()> {
            self.0.advance(hour, second)
        }
    }

    #[test]
    fn inconsistent_injections_stop_the_tick() {
        let solver = Skewed(ReplaySolver::new(replay_case()).unwrap());
        let mut feeder = Feeder::new(solver, &config(false)).unwrap();
        match feeder.step(0.0) {
            Err(DsseError::PowerImbalance { nodes }) => {
                assert_eq!(nodes.len(), 1);
                assert_eq!(nodes[0].id.as_str(), "mid.1");
            }
            other => panic!("expected PowerImbalance, got {other:?}"),
        }
    }

    #[test]
    fn timestamps_follow_run_frequency() {
        let solver = ReplaySolver::new(replay_case()).unwrap();
        let feeder = Feeder::new(solver, &config(false)).unwrap();
        assert_eq!(feeder.timestamp(2.0).to_string(), "2017-01-01 00:30:00");
        assert_eq!(feeder.topology().injections.power_real.len(), 3);
    }
}
