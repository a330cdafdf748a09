use dsse_algo::test_utils::{measurements_from_truth, radial_feeder, two_bus_topology, SyntheticCase};
use dsse_algo::wls::{
    AdmittanceOperator, LeastSquaresProblem, MeasurementModel, ObservedMeasurements,
};
use dsse_algo::{state_estimator, EstimatorState, StateEstimator, TrustRegionSolver};
use dsse_core::{
    reindex, AlgorithmParameters, Complex64, DsseError, GaussSolver, PowersImaginary,
    PowersReal, Topology, UnitSystem, VoltagesMagnitude,
};
use serde_json::json;
use std::sync::Arc;

fn tight(units: UnitSystem) -> AlgorithmParameters {
    AlgorithmParameters::default()
        .with_units(units)
        .with_tolerance(1e-10)
}

fn assert_matches_truth(case: &SyntheticCase, magnitudes: &[f64], angles: &[f64]) {
    for (i, (m, t)) in magnitudes.iter().zip(case.true_magnitudes()).enumerate() {
        assert!((m - t).abs() / t < 1e-6, "node {i}: magnitude {m} vs true {t}");
    }
    for (i, (a, t)) in angles.iter().zip(case.true_angles()).enumerate() {
        assert!((a - t).abs() < 1e-6, "node {i}: angle {a} vs true {t}");
    }
}

fn true_state_pu(case: &SyntheticCase) -> EstimatorState {
    EstimatorState::new(
        case.true_angles(),
        case.true_magnitudes().iter().map(|m| m / 2400.0).collect(),
    )
}

#[test]
fn residual_vanishes_at_true_state() {
    let case = radial_feeder();
    let est = StateEstimator::new(&case.topology, AlgorithmParameters::default()).unwrap();
    let (p, q, v) = measurements_from_truth(&case);
    let observed = est.observe(&p, &q, &v).unwrap();
    assert_eq!(observed.len(), 12);

    let index = est.index().clone();
    let base = dsse_core::PerUnitBase::new(est.parameters(), vec![2400.0; 4]);
    let y = AdmittanceOperator::from_topology(&case.topology, &index, &base).unwrap();
    let model = MeasurementModel::new(&y, &observed);

    let truth = true_state_pu(&case);
    let mut x = truth.angles.clone();
    x.extend(&truth.magnitudes);
    for r in model.residual(&x) {
        assert!(r.abs() < 1e-10, "residual {r}");
    }
}

#[test]
fn solve_from_true_state_needs_no_correction() {
    let case = radial_feeder();
    let est = StateEstimator::new(&case.topology, AlgorithmParameters::default()).unwrap();
    let (p, q, v) = measurements_from_truth(&case);
    let out = est.estimate(&p, &q, &v, true_state_pu(&case)).unwrap();

    assert!(out.report.converged);
    assert!(out.report.iterations <= 1, "{:?}", out.report);
    assert_matches_truth(&case, &out.magnitudes_si, out.angles());
}

#[test]
fn fully_observed_feeder_converges_from_flat_start() {
    let case = radial_feeder();
    let est = StateEstimator::new(&case.topology, tight(UnitSystem::PerUnit)).unwrap();
    let (p, q, v) = measurements_from_truth(&case);
    let initial = est.flat_start(&v).unwrap();
    let out = est.estimate(&p, &q, &v, initial).unwrap();

    assert!(out.report.converged, "{:?}", out.report);
    assert_eq!(out.angles()[0], 0.0);
    assert_matches_truth(&case, &out.magnitudes_si, out.angles());
}

#[test]
fn per_unit_and_si_agree() {
    let case = radial_feeder();
    let (p, q, v) = measurements_from_truth(&case);

    let pu = StateEstimator::new(&case.topology, tight(UnitSystem::PerUnit)).unwrap();
    let si = StateEstimator::new(&case.topology, tight(UnitSystem::Si)).unwrap();
    let out_pu = pu.estimate(&p, &q, &v, pu.flat_start(&v).unwrap()).unwrap();
    let out_si = si.estimate(&p, &q, &v, si.flat_start(&v).unwrap()).unwrap();

    for (a, b) in out_pu.magnitudes_si.iter().zip(&out_si.magnitudes_si) {
        assert!((a - b).abs() / b < 1e-6, "PU {a} vs SI {b}");
    }
    for (a, b) in out_pu.angles().iter().zip(out_si.angles()) {
        assert!((a - b).abs() < 1e-6, "PU {a} vs SI {b}");
    }
    // SI carries volts, PU carries per-unit
    assert!(out_si.state.magnitudes[1] > 1000.0);
    assert!(out_pu.state.magnitudes[1] < 2.0);
}

#[test]
fn sparse_admittance_matches_dense() {
    let dense = radial_feeder();
    let sparse = radial_feeder().into_sparse();
    let (p, q, v) = measurements_from_truth(&dense);

    let a = StateEstimator::new(&dense.topology, tight(UnitSystem::PerUnit)).unwrap();
    let b = StateEstimator::new(&sparse.topology, tight(UnitSystem::PerUnit)).unwrap();
    let out_a = a.estimate(&p, &q, &v, a.flat_start(&v).unwrap()).unwrap();
    let out_b = b.estimate(&p, &q, &v, b.flat_start(&v).unwrap()).unwrap();

    assert_eq!(out_a.ids, out_b.ids);
    for (x, y) in out_a.magnitudes_si.iter().zip(&out_b.magnitudes_si) {
        assert!((x - y).abs() < 1e-6);
    }
}

#[test]
fn observable_subset_recovers_state() {
    // |V| at the source, P and Q everywhere except the source
    let case = radial_feeder();
    let (p, q, v) = measurements_from_truth(&case);
    let loads = &case.ids[1..];
    let p = PowersReal::from(reindex(&p, loads).unwrap());
    let q = PowersImaginary::from(reindex(&q, loads).unwrap());
    let v = VoltagesMagnitude::from(reindex(&v, &case.ids[..1]).unwrap());

    let est = StateEstimator::new(&case.topology, tight(UnitSystem::PerUnit)).unwrap();
    let out = est.estimate(&p, &q, &v, est.flat_start(&v).unwrap()).unwrap();
    assert!(out.report.converged, "{:?}", out.report);
    assert_eq!(out.ids.len(), 4);
    assert_matches_truth(&case, &out.magnitudes_si, out.angles());
}

#[test]
fn measurements_in_any_order_give_same_estimate() {
    let case = radial_feeder();
    let (p, q, v) = measurements_from_truth(&case);
    let shuffled: Vec<_> = [2, 0, 3, 1].iter().map(|&i| case.ids[i].clone()).collect();
    let p2 = p.reindexed(&shuffled).unwrap();
    let v2 = v.reindexed(&shuffled).unwrap();

    let est = StateEstimator::new(&case.topology, tight(UnitSystem::PerUnit)).unwrap();
    let a = est.estimate(&p, &q, &v, est.flat_start(&v).unwrap()).unwrap();
    let b = est.estimate(&p2, &q, &v2, est.flat_start(&v2).unwrap()).unwrap();
    for (x, y) in a.magnitudes_si.iter().zip(&b.magnitudes_si) {
        assert!((x - y).abs() < 1e-6);
    }
}

#[test]
fn warm_start_converges_faster() {
    let case = radial_feeder();
    let (p, q, v) = measurements_from_truth(&case);
    let est = StateEstimator::new(&case.topology, tight(UnitSystem::PerUnit)).unwrap();

    let first = est.estimate(&p, &q, &v, est.flat_start(&v).unwrap()).unwrap();
    let second = est.estimate(&p, &q, &v, first.state.clone()).unwrap();
    assert!(second.report.iterations <= first.report.iterations);
    assert!(second.report.iterations <= 3, "{:?}", second.report);
}

#[test]
fn two_node_scenario_pins_slack_angle() {
    let one = Complex64::new(1.0, 0.0);
    let y = AdmittanceOperator::Dense(vec![vec![one, -one], vec![-one, one]]);
    let observed = ObservedMeasurements {
        known_v: vec![0, 1],
        known_p: vec![0, 1],
        known_q: vec![],
        z: vec![1.0, 1.0, 1.0, -1.0],
    };
    let model = MeasurementModel::new(&y, &observed);
    let (x, report) = TrustRegionSolver::new()
        .with_tolerance(5e-7)
        .solve(&model, vec![0.0, 0.0, 1.0, 1.0])
        .unwrap();

    let angles: Vec<f64> = x[..2].iter().map(|a| a - x[0]).collect();
    assert_eq!(angles[0], 0.0);
    assert!(angles[1].is_finite());
    assert!(x[2..].iter().all(|m| m.is_finite() && *m > 0.2 && *m < 2.0), "{x:?}");
    assert!(report.cost.is_finite());
}

#[test]
fn unknown_measurement_id_is_id_lookup_error() {
    let case = two_bus_topology();
    let (p, q, v) = measurements_from_truth(&case);
    let mut bad = p.clone();
    bad.ids[1] = "ghost.1".into();

    let est = StateEstimator::new(&case.topology, AlgorithmParameters::default()).unwrap();
    let err = est
        .estimate(&bad, &q, &v, est.flat_start(&v).unwrap())
        .unwrap_err();
    match err {
        DsseError::IdLookup { id, .. } => assert_eq!(id.as_str(), "ghost.1"),
        other => panic!("expected IdLookup, got {other:?}"),
    }
}

#[test]
fn unknown_unit_system_is_rejected_before_solving() {
    let err = AlgorithmParameters::from_value(json!({ "tol": 1e-6, "units": "kV" })).unwrap_err();
    assert!(matches!(err, DsseError::UnitSystem(ref u) if u == "kV"));
}

#[test]
fn nonconvergence_still_returns_estimate() {
    let case = radial_feeder();
    let (p, q, v) = measurements_from_truth(&case);
    let params = tight(UnitSystem::PerUnit).with_max_iterations(1);
    let est = StateEstimator::new(&case.topology, params)
        .unwrap()
        .with_backend(Arc::new(GaussSolver));
    let out = est.estimate(&p, &q, &v, est.flat_start(&v).unwrap()).unwrap();
    assert!(!out.report.converged);
    assert_eq!(out.magnitudes_si.len(), 4);
    assert_eq!(out.angles()[0], 0.0);
}

#[test]
fn one_shot_function_honours_slack_override() {
    let case = radial_feeder();
    let (p, q, v) = measurements_from_truth(&case);
    let initial = EstimatorState::new(vec![0.0; 4], vec![1.0; 4]);
    let out = state_estimator(&case.topology, &p, &q, &v, tight(UnitSystem::PerUnit), 2, initial)
        .unwrap();
    assert_eq!(out.angles()[2], 0.0);
    let shift = case.true_angles()[2];
    for (a, t) in out.angles().iter().zip(case.true_angles()) {
        assert!((a - (t - shift)).abs() < 1e-6);
    }
}

#[test]
fn topology_survives_json_round_trip() {
    let case = two_bus_topology();
    let text = serde_json::to_string(&case.topology).unwrap();
    let decoded: Topology = serde_json::from_str(&text).unwrap();
    assert_eq!(decoded, case.topology);
    assert!(StateEstimator::new(&decoded, AlgorithmParameters::default()).is_ok());
}

#[test]
fn ragged_measurement_array_is_rejected_before_solving() {
    let case = radial_feeder();
    let (mut p, q, v) = measurements_from_truth(&case);
    p.values.pop();

    let est = StateEstimator::new(&case.topology, AlgorithmParameters::default()).unwrap();
    let err = est
        .estimate(&p, &q, &v, est.flat_start(&v).unwrap())
        .unwrap_err();
    assert!(matches!(err, DsseError::Validation(ref m) if m.contains("3 values but 4 ids")), "{err:?}");
    assert!(est.observe(&p, &q, &v).is_err());
}

#[test]
fn duplicate_measurement_ids_are_rejected() {
    let case = radial_feeder();
    let (p, q, mut v) = measurements_from_truth(&case);
    v.ids[3] = v.ids[2].clone();

    let est = StateEstimator::new(&case.topology, AlgorithmParameters::default()).unwrap();
    let err = est.flat_start(&v).unwrap_err();
    assert!(matches!(err, DsseError::Validation(ref m) if m.contains("duplicate id")), "{err:?}");

    let good_v = measurements_from_truth(&case).2;
    let err = est
        .estimate(&p, &q, &v, est.flat_start(&good_v).unwrap())
        .unwrap_err();
    assert!(matches!(err, DsseError::Validation(_)), "{err:?}");
}
