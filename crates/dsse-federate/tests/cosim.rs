use std::fs;
use std::path::{Path, PathBuf};

use dsse_algo::test_utils::radial_feeder;
use dsse_core::{AlgorithmParameters, DsseError, LinearSolverKind, NodeId, Topology};
use dsse_federate::feeder::{EquipmentClass, ReplayStep};
use dsse_federate::{
    analyze_recordings, read_recording, run_cosim, CosimConfig, FeederConfig, ReplayCase,
    SensorFiles,
};

fn write_case(dir: &Path) -> PathBuf {
    let case = radial_feeder();
    let mut admittance = Vec::new();
    for (i, row) in case.admittance.iter().enumerate() {
        for (j, &y) in row.iter().enumerate() {
            if y.norm() > 0.0 {
                admittance.push((i, j, y));
            }
        }
    }
    let lighter = case.voltages.iter().map(|v| *v * 1.001).collect();
    let replay = ReplayCase {
        ids: case.ids.clone(),
        admittance,
        base_voltages: vec![2400.0; case.ids.len()],
        source_ids: vec!["src.1".into()],
        equipment: [(NodeId::from("lat.1"), EquipmentClass::PvSystem)].into(),
        steps: vec![
            ReplayStep {
                hour: 0,
                second: 0,
                voltages: case.voltages.clone(),
            },
            ReplayStep {
                hour: 0,
                second: 900,
                voltages: lighter,
            },
        ],
    };
    let path = dir.join("case.json");
    fs::write(&path, serde_json::to_string(&replay).unwrap()).unwrap();
    path
}

fn write_sensors(dir: &Path, voltage_ids: &[&str]) -> SensorFiles {
    let sensors = SensorFiles::in_dir(dir);
    let loads = ["mid.1", "end.1", "lat.1"];
    fs::write(&sensors.voltage_magnitude, serde_json::to_string(voltage_ids).unwrap()).unwrap();
    fs::write(&sensors.power_real, serde_json::to_string(&loads).unwrap()).unwrap();
    fs::write(&sensors.power_imaginary, serde_json::to_string(&loads).unwrap()).unwrap();
    sensors
}

fn cosim_config(dir: &Path, sensors: SensorFiles) -> CosimConfig {
    let output_dir = dir.join("out");
    CosimConfig {
        feeder: FeederConfig {
            name: "feeder".into(),
            start_date: "2017-01-01 00:00:00".into(),
            number_of_timesteps: 2,
            run_freq_sec: 900.0,
            use_sparse_admittance: false,
            topology_output: Some(dir.join("topology.json")),
            case_file: write_case(dir),
        },
        sensors,
        output_dir,
        voltage_variance: 0.0,
        power_variance: 0.0,
        seed: 12345,
        parameters: AlgorithmParameters::default().with_tolerance(1e-10),
        linear_solver: LinearSolverKind::Faer,
    }
}

#[test]
fn noiseless_federation_recovers_true_voltages() {
    let dir = tempfile::tempdir().unwrap();
    let sensors = write_sensors(dir.path(), &["src.1", "end.1"]);
    let config = cosim_config(dir.path(), sensors);

    let summary = run_cosim(&config).unwrap();
    assert_eq!(summary.ticks, 2);
    assert_eq!(summary.estimator.ticks_processed, 2);
    // the topology arrives alone before the first measurements
    assert!(summary.estimator.ticks_skipped_stale >= 1);
    assert_eq!(summary.estimator.nonconverged_solves, 0);
    for (name, stats) in &summary.relays {
        assert_eq!(stats.published, 2, "relay {name}");
    }
    for (name, count) in &summary.recorded {
        assert_eq!(*count, 2, "recorder {name}");
    }

    let paths = &summary.recordings;
    let magnitude = read_recording(&paths.voltage_mag).unwrap();
    let table = analyze_recordings(
        &read_recording(&paths.voltage_real).unwrap(),
        &read_recording(&paths.voltage_imag).unwrap(),
        &magnitude,
        &read_recording(&paths.voltage_angle).unwrap(),
    )
    .unwrap();
    assert_eq!(table.rows.len(), 2);
    assert!(table.overall.mape_percent < 1e-3, "{:?}", table.overall);
    assert!(table.overall.mae_degrees < 1e-3, "{:?}", table.overall);

    // estimates carry the timestamp of the measurements they came from
    let times: Vec<String> = magnitude
        .iter()
        .filter_map(|m| m.time.map(|t| t.to_string()))
        .collect();
    assert_eq!(times, ["2017-01-01 00:00:00", "2017-01-01 00:15:00"]);

    let text = fs::read_to_string(dir.path().join("topology.json")).unwrap();
    let topology: Topology = serde_json::from_str(&text).unwrap();
    assert_eq!(topology.slack_bus, vec![NodeId::from("src.1")]);
}

#[test]
fn misplaced_sensor_fails_the_run_without_hanging() {
    let dir = tempfile::tempdir().unwrap();
    let sensors = write_sensors(dir.path(), &["src.1", "nowhere.1"]);
    let config = cosim_config(dir.path(), sensors);

    match run_cosim(&config) {
        Err(DsseError::IdLookup { id, .. }) => assert_eq!(id.as_str(), "nowhere.1"),
        other => panic!("expected IdLookup, got {other:?}"),
    }
}
