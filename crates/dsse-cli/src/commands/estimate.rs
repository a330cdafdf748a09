use std::fs;

use anyhow::{Context, Result};
use dsse_algo::{SolveReport, StateEstimator};
use dsse_cli::EstimateArgs;
use dsse_core::{
    LinearSolverKind, PowersImaginary, PowersReal, Topology, VoltagesAngle, VoltagesMagnitude,
};
use serde::Serialize;
use tracing::{info, warn};

use super::{load_parameters, read_json};

#[derive(Serialize)]
struct EstimateOutput<'a> {
    voltage_mag: VoltagesMagnitude,
    voltage_angle: VoltagesAngle,
    report: &'a SolveReport,
}

pub fn handle(args: &EstimateArgs) -> Result<()> {
    let topology: Topology = read_json(&args.topology)?;
    let powers_real: PowersReal = read_json(&args.powers_real)?;
    let powers_imag: PowersImaginary = read_json(&args.powers_imag)?;
    let voltages: VoltagesMagnitude = read_json(&args.voltages)?;
    let params = load_parameters(args.parameters.as_ref())?;
    let solver: LinearSolverKind = args.linear_solver.parse()?;

    let estimator = StateEstimator::new(&topology, params)
        .context("building the estimator from the topology")?
        .with_backend(solver.build_solver());
    info!(
        nodes = estimator.index().len(),
        solver = solver.as_str(),
        "estimating state"
    );
    let initial = estimator.flat_start(&voltages)?;
    let estimate = estimator.estimate(&powers_real, &powers_imag, &voltages, initial)?;
    if !estimate.report.converged {
        warn!(iterations = estimate.report.iterations, "estimate did not converge");
    }

    let output = EstimateOutput {
        voltage_mag: estimate.voltage_magnitude(voltages.time),
        voltage_angle: estimate.voltage_angle(voltages.time),
        report: &estimate.report,
    };
    let text = serde_json::to_string_pretty(&output)?;
    match &args.out {
        Some(path) => {
            fs::write(path, text).with_context(|| format!("writing {}", path.display()))?;
            println!(
                "Wrote estimate for {} nodes to {} ({}, {} iterations)",
                estimate.ids.len(),
                path.display(),
                estimate.report.termination,
                estimate.report.iterations
            );
        }
        None => println!("{text}"),
    }
    Ok(())
}
