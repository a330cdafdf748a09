use anyhow::{Context, Result};
use dsse_cli::CosimArgs;
use dsse_core::LinearSolverKind;
use dsse_federate::{run_cosim, CosimConfig, CosimSummary, FeederConfig, SensorFiles};

use super::load_parameters;

pub fn handle(args: &CosimArgs) -> Result<()> {
    let linear_solver: LinearSolverKind = args.linear_solver.parse()?;
    let config = CosimConfig {
        feeder: FeederConfig {
            name: "feeder".to_string(),
            start_date: args.start_date.clone(),
            number_of_timesteps: args.steps,
            run_freq_sec: args.run_freq_sec,
            use_sparse_admittance: args.sparse,
            topology_output: Some(args.out.join("topology.json")),
            case_file: args.case.clone(),
        },
        sensors: SensorFiles::in_dir(&args.sensors),
        output_dir: args.out.clone(),
        voltage_variance: args.variance,
        power_variance: args.power_variance,
        seed: args.seed,
        parameters: load_parameters(args.parameters.as_ref())?,
        linear_solver,
    };

    let summary = run_cosim(&config)
        .with_context(|| format!("co-simulation of {}", args.case.display()))?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &CosimSummary) {
    println!("Co-simulation finished after {} ticks", summary.ticks);
    for (name, stats) in &summary.relays {
        println!(
            "  {name:<26} published {:>4}  skipped {:>4}",
            stats.published, stats.skipped
        );
    }
    println!(
        "  {:<26} processed {:>4}  stale {:>4}  non-converged {}",
        "estimator",
        summary.estimator.ticks_processed,
        summary.estimator.ticks_skipped_stale,
        summary.estimator.nonconverged_solves
    );
    for (name, count) in &summary.recorded {
        println!("  {name:<26} recorded  {count:>4}");
    }
    println!("Estimates: {}", summary.recordings.voltage_mag.display());
}
