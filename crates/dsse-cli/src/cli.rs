use clap::{Args, Parser, Subcommand, ValueHint};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "dsse", author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level (`RUST_LOG` takes precedence)
    #[arg(long, default_value = "info", global = true)]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Estimate node voltages once from measurement files
    Estimate(EstimateArgs),
    /// Run feeder, sensors, estimator and recorders as an in-process federation
    Cosim(CosimArgs),
    /// Compare recorded estimates against recorded ground truth
    Analyze(AnalyzeArgs),
}

#[derive(Args, Debug)]
pub struct EstimateArgs {
    /// Topology JSON (admittance, base voltages, slack bus)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub topology: PathBuf,
    /// Real power measurements (kW, consumption-positive)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub powers_real: PathBuf,
    /// Reactive power measurements (kVAR, consumption-positive)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub powers_imag: PathBuf,
    /// Voltage magnitude measurements (V)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub voltages: PathBuf,
    /// Algorithm parameters JSON (`tol`, `units`, `base_power`, `max_iterations`)
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub parameters: Option<PathBuf>,
    /// Linear solver for trust-region steps (faer, gauss)
    #[arg(long, default_value = "faer")]
    pub linear_solver: String,
    /// Write the estimate here instead of stdout
    #[arg(short, long, value_hint = ValueHint::FilePath)]
    pub out: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CosimArgs {
    /// Recorded feeder case replayed as the physical solver
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub case: PathBuf,
    /// Directory holding voltage_ids.json, real_ids.json and reactive_ids.json
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub sensors: PathBuf,
    /// Output directory for recordings and the published topology
    #[arg(long, value_hint = ValueHint::DirPath)]
    pub out: PathBuf,
    /// Number of feeder ticks
    #[arg(long, default_value_t = 96)]
    pub steps: usize,
    /// Gaussian noise variance on voltage magnitude sensors (V²)
    #[arg(long, default_value_t = 0.0)]
    pub variance: f64,
    /// Gaussian noise variance on power sensors (kW², kVAR²)
    #[arg(long, default_value_t = 0.0)]
    pub power_variance: f64,
    /// Noise seed shared by every sensor
    #[arg(long, default_value_t = 12345)]
    pub seed: u64,
    /// Timestamp of tick zero (`%Y-%m-%d %H:%M:%S`)
    #[arg(long, default_value = "2017-01-01 00:00:00")]
    pub start_date: String,
    /// Simulated seconds per tick
    #[arg(long, default_value_t = 900.0)]
    pub run_freq_sec: f64,
    /// Publish the topology with a sparse admittance list
    #[arg(long)]
    pub sparse: bool,
    /// Algorithm parameters JSON for the estimator
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub parameters: Option<PathBuf>,
    /// Linear solver for trust-region steps (faer, gauss)
    #[arg(long, default_value = "faer")]
    pub linear_solver: String,
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Recorded true voltages, real part
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub truth_real: PathBuf,
    /// Recorded true voltages, imaginary part
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub truth_imag: PathBuf,
    /// Recorded estimated magnitudes
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub magnitude: PathBuf,
    /// Recorded estimated angles
    #[arg(long, value_hint = ValueHint::FilePath)]
    pub angle: PathBuf,
    /// Print the table as JSON
    #[arg(long)]
    pub json: bool,
}
