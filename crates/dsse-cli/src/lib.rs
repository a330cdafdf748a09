pub mod cli;

pub use cli::{AnalyzeArgs, Cli, Commands, CosimArgs, EstimateArgs};
