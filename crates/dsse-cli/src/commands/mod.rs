pub mod analyze;
pub mod cosim;
pub mod estimate;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use dsse_core::AlgorithmParameters;
use serde::de::DeserializeOwned;

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let text =
        fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))
}

/// Parameters from a JSON file, or the defaults.
pub fn load_parameters(path: Option<&PathBuf>) -> Result<AlgorithmParameters> {
    match path {
        Some(path) => {
            let value = read_json(path)?;
            AlgorithmParameters::from_value(value)
                .with_context(|| format!("algorithm parameters in {}", path.display()))
        }
        None => Ok(AlgorithmParameters::default()),
    }
}
