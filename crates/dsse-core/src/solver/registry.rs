use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use super::backend::{FaerSolver, GaussSolver, LinearSystemBackend};
use crate::error::DsseError;

/// Linear solvers selectable by name.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LinearSolverKind {
    Gauss,
    #[default]
    Faer,
}

impl LinearSolverKind {
    pub fn build_solver(self) -> Arc<dyn LinearSystemBackend> {
        match self {
            LinearSolverKind::Gauss => Arc::new(GaussSolver),
            LinearSolverKind::Faer => Arc::new(FaerSolver),
        }
    }

    pub fn available() -> &'static [&'static str] {
        &["faer", "gauss"]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LinearSolverKind::Gauss => "gauss",
            LinearSolverKind::Faer => "faer",
        }
    }
}

impl FromStr for LinearSolverKind {
    type Err = DsseError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_ascii_lowercase().as_str() {
            "gauss" => Ok(LinearSolverKind::Gauss),
            "faer" | "default" => Ok(LinearSolverKind::Faer),
            other => Err(DsseError::Configuration(format!(
                "unknown linear solver '{}'; supported values: {}",
                other,
                Self::available().join(", ")
            ))),
        }
    }
}

impl fmt::Display for LinearSolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
