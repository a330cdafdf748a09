//! Dense linear-system backends for the damped normal equations.

pub mod backend;
pub mod registry;

pub use backend::{FaerSolver, GaussSolver, LinearSystemBackend};
pub use registry::LinearSolverKind;
