//! Unified error types for the estimation workspace
//!
//! [`DsseError`] covers every failure kind the estimator, the relay and the
//! producer-side guards can raise. All of them abort the current tick: there
//! are no retries and no fallback publication.
//!
//! # Example
//!
//! ```ignore
//! use dsse_core::{DsseResult, Topology, VoltagesMagnitude};
//!
//! fn process_tick(topology: &Topology, voltages: &VoltagesMagnitude) -> DsseResult<()> {
//!     let index = topology.validate()?;
//!     voltages.validate()?;
//!     let known = index.get_indices(voltages)?;
//!     Ok(())
//! }
//! ```

use num_complex::Complex64;
use thiserror::Error;

use crate::NodeId;

/// One node that failed the power-balance consistency check.
#[derive(Debug, Clone, PartialEq)]
pub struct ImbalancedNode {
    pub id: NodeId,
    /// Aggregated declared injection (consumption-positive)
    pub declared: Complex64,
    /// Injection implied by the solved voltages
    pub calculated: Complex64,
}

impl ImbalancedNode {
    /// `|calculated + declared|`, the quantity compared against the tolerance.
    pub fn mismatch(&self) -> f64 {
        (self.calculated + self.declared).norm()
    }
}

fn format_imbalance(nodes: &[ImbalancedNode]) -> String {
    nodes
        .iter()
        .map(|n| {
            format!(
                "{} (declared {:.4}{:+.4}i, calculated {:.4}{:+.4}i)",
                n.id, n.declared.re, n.declared.im, n.calculated.re, n.calculated.im
            )
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Unified error type for all estimation operations.
#[derive(Error, Debug)]
pub enum DsseError {
    /// Missing or invalid channel mapping or parameter
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Unrecognized unit system
    #[error("Unit system {0:?} not supported (expected SI or PER_UNIT)")]
    UnitSystem(String),

    /// A measurement id that is absent from the ids it is being indexed against
    #[error("Id lookup error: {id} is not present in {context}")]
    IdLookup { id: NodeId, context: String },

    /// Declared injections disagree with the solved physical state
    #[error("Power imbalance at {} node(s): {}", .nodes.len(), format_imbalance(.nodes))]
    PowerImbalance { nodes: Vec<ImbalancedNode> },

    /// Initial guess does not cover every canonical node
    #[error("State dimension mismatch: expected {expected} entries, found {found}")]
    StateDimension { expected: usize, found: usize },

    /// Malformed data (shape mismatches, duplicate ids)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Numerical failure that damping could not repair
    #[error("Solver error: {0}")]
    Solver(String),

    /// Synchronization substrate failures
    #[error("Substrate error: {0}")]
    Substrate(String),

    /// I/O errors (configuration and sensor files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),
}

impl DsseError {
    pub fn id_lookup(id: impl Into<NodeId>, context: impl Into<String>) -> Self {
        DsseError::IdLookup {
            id: id.into(),
            context: context.into(),
        }
    }
}

/// Convenience type alias for Results using DsseError.
pub type DsseResult<T> = Result<T, DsseError>;

// JSON parsing errors
impl From<serde_json::Error> for DsseError {
    fn from(err: serde_json::Error) -> Self {
        DsseError::Parse(err.to_string())
    }
}
