//! Power-balance consistency check for producer-side ground truth.
//!
//! After the physical solver advances a tick, the power implied by the solved
//! voltages must cancel the declared equipment injections at every node:
//!
//! ```text
//! calculated[i] = V[i] · conj((Y · V)[i]) / 1000        (kVA, generation-positive)
//! declared[i]   = Σ_class agg_to_ids(class)[i]          (kVA, consumption-positive)
//!
//! |calculated[i] + declared[i]| ≤ tol   for every node i
//! ```
//!
//! Slack (source) nodes have no declared equipment; their declared value is
//! overridden with `−calculated` before the check.
//!
//! Any violation is a model or data inconsistency, so the tick fails with
//! [`DsseError::PowerImbalance`] naming every offending node.

use dsse_core::{
    agg_to_ids, CanonicalIndex, Complex64, DsseError, DsseResult, ImbalancedNode, LabelledArray,
};
use tracing::error;

use crate::wls::AdmittanceOperator;

/// Default tolerance, in kVA.
pub const DEFAULT_BALANCE_TOLERANCE: f64 = 1.0;

/// `V ⊙ conj(Y·V) / 1000` for SI voltages (V) and admittance (S).
pub fn calculated_power(admittance: &AdmittanceOperator, voltages: &[Complex64]) -> Vec<Complex64> {
    let current = admittance.mul_vec(voltages);
    voltages
        .iter()
        .zip(&current)
        .map(|(v, i)| v * i.conj() / 1000.0)
        .collect()
}

/// Sum per-equipment-class injections onto canonical nodes.
///
/// Contributors are consumption-positive; nodes without equipment are zero.
pub fn declared_injections(
    classes: &[&LabelledArray<Complex64>],
    index: &CanonicalIndex,
) -> Vec<Complex64> {
    let mut total = vec![Complex64::new(0.0, 0.0); index.len()];
    for class in classes {
        for (t, v) in total.iter_mut().zip(agg_to_ids(class, index)) {
            *t += v;
        }
    }
    total
}

/// Replace the declared value at every slack node with `−calculated`.
pub fn override_slack(declared: &mut [Complex64], calculated: &[Complex64], slack: &[usize]) {
    for &i in slack {
        declared[i] = -calculated[i];
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerBalanceChecker {
    tol: f64,
}

impl Default for PowerBalanceChecker {
    fn default() -> Self {
        Self {
            tol: DEFAULT_BALANCE_TOLERANCE,
        }
    }
}

impl PowerBalanceChecker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tolerance(mut self, tol: f64) -> Self {
        self.tol = tol;
        self
    }

    pub fn tolerance(&self) -> f64 {
        self.tol
    }

    /// Nodes where `|declared + calculated| > tol`, in canonical order.
    pub fn where_unbalanced(
        &self,
        index: &CanonicalIndex,
        declared: &[Complex64],
        calculated: &[Complex64],
    ) -> Vec<ImbalancedNode> {
        index
            .ids()
            .iter()
            .zip(declared.iter().zip(calculated))
            .filter(|(_, (d, c))| (*d + *c).norm() > self.tol)
            .map(|(id, (&declared, &calculated))| ImbalancedNode {
                id: id.clone(),
                declared,
                calculated,
            })
            .collect()
    }

    /// Fail with [`DsseError::PowerImbalance`] if any node is unbalanced.
    pub fn check(
        &self,
        index: &CanonicalIndex,
        declared: &[Complex64],
        calculated: &[Complex64],
    ) -> DsseResult<()> {
        if declared.len() != index.len() || calculated.len() != index.len() {
            return Err(DsseError::Validation(format!(
                "power balance needs {} entries, got {} declared and {} calculated",
                index.len(),
                declared.len(),
                calculated.len()
            )));
        }
        let nodes = self.where_unbalanced(index, declared, calculated);
        if nodes.is_empty() {
            return Ok(());
        }
        error!(
            count = nodes.len(),
            tol = self.tol,
            "declared injections disagree with solved voltages"
        );
        Err(DsseError::PowerImbalance { nodes })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::radial_feeder;
    use dsse_core::node_ids;

    fn operator(y: &[Vec<Complex64>]) -> AdmittanceOperator {
        AdmittanceOperator::Dense(y.to_vec())
    }

    #[test]
    fn balanced_feeder_has_no_offenders() {
        let case = radial_feeder();
        let index = CanonicalIndex::new(case.ids.clone()).unwrap();
        let calculated = calculated_power(&operator(&case.admittance), &case.voltages);
        let declared: Vec<_> = calculated.iter().map(|c| -c).collect();

        let checker = PowerBalanceChecker::new();
        assert!(checker.where_unbalanced(&index, &declared, &calculated).is_empty());
        assert!(checker.check(&index, &declared, &calculated).is_ok());
    }

    #[test]
    fn perturbing_one_node_flags_exactly_that_node() {
        let case = radial_feeder();
        let index = CanonicalIndex::new(case.ids.clone()).unwrap();
        let calculated = calculated_power(&operator(&case.admittance), &case.voltages);
        let mut declared: Vec<_> = calculated.iter().map(|c| -c).collect();
        declared[2] += Complex64::new(1.5, 0.0);

        let checker = PowerBalanceChecker::new();
        let bad = checker.where_unbalanced(&index, &declared, &calculated);
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].id.as_str(), "end.1");
        assert!((bad[0].mismatch() - 1.5).abs() < 1e-9);

        match checker.check(&index, &declared, &calculated) {
            Err(DsseError::PowerImbalance { nodes }) => assert_eq!(nodes, bad),
            other => panic!("expected PowerImbalance, got {other:?}"),
        }
    }

    #[test]
    fn perturbation_within_tolerance_passes() {
        let case = radial_feeder();
        let index = CanonicalIndex::new(case.ids.clone()).unwrap();
        let calculated = calculated_power(&operator(&case.admittance), &case.voltages);
        let mut declared: Vec<_> = calculated.iter().map(|c| -c).collect();
        declared[1] += Complex64::new(0.0, 0.9);
        assert!(PowerBalanceChecker::new()
            .check(&index, &declared, &calculated)
            .is_ok());
    }

    #[test]
    fn declared_injections_aggregate_classes_and_override_slack() {
        let index = CanonicalIndex::new(node_ids(["s", "a", "b"])).unwrap();
        let loads = LabelledArray::new(
            node_ids(["a", "a", "b"]),
            vec![
                Complex64::new(10.0, 2.0),
                Complex64::new(5.0, 1.0),
                Complex64::new(3.0, 0.0),
            ],
        )
        .unwrap();
        let pv = LabelledArray::new(node_ids(["b"]), vec![Complex64::new(-4.0, 0.0)]).unwrap();
        let caps = LabelledArray::empty();

        let mut declared = declared_injections(&[&loads, &pv, &caps], &index);
        assert_eq!(declared[0], Complex64::new(0.0, 0.0));
        assert_eq!(declared[1], Complex64::new(15.0, 3.0));
        assert_eq!(declared[2], Complex64::new(-1.0, 0.0));

        let calculated = vec![Complex64::new(14.0, 3.0), Complex64::new(0.0, 0.0), Complex64::new(0.0, 0.0)];
        override_slack(&mut declared, &calculated, &[0]);
        assert_eq!(declared[0], Complex64::new(-14.0, -3.0));
    }
}
