//! Admittance operator used by the measurement model.
//!
//! Dense topologies keep their matrix; sparse topologies are assembled into
//! CSR with conductance and susceptance stored separately, as in
//! [`SparseAdmittance`]. Both expose the same nonzero iteration so the
//! measurement function and Jacobian do not care which one they got.
//!
//! Per-unit scaling is applied entry-wise at construction:
//!
//! ```text
//! Y'[i,j] = Vb[i] · Y[i,j] · Vb[j] / (base_power · 1000)
//! ```

use dsse_core::{
    Admittance, CanonicalIndex, Complex64, DsseError, DsseResult, PerUnitBase, Topology,
};
use sprs::{CsMat, TriMat};

/// Sparse admittance in CSR format, G and B stored separately.
#[derive(Debug, Clone)]
pub struct SparseAdmittance {
    n: usize,
    g_matrix: CsMat<f64>,
    b_matrix: CsMat<f64>,
}

impl SparseAdmittance {
    /// Assemble from canonical triplets; duplicate entries are summed.
    pub fn from_triplets(n: usize, triplets: &[(usize, usize, Complex64)]) -> Self {
        let mut g_triplet = TriMat::new((n, n));
        let mut b_triplet = TriMat::new((n, n));
        for &(i, j, y) in triplets {
            if y.re != 0.0 {
                g_triplet.add_triplet(i, j, y.re);
            }
            if y.im != 0.0 {
                b_triplet.add_triplet(i, j, y.im);
            }
        }
        Self {
            n,
            g_matrix: g_triplet.to_csr(),
            b_matrix: b_triplet.to_csr(),
        }
    }

    pub fn nnz(&self) -> usize {
        self.g_matrix.nnz() + self.b_matrix.nnz()
    }

    fn row_iter<'a>(matrix: &'a CsMat<f64>, i: usize) -> impl Iterator<Item = (usize, f64)> + 'a {
        let indptr = matrix.indptr();
        let start = indptr.index(i);
        let end = indptr.index(i + 1);
        let indices = &matrix.indices()[start..end];
        let data = &matrix.data()[start..end];
        indices.iter().zip(data.iter()).map(|(&j, &v)| (j, v))
    }
}

#[derive(Debug, Clone)]
pub enum AdmittanceOperator {
    Dense(Vec<Vec<Complex64>>),
    Sparse(SparseAdmittance),
}

impl AdmittanceOperator {
    /// Build the operator in the estimator's internal units.
    pub fn from_topology(
        topology: &Topology,
        index: &CanonicalIndex,
        base: &PerUnitBase,
    ) -> DsseResult<Self> {
        let n = index.len();
        match &topology.admittance {
            Admittance::Matrix(m) => {
                if m.admittance_matrix.len() != n || m.admittance_matrix.iter().any(|r| r.len() != n)
                {
                    return Err(DsseError::Validation(format!(
                        "admittance matrix is not {n}x{n}"
                    )));
                }
                let scaled = m
                    .admittance_matrix
                    .iter()
                    .enumerate()
                    .map(|(i, row)| {
                        row.iter()
                            .enumerate()
                            .map(|(j, &y)| y * base.admittance_factor(i, j))
                            .collect()
                    })
                    .collect();
                Ok(AdmittanceOperator::Dense(scaled))
            }
            Admittance::Sparse(s) => {
                let triplets: Vec<_> = s
                    .triplets(index)?
                    .into_iter()
                    .map(|(i, j, y)| (i, j, y * base.admittance_factor(i, j)))
                    .collect();
                Ok(AdmittanceOperator::Sparse(SparseAdmittance::from_triplets(
                    n, &triplets,
                )))
            }
        }
    }

    pub fn dim(&self) -> usize {
        match self {
            AdmittanceOperator::Dense(rows) => rows.len(),
            AdmittanceOperator::Sparse(s) => s.n,
        }
    }

    /// Visit the stored entries of row `i`.
    ///
    /// A sparse entry with both parts nonzero is visited twice (real, then
    /// imaginary part); every consumer accumulates, so the split is invisible.
    pub fn for_each_in_row(&self, i: usize, mut f: impl FnMut(usize, Complex64)) {
        match self {
            AdmittanceOperator::Dense(rows) => {
                for (j, &y) in rows[i].iter().enumerate() {
                    if y.re != 0.0 || y.im != 0.0 {
                        f(j, y);
                    }
                }
            }
            AdmittanceOperator::Sparse(s) => {
                for (j, g) in SparseAdmittance::row_iter(&s.g_matrix, i) {
                    f(j, Complex64::new(g, 0.0));
                }
                for (j, b) in SparseAdmittance::row_iter(&s.b_matrix, i) {
                    f(j, Complex64::new(0.0, b));
                }
            }
        }
    }

    /// `Y · v`
    pub fn mul_vec(&self, v: &[Complex64]) -> Vec<Complex64> {
        (0..self.dim())
            .map(|i| {
                let mut acc = Complex64::new(0.0, 0.0);
                self.for_each_in_row(i, |j, y| acc += y * v[j]);
                acc
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Complex64, b: Complex64) -> bool {
        (a - b).norm() < 1e-12
    }

    #[test]
    fn dense_and_sparse_products_agree() {
        let y = vec![
            vec![Complex64::new(2.0, -4.0), Complex64::new(-2.0, 4.0), Complex64::new(0.0, 0.0)],
            vec![Complex64::new(-2.0, 4.0), Complex64::new(3.0, -5.0), Complex64::new(-1.0, 1.0)],
            vec![Complex64::new(0.0, 0.0), Complex64::new(-1.0, 1.0), Complex64::new(1.0, -1.0)],
        ];
        let mut triplets = Vec::new();
        for (i, row) in y.iter().enumerate() {
            for (j, &v) in row.iter().enumerate() {
                if v.norm() > 0.0 {
                    triplets.push((i, j, v));
                }
            }
        }
        let dense = AdmittanceOperator::Dense(y);
        let sparse = AdmittanceOperator::Sparse(SparseAdmittance::from_triplets(3, &triplets));

        let v = vec![
            Complex64::from_polar(1.0, 0.0),
            Complex64::from_polar(0.98, -0.02),
            Complex64::from_polar(0.97, -0.03),
        ];
        for (a, b) in dense.mul_vec(&v).into_iter().zip(sparse.mul_vec(&v)) {
            assert!(approx(a, b), "{a} vs {b}");
        }
    }

    #[test]
    fn duplicate_triplets_are_summed() {
        let s = SparseAdmittance::from_triplets(
            2,
            &[
                (0, 0, Complex64::new(1.0, -1.0)),
                (0, 0, Complex64::new(0.5, 0.0)),
                (1, 1, Complex64::new(0.0, 2.0)),
            ],
        );
        let op = AdmittanceOperator::Sparse(s);
        let out = op.mul_vec(&[Complex64::new(1.0, 0.0), Complex64::new(1.0, 0.0)]);
        assert!(approx(out[0], Complex64::new(1.5, -1.0)));
        assert!(approx(out[1], Complex64::new(0.0, 2.0)));
    }
}
