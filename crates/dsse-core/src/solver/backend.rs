use faer::{prelude::*, solvers::PartialPivLu, Mat};

use crate::error::{DsseError, DsseResult};

/// Trait for solving dense linear systems (Ax = b).
///
/// The trust-region step solves one such system per iteration, with `A` the
/// damped Gauss-Newton matrix `JᵀJ + μI`.
pub trait LinearSystemBackend: Send + Sync {
    /// Solve the linear system Ax = b
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> DsseResult<Vec<f64>>;

    fn name(&self) -> &'static str;
}

fn check_shape(matrix: &[Vec<f64>], rhs: &[f64]) -> DsseResult<()> {
    let n = matrix.len();
    if rhs.len() != n {
        return Err(DsseError::Solver(format!(
            "rhs length ({}) does not match matrix dimension {}",
            rhs.len(),
            n
        )));
    }
    if matrix.iter().any(|row| row.len() != n) {
        return Err(DsseError::Solver("matrix must be square".into()));
    }
    Ok(())
}

/// Gauss-Jordan elimination with partial pivoting.
#[derive(Debug, Clone, Default)]
pub struct GaussSolver;

impl LinearSystemBackend for GaussSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> DsseResult<Vec<f64>> {
        let n = matrix.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        check_shape(matrix, rhs)?;

        let mut a = matrix.to_vec();
        let mut b = rhs.to_vec();

        for i in 0..n {
            let pivot = (i..n)
                .max_by(|&x, &y| a[x][i].abs().total_cmp(&a[y][i].abs()))
                .unwrap_or(i);
            if pivot != i {
                a.swap(i, pivot);
                b.swap(i, pivot);
            }

            let diag = a[i][i];
            if diag.abs() < 1e-14 {
                return Err(DsseError::Solver(format!("singular matrix at pivot {i}")));
            }

            for value in a[i][i..].iter_mut() {
                *value /= diag;
            }
            b[i] /= diag;

            let pivot_row = a[i][i..].to_vec();
            let pivot_rhs = b[i];
            for row in (0..n).filter(|&r| r != i) {
                let factor = a[row][i];
                if factor == 0.0 {
                    continue;
                }
                for (target, &p) in a[row][i..].iter_mut().zip(&pivot_row) {
                    *target -= factor * p;
                }
                b[row] -= factor * pivot_rhs;
            }
        }

        Ok(b)
    }

    fn name(&self) -> &'static str {
        "gauss"
    }
}

/// LU with partial pivoting from `faer`.
#[derive(Debug, Clone, Default)]
pub struct FaerSolver;

impl LinearSystemBackend for FaerSolver {
    fn solve(&self, matrix: &[Vec<f64>], rhs: &[f64]) -> DsseResult<Vec<f64>> {
        let n = matrix.len();
        if n == 0 {
            return Ok(Vec::new());
        }
        check_shape(matrix, rhs)?;

        let mat = Mat::from_fn(n, n, |i, j| matrix[i][j]);
        let rhs_mat = Mat::from_fn(n, 1, |i, _| rhs[i]);
        let lu = PartialPivLu::new(mat.as_ref());
        let sol = lu.solve(&rhs_mat);

        let solution: Vec<f64> = (0..n).map(|i| sol.read(i, 0)).collect();
        // faer does not report singularity; a zero pivot shows up as inf/NaN
        if solution.iter().any(|v| !v.is_finite()) {
            return Err(DsseError::Solver("singular matrix".into()));
        }
        Ok(solution)
    }

    fn name(&self) -> &'static str {
        "faer"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system() -> (Vec<Vec<f64>>, Vec<f64>) {
        // needs a row swap on the first pivot
        let a = vec![
            vec![0.0, 2.0, 1.0],
            vec![1.0, 1.0, 0.0],
            vec![2.0, 0.0, 3.0],
        ];
        // x = [1, 2, 3]
        let b = vec![7.0, 3.0, 11.0];
        (a, b)
    }

    #[test]
    fn gauss_solves_with_pivoting() {
        let (a, b) = system();
        let x = GaussSolver.solve(&a, &b).unwrap();
        for (got, want) in x.iter().zip([1.0, 2.0, 3.0]) {
            assert!((got - want).abs() < 1e-12, "got {got}, want {want}");
        }
    }

    #[test]
    fn faer_agrees_with_gauss() {
        let (a, b) = system();
        let g = GaussSolver.solve(&a, &b).unwrap();
        let f = FaerSolver.solve(&a, &b).unwrap();
        for (x, y) in g.iter().zip(&f) {
            assert!((x - y).abs() < 1e-10);
        }
    }

    #[test]
    fn singular_matrix_is_solver_error() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(matches!(
            GaussSolver.solve(&a, &[1.0, 2.0]),
            Err(DsseError::Solver(_))
        ));
    }

    #[test]
    fn shape_mismatch_rejected() {
        let a = vec![vec![1.0, 0.0], vec![0.0, 1.0]];
        assert!(FaerSolver.solve(&a, &[1.0]).is_err());
    }
}
