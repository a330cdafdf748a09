//! Predicted measurements `h(x)` and the analytic Jacobian of the residual.
//!
//! # State layout
//!
//! ```text
//! x = [ θ_0 … θ_{N-1} | |V|_0 … |V|_{N-1} ]
//! ```
//!
//! # Measurement function
//!
//! With `Vp = |V| ⊙ e^{jθ}` and `I = Y · Vp`, the injected complex power is
//! `S = Vp ⊙ conj(I)`. The stacked prediction is
//!
//! ```text
//! h(x) = [ |V|[knownV] ; Re S[knownP] ; Im S[knownQ] ]
//! ```
//!
//! # Jacobian
//!
//! Differentiating `S_i = Vp_i · Σ_j conj(Y_ij) conj(Vp_j)`:
//!
//! ```text
//! ∂S_i/∂θ_j   = j·Vp_i · (δ_ij·conj(I_i) − conj(Y_ij)·conj(Vp_j))
//! ∂S_i/∂|V|_j = Vp_i·conj(Y_ij)·e^{−jθ_j} + δ_ij·e^{jθ_i}·conj(I_i)
//! ```
//!
//! P rows take the real part and Q rows the imaginary part. Voltage rows
//! select the magnitude column. The residual is `r = z − h(x)`, so the
//! Jacobian returned here is `−∂h/∂x`.

use dsse_core::Complex64;

use super::admittance::AdmittanceOperator;
use super::trust_region::LeastSquaresProblem;

/// Observed measurements in internal units with their canonical positions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObservedMeasurements {
    pub known_v: Vec<usize>,
    pub known_p: Vec<usize>,
    pub known_q: Vec<usize>,
    /// `[V ; P ; Q]`, parallel to the concatenated known indices
    pub z: Vec<f64>,
}

impl ObservedMeasurements {
    pub fn len(&self) -> usize {
        self.z.len()
    }

    pub fn is_empty(&self) -> bool {
        self.z.is_empty()
    }
}

/// WLS measurement model over one admittance operator.
#[derive(Debug, Clone)]
pub struct MeasurementModel<'a> {
    admittance: &'a AdmittanceOperator,
    observed: &'a ObservedMeasurements,
}

impl<'a> MeasurementModel<'a> {
    pub fn new(admittance: &'a AdmittanceOperator, observed: &'a ObservedMeasurements) -> Self {
        Self {
            admittance,
            observed,
        }
    }

    pub fn n_nodes(&self) -> usize {
        self.admittance.dim()
    }

    fn phasors(&self, x: &[f64]) -> Vec<Complex64> {
        let n = self.n_nodes();
        (0..n)
            .map(|i| Complex64::from_polar(x[n + i], x[i]))
            .collect()
    }

    fn unit_phasors(&self, x: &[f64]) -> Vec<Complex64> {
        x[..self.n_nodes()]
            .iter()
            .map(|&theta| Complex64::from_polar(1.0, theta))
            .collect()
    }

    /// Complex power injected at every node for state `x`.
    pub fn injected_power(&self, x: &[f64]) -> Vec<Complex64> {
        let vp = self.phasors(x);
        let current = self.admittance.mul_vec(&vp);
        vp.iter().zip(&current).map(|(v, i)| v * i.conj()).collect()
    }

    /// Stacked predicted measurements.
    pub fn predict(&self, x: &[f64]) -> Vec<f64> {
        let n = self.n_nodes();
        let s = self.injected_power(x);
        let obs = self.observed;
        obs.known_v
            .iter()
            .map(|&k| x[n + k])
            .chain(obs.known_p.iter().map(|&k| s[k].re))
            .chain(obs.known_q.iter().map(|&k| s[k].im))
            .collect()
    }

    /// `∂S_i/∂θ` and `∂S_i/∂|V|` for one node, as dense rows of length N.
    fn power_row_derivatives(
        &self,
        i: usize,
        vp: &[Complex64],
        unit: &[Complex64],
        current: &[Complex64],
    ) -> (Vec<Complex64>, Vec<Complex64>) {
        let n = self.n_nodes();
        let j_unit = Complex64::new(0.0, 1.0);
        let zero = Complex64::new(0.0, 0.0);
        let mut d_angle = vec![zero; n];
        let mut d_mag = vec![zero; n];

        self.admittance.for_each_in_row(i, |j, y| {
            d_angle[j] -= j_unit * vp[i] * y.conj() * vp[j].conj();
            d_mag[j] += vp[i] * y.conj() * unit[j].conj();
        });

        let i_conj = current[i].conj();
        d_angle[i] += j_unit * vp[i] * i_conj;
        d_mag[i] += unit[i] * i_conj;

        (d_angle, d_mag)
    }

    fn jacobian_of_h(&self, x: &[f64]) -> Vec<Vec<f64>> {
        let n = self.n_nodes();
        let obs = self.observed;
        let vp = self.phasors(x);
        let unit = self.unit_phasors(x);
        let current = self.admittance.mul_vec(&vp);
        let mut rows = Vec::with_capacity(obs.len());

        for &k in &obs.known_v {
            let mut row = vec![0.0; 2 * n];
            row[n + k] = 1.0;
            rows.push(row);
        }
        let blocks: [(&[usize], fn(Complex64) -> f64); 2] =
            [(obs.known_p.as_slice(), |c| c.re), (obs.known_q.as_slice(), |c| c.im)];
        for (indices, take) in blocks {
            for &k in indices {
                let (d_angle, d_mag) = self.power_row_derivatives(k, &vp, &unit, &current);
                let row = d_angle
                    .into_iter()
                    .chain(d_mag)
                    .map(take)
                    .collect();
                rows.push(row);
            }
        }
        rows
    }
}

impl LeastSquaresProblem for MeasurementModel<'_> {
    fn residual(&self, x: &[f64]) -> Vec<f64> {
        let predicted = self.predict(x);
        debug_assert_eq!(predicted.len(), self.observed.z.len());
        self.observed
            .z
            .iter()
            .zip(predicted)
            .map(|(z, h)| z - h)
            .collect()
    }

    fn jacobian(&self, x: &[f64]) -> Vec<Vec<f64>> {
        let mut jac = self.jacobian_of_h(x);
        for row in &mut jac {
            for v in row.iter_mut() {
                *v = -*v;
            }
        }
        jac
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_node() -> AdmittanceOperator {
        let y = Complex64::new(1.0, -3.0);
        let w = Complex64::new(0.5, -1.0);
        let zero = Complex64::new(0.0, 0.0);
        AdmittanceOperator::Dense(vec![
            vec![y, -y, zero],
            vec![-y, y + w, -w],
            vec![zero, -w, w + Complex64::new(0.0, 0.05)],
        ])
    }

    fn fully_observed(z_len: usize) -> ObservedMeasurements {
        ObservedMeasurements {
            known_v: vec![0, 1, 2],
            known_p: vec![0, 1, 2],
            known_q: vec![0, 1, 2],
            z: vec![0.0; z_len],
        }
    }

    #[test]
    fn analytic_jacobian_matches_finite_differences() {
        let y = three_node();
        let obs = fully_observed(9);
        let model = MeasurementModel::new(&y, &obs);
        let x = vec![0.0, -0.03, -0.05, 1.01, 0.98, 0.96];

        let jac = model.jacobian(&x);
        let h = 1e-7;
        for col in 0..x.len() {
            let mut plus = x.clone();
            plus[col] += h;
            let mut minus = x.clone();
            minus[col] -= h;
            let rp = model.residual(&plus);
            let rm = model.residual(&minus);
            for row in 0..rp.len() {
                let fd = (rp[row] - rm[row]) / (2.0 * h);
                assert!(
                    (fd - jac[row][col]).abs() < 1e-5,
                    "J[{row}][{col}] analytic {} vs fd {}",
                    jac[row][col],
                    fd
                );
            }
        }
    }

    #[test]
    fn prediction_layout_follows_known_indices() {
        let y = three_node();
        let obs = ObservedMeasurements {
            known_v: vec![2],
            known_p: vec![1],
            known_q: vec![],
            z: vec![0.0; 2],
        };
        let model = MeasurementModel::new(&y, &obs);
        let x = vec![0.0, -0.01, -0.02, 1.0, 0.99, 0.97];
        let h = model.predict(&x);
        assert_eq!(h.len(), 2);
        assert_eq!(h[0], 0.97);
        let s = model.injected_power(&x);
        assert_eq!(h[1], s[1].re);
    }

    #[test]
    fn flat_state_on_lossless_line_injects_nothing() {
        let y = AdmittanceOperator::Dense(vec![
            vec![Complex64::new(1.0, 0.0), Complex64::new(-1.0, 0.0)],
            vec![Complex64::new(-1.0, 0.0), Complex64::new(1.0, 0.0)],
        ]);
        let obs = ObservedMeasurements::default();
        let model = MeasurementModel::new(&y, &obs);
        let s = model.injected_power(&[0.0, 0.0, 1.0, 1.0]);
        assert!(s.iter().all(|c| c.norm() < 1e-15));
    }
}
