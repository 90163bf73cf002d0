//! Pure formulas of parallel-bias metadynamics.
//!
//! Every deposited Gaussian carries one height per CV. Along CV `k` the running bias is
//! `V_k(xi) = Σ_i h_ik · exp(-½ ((xi_k - c_ik) / σ_k)²)`, and the total bias couples the
//! CVs through `V(xi) = -ln(Σ_k exp(-β V_k)) / β` (Pfaendtner & Bonomi, JCTC 11, 5062).

use nalgebra::{DMatrix, DVector};

/// Boltzmann constant in kJ/(mol·K).
pub const DEFAULT_KB: f64 = 8.314462618e-3;

/// Minimum-image difference for a CV with the given period (`0.0` means non-periodic).
#[inline]
pub fn wrap(delta: f64, period: f64) -> f64 {
    if period > 0.0 {
        delta - period * (delta / period).round()
    } else {
        delta
    }
}

/// Value and derivative (w.r.t. the query point) of a single 1-D Gaussian.
#[inline]
pub fn gaussian(delta: f64, height: f64, sigma: f64) -> (f64, f64) {
    let scaled = delta / sigma;
    let value = height * (-0.5 * scaled * scaled).exp();
    (value, -value * delta / (sigma * sigma))
}

/// Read-only view over the first `count` deposited Gaussians.
#[derive(Debug, Clone, Copy)]
pub struct Gaussians<'a> {
    heights: &'a DMatrix<f64>,
    centers: &'a DMatrix<f64>,
    count: usize,
    sigmas: &'a DVector<f64>,
    periods: &'a DVector<f64>,
}

impl<'a> Gaussians<'a> {
    pub fn new(
        heights: &'a DMatrix<f64>,
        centers: &'a DMatrix<f64>,
        count: usize,
        sigmas: &'a DVector<f64>,
        periods: &'a DVector<f64>,
    ) -> Self {
        Self {
            heights,
            centers,
            count: count.min(heights.nrows()),
            sigmas,
            periods,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Running bias along each CV, `V_k(xi)`.
    pub fn bias_each_cv(&self, xi: &DVector<f64>) -> DVector<f64> {
        self.bias_each_cv_with_gradient(xi).0
    }

    /// `V_k(xi)` together with `∂V_k/∂xi_k`.
    pub fn bias_each_cv_with_gradient(&self, xi: &DVector<f64>) -> (DVector<f64>, DVector<f64>) {
        let d = xi.len();
        let mut bias = DVector::zeros(d);
        let mut gradient = DVector::zeros(d);
        for i in 0..self.count {
            for k in 0..d {
                let delta = wrap(xi[k] - self.centers[(i, k)], self.periods[k]);
                let (value, slope) = gaussian(delta, self.heights[(i, k)], self.sigmas[k]);
                bias[k] += value;
                gradient[k] += slope;
            }
        }
        (bias, gradient)
    }
}

/// Adds the contribution of one Gaussian (per-CV `height`, `center`) at `xi`.
pub fn add_gaussian(
    bias: &mut DVector<f64>,
    gradient: &mut DVector<f64>,
    xi: &DVector<f64>,
    height: &DVector<f64>,
    center: &DVector<f64>,
    sigmas: &DVector<f64>,
    periods: &DVector<f64>,
) {
    for k in 0..xi.len() {
        let delta = wrap(xi[k] - center[k], periods[k]);
        let (value, slope) = gaussian(delta, height[k], sigmas[k]);
        bias[k] += value;
        gradient[k] += slope;
    }
}

/// Normalized Boltzmann weights `exp(-β V_k) / Σ_j exp(-β V_j)` across CVs.
pub fn switching_probabilities(bias_each_cv: &DVector<f64>, beta: f64) -> DVector<f64> {
    let exponents = bias_each_cv * -beta;
    let shift = exponents.max();
    let weights = exponents.map(|a| (a - shift).exp());
    let norm = weights.sum();
    weights / norm
}

/// Total parallel-bias potential `-ln(Σ_k exp(-β V_k)) / β`.
pub fn parallel_bias(bias_each_cv: &DVector<f64>, beta: f64) -> f64 {
    let exponents = bias_each_cv * -beta;
    let shift = exponents.max();
    let log_sum = shift + exponents.map(|a| (a - shift).exp()).sum().ln();
    -log_sum / beta
}

/// Gradient of [`parallel_bias`] w.r.t. `xi`, given `V_k` and `∂V_k/∂xi_k`.
pub fn parallel_bias_gradient(
    bias_each_cv: &DVector<f64>,
    bias_gradient_each_cv: &DVector<f64>,
    beta: f64,
) -> DVector<f64> {
    switching_probabilities(bias_each_cv, beta).component_mul(bias_gradient_each_cv)
}
