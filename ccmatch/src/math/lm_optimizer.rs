//! Levenberg-Marquardt least squares over a fixed number of parameters.
//!
//! Models supply a residual vector; the Jacobian is taken by central
//! differences so any residual function can be fit without hand-written
//! derivatives.

use serde::{Deserialize, Serialize};

use super::linear_solver::solve;
use crate::error::CalibrationError;

/// Configuration for Levenberg-Marquardt optimization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LMConfig {
    /// Maximum iterations.
    pub max_iterations: usize,
    /// Convergence threshold on the largest parameter step.
    pub convergence_threshold: f64,
    /// Initial damping parameter.
    pub initial_lambda: f64,
    /// Factor to increase lambda on a failed step.
    pub lambda_up: f64,
    /// Factor to decrease lambda on a successful step.
    pub lambda_down: f64,
}

impl Default for LMConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            convergence_threshold: 1e-8,
            initial_lambda: 0.001,
            lambda_up: 10.0,
            lambda_down: 0.1,
        }
    }
}

impl LMConfig {
    pub fn validate(&self) -> Result<(), CalibrationError> {
        if self.max_iterations == 0 {
            return Err(CalibrationError::InvalidConfig(
                "max_iterations must be > 0".into(),
            ));
        }
        if self.convergence_threshold <= 0.0 {
            return Err(CalibrationError::InvalidConfig(format!(
                "convergence_threshold must be positive, got {}",
                self.convergence_threshold
            )));
        }
        if !(self.lambda_up > 1.0 && self.lambda_down > 0.0 && self.lambda_down < 1.0) {
            return Err(CalibrationError::InvalidConfig(format!(
                "lambda_up must be > 1 and lambda_down in (0, 1), got {} / {}",
                self.lambda_up, self.lambda_down
            )));
        }
        Ok(())
    }
}

/// Result of L-M optimization.
#[derive(Debug, Clone, Copy)]
pub struct LMResult<const N: usize> {
    pub params: [f64; N],
    /// Sum of squared residuals at `params`.
    pub chi2: f64,
    pub converged: bool,
    pub iterations: usize,
}

/// A vector-valued residual function of `N` parameters.
pub trait LeastSquaresModel<const N: usize> {
    /// Writes the residual vector for `params` into `out` (cleared first).
    fn residuals(&self, params: &[f64; N], out: &mut Vec<f64>);

    /// Finite-difference step for parameter `index`.
    fn step_size(&self, _index: usize) -> f64 {
        1e-6
    }
}

/// Minimizes the squared norm of `model`'s residuals starting from `initial_params`.
pub fn optimize<const N: usize, M: LeastSquaresModel<N>>(
    model: &M,
    initial_params: [f64; N],
    config: &LMConfig,
) -> LMResult<N> {
    let mut params = initial_params;
    let mut lambda = config.initial_lambda;
    let mut converged = false;
    let mut iterations = 0;

    let mut residuals = Vec::new();
    let mut scratch = Vec::new();
    let mut jacobian: Vec<[f64; N]> = Vec::new();

    model.residuals(&params, &mut residuals);
    let mut prev_chi2 = sum_squares(&residuals);

    for iter in 0..config.max_iterations {
        iterations = iter + 1;

        if prev_chi2 == 0.0 {
            converged = true;
            break;
        }

        fill_jacobian(model, &params, &mut jacobian, &mut scratch);
        let (hessian, gradient) = compute_hessian_gradient(&jacobian, &residuals);

        let mut damped_hessian = hessian;
        for (i, row) in damped_hessian.iter_mut().enumerate() {
            row[i] *= 1.0 + lambda;
        }

        let Some(delta) = solve(&damped_hessian, &gradient) else {
            break;
        };

        let mut new_params = params;
        for (p, d) in new_params.iter_mut().zip(delta.iter()) {
            *p += d;
        }

        model.residuals(&new_params, &mut scratch);
        let new_chi2 = sum_squares(&scratch);
        let max_delta = delta.iter().copied().fold(0.0f64, |a, d| a.max(d.abs()));

        if new_chi2 < prev_chi2 {
            params = new_params;
            std::mem::swap(&mut residuals, &mut scratch);
            lambda *= config.lambda_down;
            prev_chi2 = new_chi2;

            if max_delta < config.convergence_threshold {
                converged = true;
                break;
            }
        } else {
            // A negligible step that no longer lowers chi2 means we are at the minimum.
            if max_delta < config.convergence_threshold {
                converged = true;
                break;
            }
            lambda *= config.lambda_up;
            if lambda > 1e10 {
                break;
            }
        }
    }

    LMResult {
        params,
        chi2: prev_chi2,
        converged,
        iterations,
    }
}

fn sum_squares(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum()
}

/// Central-difference Jacobian, one row per residual.
fn fill_jacobian<const N: usize, M: LeastSquaresModel<N>>(
    model: &M,
    params: &[f64; N],
    jacobian: &mut Vec<[f64; N]>,
    scratch: &mut Vec<f64>,
) {
    let mut plus = Vec::new();
    for k in 0..N {
        let h = model.step_size(k);

        let mut p = *params;
        p[k] += h;
        model.residuals(&p, &mut plus);

        p[k] = params[k] - h;
        model.residuals(&p, scratch);

        if k == 0 {
            jacobian.clear();
            jacobian.resize(plus.len(), [0.0; N]);
        }
        for ((row, &rp), &rm) in jacobian.iter_mut().zip(plus.iter()).zip(scratch.iter()) {
            row[k] = (rp - rm) / (2.0 * h);
        }
    }
}

/// Compute the Gauss-Newton Hessian (J^T J) and descent gradient (-J^T r).
/// Exploits symmetry: only computes upper triangle, then mirrors.
#[allow(clippy::needless_range_loop)]
pub fn compute_hessian_gradient<const N: usize>(
    jacobian: &[[f64; N]],
    residuals: &[f64],
) -> ([[f64; N]; N], [f64; N]) {
    let mut hessian = [[0.0f64; N]; N];
    let mut gradient = [0.0f64; N];

    for (row, &r) in jacobian.iter().zip(residuals.iter()) {
        for i in 0..N {
            gradient[i] -= row[i] * r;
            for j in i..N {
                hessian[i][j] += row[i] * row[j];
            }
        }
    }

    for i in 1..N {
        for j in 0..i {
            hessian[i][j] = hessian[j][i];
        }
    }

    (hessian, gradient)
}
