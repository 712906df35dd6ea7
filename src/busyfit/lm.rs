//! Damped least-squares solver
//!
//! A Levenberg–Marquardt iteration over weighted residuals with an analytic
//! Jacobian. Parameters can be marked fixed; the normal equations are built
//! over the free parameters only, and fixed parameters keep their value and
//! report zero uncertainty.

use nalgebra::{DMatrix, DVector};

const INITIAL_DAMPING: f64 = 1.0e-3;
const DAMPING_INCREASE: f64 = 10.0;
const DAMPING_DECREASE: f64 = 0.1;
const MAX_DAMPING: f64 = 1.0e+12;

/// Step-size convergence test in the style of `gsl_multifit_test_delta`:
/// every component must satisfy `|dx| < abs_tol + rel_tol * |x|`
fn step_converged(step: &DVector<f64>, params: &DVector<f64>, abs_tol: f64, rel_tol: f64) -> bool {
    step.iter()
        .zip(params.iter())
        .all(|(dx, x)| dx.abs() < abs_tol + rel_tol * x.abs())
}

/// Model callbacks for one fitting problem
pub trait LeastSquaresModel {
    /// Number of data samples
    fn sample_count(&self) -> usize;

    /// Weighted residual vector `(model(x_i) - y_i) / sigma_i`
    fn residuals(&self, params: &DVector<f64>, out: &mut DVector<f64>);

    /// Weighted Jacobian `d residual_i / d param_j`
    fn jacobian(&self, params: &DVector<f64>, out: &mut DMatrix<f64>);
}

#[derive(Debug, Clone)]
pub struct LmOutcome {
    pub params: DVector<f64>,
    /// Per-parameter standard errors scaled by `max(1, chi/sqrt(dof))`;
    /// zero for fixed parameters
    pub uncertainties: DVector<f64>,
    pub reduced_chi2: f64,
    pub iterations: usize,
    pub converged: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct LmSolver {
    pub max_iterations: usize,
    pub abs_tolerance: f64,
    pub rel_tolerance: f64,
}

impl Default for LmSolver {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            abs_tolerance: 1.0e-4,
            rel_tolerance: 1.0e-4,
        }
    }
}

impl LmSolver {
    /// Minimise the weighted sum of squared residuals starting from
    /// `initial`, holding parameters with `free[j] == false` fixed.
    pub fn solve<M: LeastSquaresModel>(
        &self,
        model: &M,
        initial: DVector<f64>,
        free: &[bool],
    ) -> LmOutcome {
        let n = model.sample_count();
        let p = initial.len();
        let free_indices: Vec<usize> = (0..p).filter(|&j| free[j]).collect();
        let n_free = free_indices.len();

        let mut params = initial;
        let mut residuals = DVector::<f64>::zeros(n);
        let mut jacobian = DMatrix::<f64>::zeros(n, p);

        model.residuals(&params, &mut residuals);
        let mut chi2 = residuals.norm_squared();

        let mut damping = INITIAL_DAMPING;
        let mut iterations = 0;
        let mut converged = n_free == 0;

        while !converged && iterations < self.max_iterations {
            iterations += 1;

            model.jacobian(&params, &mut jacobian);

            // Reduced normal equations over the free parameters.
            let mut jtj = DMatrix::<f64>::zeros(n_free, n_free);
            let mut jtf = DVector::<f64>::zeros(n_free);
            for (row, &j) in free_indices.iter().enumerate() {
                let col_j = jacobian.column(j);
                jtf[row] = col_j.dot(&residuals);
                for (col, &k) in free_indices.iter().enumerate() {
                    jtj[(row, col)] = col_j.dot(&jacobian.column(k));
                }
            }

            // Try increasingly damped steps until one reduces chi-square.
            let rhs = -jtf.clone();
            let mut accepted = false;
            while damping <= MAX_DAMPING {
                let mut damped = jtj.clone();
                for j in 0..n_free {
                    damped[(j, j)] += damping * jtj[(j, j)].max(f64::MIN_POSITIVE);
                }

                let solution = damped
                    .clone()
                    .cholesky()
                    .map(|ch| ch.solve(&rhs))
                    .or_else(|| damped.lu().solve(&rhs));

                let Some(step) = solution else {
                    damping *= DAMPING_INCREASE;
                    continue;
                };

                let mut trial = params.clone();
                let mut full_step = DVector::<f64>::zeros(p);
                for (row, &j) in free_indices.iter().enumerate() {
                    trial[j] += step[row];
                    full_step[j] = step[row];
                }

                model.residuals(&trial, &mut residuals);
                let trial_chi2 = residuals.norm_squared();

                if trial_chi2.is_finite() && trial_chi2 <= chi2 {
                    params = trial;
                    chi2 = trial_chi2;
                    damping = (damping * DAMPING_DECREASE).max(f64::MIN_POSITIVE);
                    converged = step_converged(
                        &full_step,
                        &params,
                        self.abs_tolerance,
                        self.rel_tolerance,
                    );
                    accepted = true;
                    break;
                }

                damping *= DAMPING_INCREASE;
            }

            if !accepted {
                // No damping value produced an acceptable step.
                model.residuals(&params, &mut residuals);
                break;
            }
        }

        // Final residuals and covariance at the solution.
        model.residuals(&params, &mut residuals);
        model.jacobian(&params, &mut jacobian);
        let chi = residuals.norm();
        let dof = (n.saturating_sub(n_free)).max(1) as f64;
        let scale = (chi / dof.sqrt()).max(1.0);

        let mut uncertainties = DVector::<f64>::zeros(p);
        if n_free > 0 {
            let mut jtj = DMatrix::<f64>::zeros(n_free, n_free);
            for (row, &j) in free_indices.iter().enumerate() {
                for (col, &k) in free_indices.iter().enumerate() {
                    jtj[(row, col)] = jacobian.column(j).dot(&jacobian.column(k));
                }
            }
            if let Some(covariance) = jtj.try_inverse() {
                for (row, &j) in free_indices.iter().enumerate() {
                    let variance = covariance[(row, row)];
                    if variance > 0.0 {
                        uncertainties[j] = scale * variance.sqrt();
                    }
                }
            }
        }

        LmOutcome {
            params,
            uncertainties,
            reduced_chi2: chi * chi / dof,
            iterations,
            converged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    // y = a * exp(-b x), uniform weights
    struct Exponential {
        x: Vec<f64>,
        y: Vec<f64>,
    }

    impl LeastSquaresModel for Exponential {
        fn sample_count(&self) -> usize {
            self.x.len()
        }

        fn residuals(&self, params: &DVector<f64>, out: &mut DVector<f64>) {
            for i in 0..self.x.len() {
                out[i] = params[0] * (-params[1] * self.x[i]).exp() - self.y[i];
            }
        }

        fn jacobian(&self, params: &DVector<f64>, out: &mut DMatrix<f64>) {
            for i in 0..self.x.len() {
                let e = (-params[1] * self.x[i]).exp();
                out[(i, 0)] = e;
                out[(i, 1)] = -params[0] * self.x[i] * e;
            }
        }
    }

    fn noiseless_exponential(a: f64, b: f64) -> Exponential {
        let x: Vec<f64> = (0..40).map(|i| f64::from(i) * 0.25).collect();
        let y: Vec<f64> = x.iter().map(|&xi| a * (-b * xi).exp()).collect();
        Exponential { x, y }
    }

    #[test]
    fn recovers_exponential_parameters() {
        let model = noiseless_exponential(5.0, 0.7);
        let outcome = LmSolver::default().solve(
            &model,
            DVector::from_vec(vec![1.0, 0.1]),
            &[true, true],
        );

        assert!(outcome.converged);
        assert_relative_eq!(outcome.params[0], 5.0, epsilon = 1e-3);
        assert_relative_eq!(outcome.params[1], 0.7, epsilon = 1e-3);
        assert!(outcome.reduced_chi2 < 1e-6);
    }

    #[test]
    fn fixed_parameter_is_untouched() {
        let model = noiseless_exponential(5.0, 0.7);
        let outcome = LmSolver::default().solve(
            &model,
            DVector::from_vec(vec![5.0, 0.1]),
            &[false, true],
        );

        assert!(outcome.converged);
        assert_eq!(outcome.params[0], 5.0);
        assert_eq!(outcome.uncertainties[0], 0.0);
        assert_relative_eq!(outcome.params[1], 0.7, epsilon = 1e-3);
    }

    #[test]
    fn all_fixed_is_trivially_converged() {
        let model = noiseless_exponential(2.0, 0.3);
        let outcome = LmSolver::default().solve(
            &model,
            DVector::from_vec(vec![2.0, 0.3]),
            &[false, false],
        );
        assert!(outcome.converged);
        assert_eq!(outcome.iterations, 0);
    }
}
