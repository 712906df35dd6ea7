//! Busy Function fitting
//!
//! Fits the 7-parameter Busy Function
//!
//! ```text
//! B(x) = (a/4) · (erf(b1(w + x − xe0)) + 1)
//!             · (erf(b2(w − x + xe0)) + 1) · (c(x − xp0)ⁿ + 1)
//! ```
//!
//! with trough order n of 2 or 4 to a 1-D spectrum by weighted nonlinear
//! least squares, using the analytic Jacobian. Derived line properties
//! (peak, integral, centroid, W50/W20) are measured on the fitted curve by
//! dense sampling rather than on the raw data.

mod lm;

pub use lm::{LeastSquaresModel, LmOutcome, LmSolver};

use nalgebra::{DMatrix, DVector};
use scilib::math::basic::erf;
use std::f64::consts::PI;
use thiserror::Error;

/// Number of Busy Function parameters: `a, b1, b2, c, xe0, xp0, w`
pub const BUSY_PARAMETERS: usize = 7;

const MIN_CHANNELS: usize = 10;
const PEAK_DERATE: f64 = 1.5;
const FLANK_THRESHOLD: f64 = 0.2;
const MOMENT_THRESHOLD: f64 = 0.1;
const CURVE_SAMPLES: f64 = 1.0e+5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BusyFitError {
    #[error("no spectral data provided")]
    NoData,
    #[error("not enough spectral channels to fit ({0} < {MIN_CHANNELS})")]
    InsufficientChannels(usize),
    #[error("spectrum has {values} values but {sigma} uncertainties")]
    LengthMismatch { values: usize, sigma: usize },
}

/// Order of the polynomial trough between the two turnovers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TroughOrder {
    #[default]
    Parabolic,
    Quartic,
}

impl TroughOrder {
    fn exponent(self) -> i32 {
        match self {
            TroughOrder::Parabolic => 2,
            TroughOrder::Quartic => 4,
        }
    }
}

/// Evaluate the Busy Function at `x`
pub fn busy_function(params: &[f64; BUSY_PARAMETERS], order: TroughOrder, x: f64) -> f64 {
    let [a, b1, b2, c, xe0, xp0, w] = *params;
    (a / 4.0)
        * (erf(b1 * (w + x - xe0)) + 1.0)
        * (erf(b2 * (w + xe0 - x)) + 1.0)
        * (c * (x - xp0).powi(order.exponent()) + 1.0)
}

/// Fit outcome classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitQuality {
    /// Converged with all of `a, b1, b2, w` positive and `c` non-negative
    Good,
    /// Converged, but some parameters are zero or negative
    NonPhysical,
    /// The solver did not converge
    Failed,
}

impl FitQuality {
    pub fn code(self) -> i32 {
        match self {
            FitQuality::Good => 0,
            FitQuality::NonPhysical => 1,
            FitQuality::Failed => 2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BusyFitResult {
    pub params: [f64; BUSY_PARAMETERS],
    pub uncertainties: [f64; BUSY_PARAMETERS],
    pub reduced_chi2: f64,
    pub quality: FitQuality,
    /// Flux-weighted centre of the fitted curve, in channels
    pub centroid: f64,
    pub w50: f64,
    pub w20: f64,
    pub peak_flux: f64,
    /// Integral of the fitted curve over the spectral range
    pub integrated_flux: f64,
}

// Residuals and Jacobian of the Busy Function over one spectrum. Channels
// with infinite uncertainty contribute zero residual and a zero Jacobian
// row, so empty channels drop out of the fit.
struct BusyModel<'a> {
    values: &'a [f64],
    sigma: &'a [f64],
    order: TroughOrder,
}

impl BusyModel<'_> {
    fn params_array(params: &DVector<f64>) -> [f64; BUSY_PARAMETERS] {
        [
            params[0], params[1], params[2], params[3], params[4], params[5], params[6],
        ]
    }
}

impl LeastSquaresModel for BusyModel<'_> {
    fn sample_count(&self) -> usize {
        self.values.len()
    }

    fn residuals(&self, params: &DVector<f64>, out: &mut DVector<f64>) {
        let p = Self::params_array(params);
        for (i, (&y, &sigma)) in self.values.iter().zip(self.sigma).enumerate() {
            out[i] = if sigma.is_finite() {
                (busy_function(&p, self.order, i as f64) - y) / sigma
            } else {
                0.0
            };
        }
    }

    fn jacobian(&self, params: &DVector<f64>, out: &mut DMatrix<f64>) {
        let [a, b1, b2, c, xe0, xp0, w] = Self::params_array(params);
        let sqrt_pi = PI.sqrt();
        let n = self.order.exponent();

        for (i, &sigma) in self.sigma.iter().enumerate() {
            if !sigma.is_finite() {
                for j in 0..BUSY_PARAMETERS {
                    out[(i, j)] = 0.0;
                }
                continue;
            }

            let x = i as f64;
            let erf1 = erf(b1 * (w + x - xe0)) + 1.0;
            let erf2 = erf(b2 * (w + xe0 - x)) + 1.0;
            let para = c * (x - xp0).powi(n) + 1.0;
            let exp1 = (-(w + x - xe0) * (w + x - xe0) * b1 * b1).exp();
            let exp2 = (-(w - x + xe0) * (w - x + xe0) * b2 * b2).exp();

            out[(i, 0)] = 0.25 * erf1 * erf2 * para / sigma;
            out[(i, 1)] =
                a / (2.0 * sqrt_pi) * erf2 * para * (w + x - xe0) * exp1 / sigma;
            out[(i, 2)] =
                a / (2.0 * sqrt_pi) * erf1 * para * (w - x + xe0) * exp2 / sigma;
            out[(i, 3)] = (a / 4.0) * erf1 * erf2 * (xp0 - x).powi(n) / sigma;
            out[(i, 4)] = a / (2.0 * sqrt_pi)
                * (erf1 * para * b2 * exp2 - erf2 * para * b1 * exp1)
                / sigma;
            out[(i, 5)] = match self.order {
                TroughOrder::Parabolic => (a / 2.0) * erf1 * erf2 * (xp0 - x) * c / sigma,
                TroughOrder::Quartic => {
                    a * erf1 * erf2 * (xp0 - x).powi(3) * c / sigma
                }
            };
            out[(i, 6)] = a / (2.0 * sqrt_pi)
                * (erf1 * para * b2 * exp2 + erf2 * para * b1 * exp1)
                / sigma;
        }
    }
}

/// One Busy Function fitting problem: a spectrum, per-channel uncertainties
/// and the trough order.
#[derive(Debug, Clone)]
pub struct BusyFit {
    values: Vec<f64>,
    sigma: Vec<f64>,
    order: TroughOrder,
    free: [bool; BUSY_PARAMETERS],
    relax: bool,
}

impl BusyFit {
    pub fn new(
        values: Vec<f64>,
        sigma: Vec<f64>,
        order: TroughOrder,
    ) -> Result<Self, BusyFitError> {
        if values.is_empty() || sigma.is_empty() {
            return Err(BusyFitError::NoData);
        }
        if values.len() != sigma.len() {
            return Err(BusyFitError::LengthMismatch {
                values: values.len(),
                sigma: sigma.len(),
            });
        }
        if values.len() < MIN_CHANNELS {
            return Err(BusyFitError::InsufficientChannels(values.len()));
        }

        Ok(Self {
            values,
            sigma,
            order,
            free: [true; BUSY_PARAMETERS],
            relax: false,
        })
    }

    /// Mark a subset of the parameters as fixed at their initial estimate
    pub fn set_free_parameters(&mut self, free: [bool; BUSY_PARAMETERS]) {
        self.free = free;
    }

    /// Skip the no-polynomial retry when the trough fits negative or offset
    pub fn set_relax(&mut self, relax: bool) {
        self.relax = relax;
    }

    /// Run the fit from automatically derived initial estimates
    pub fn fit(&self) -> BusyFitResult {
        let initial = self.initial_estimates();
        self.fit_from(initial)
    }

    /// Run the fit from explicit initial estimates
    pub fn fit_from(&self, initial: [f64; BUSY_PARAMETERS]) -> BusyFitResult {
        let model = BusyModel {
            values: &self.values,
            sigma: &self.sigma,
            order: self.order,
        };
        let solver = LmSolver::default();

        let mut free = self.free;
        let mut outcome = solver.solve(&model, DVector::from_row_slice(&initial), &free);

        // Retry without the polynomial component when the trough fits
        // negative or its centre drifts away from the turnover centre.
        let init_w = initial[6];
        if !self.relax
            && (outcome.params[3] < 0.0
                || (outcome.params[4] - outcome.params[5]).abs() > 2.0 * init_w)
        {
            log::warn!("repeating Busy Function fit without polynomial component (c = 0)");
            let mut restart = initial;
            restart[3] = 0.0;
            restart[5] = 0.0;
            free[3] = false;
            free[5] = false;
            outcome = solver.solve(&model, DVector::from_row_slice(&restart), &free);
        }

        let params = BusyModel::params_array(&outcome.params);
        let uncertainties = BusyModel::params_array(&outcome.uncertainties);

        let quality = if !outcome.converged {
            FitQuality::Failed
        } else if params[0] <= 0.0
            || params[1] <= 0.0
            || params[2] <= 0.0
            || params[6] <= 0.0
            || params[3] < 0.0
        {
            FitQuality::NonPhysical
        } else {
            FitQuality::Good
        };

        let mut result = BusyFitResult {
            params,
            uncertainties,
            reduced_chi2: outcome.reduced_chi2,
            quality,
            centroid: 0.0,
            w50: 0.0,
            w20: 0.0,
            peak_flux: 0.0,
            integrated_flux: 0.0,
        };
        self.measure_curve(&mut result);
        result
    }

    // Plateau level from the derated peak; centre and width from the first
    // channels below 20% of the plateau on either side of the peak, with an
    // intensity-weighted moment fallback for very narrow profiles.
    fn initial_estimates(&self) -> [f64; BUSY_PARAMETERS] {
        let mut init_a = 0.0f64;
        let mut pos_max = 0usize;
        for (i, &value) in self.values.iter().enumerate() {
            if value > init_a {
                init_a = value;
                pos_max = i;
            }
        }
        init_a /= PEAK_DERATE;

        let threshold = FLANK_THRESHOLD * init_a;
        let mut left = pos_max;
        while left > 0 && self.values[left] > threshold {
            left -= 1;
        }
        let mut right = pos_max;
        while right < self.values.len() - 1 && self.values[right] > threshold {
            right += 1;
        }

        let (init_xe0, init_w);
        if right - left > 2 {
            init_xe0 = (right + left) as f64 / 2.0;
            init_w = (right - left - 2) as f64 / 2.0;
        } else {
            log::warn!("failed to find line flanks; falling back to moment estimates");
            let cut = MOMENT_THRESHOLD * init_a;
            let mut centre = 0.0;
            let mut sum = 0.0;
            for (i, &value) in self.values.iter().enumerate() {
                if value > cut {
                    centre += value * i as f64;
                    sum += value;
                }
            }
            centre /= sum;

            let mut width = 0.0;
            let mut sum_w = 0.0;
            for (i, &value) in self.values.iter().enumerate() {
                if value > cut {
                    width += value * (i as f64 - centre) * (i as f64 - centre);
                    sum_w += value;
                }
            }
            init_xe0 = centre;
            init_w = (width / sum_w).sqrt();
        }

        [init_a, 0.5, 0.5, 0.01, init_xe0, init_xe0, init_w]
    }

    // Peak, widths, integral and centroid from dense sampling of the fitted
    // curve over the full spectral range.
    fn measure_curve(&self, result: &mut BusyFitResult) {
        if result.params[0] == 0.0 {
            return;
        }

        let limit = self.values.len() as f64;
        let step = limit / CURVE_SAMPLES;
        let curve = |x: f64| busy_function(&result.params, self.order, x);

        let mut peak = 0.0f64;
        let mut x = 0.0;
        while x < limit {
            peak = peak.max(curve(x));
            x += step;
        }
        result.peak_flux = peak;

        // Widths from threshold crossings scanned inwards from both ends.
        let mut current = 0.0;
        while current < limit && curve(current) < peak / 5.0 {
            current += step;
        }
        let w20_lo = current;
        while current < limit && curve(current) < peak / 2.0 {
            current += step;
        }
        let w50_lo = current;

        current = limit;
        while current > w20_lo && curve(current) < peak / 5.0 {
            current -= step;
        }
        result.w20 = current - w20_lo;
        while current > w50_lo && curve(current) < peak / 2.0 {
            current -= step;
        }
        result.w50 = current - w50_lo;

        let mut integral = 0.0;
        let mut weighted = 0.0;
        x = 0.0;
        while x < limit {
            let value = curve(x);
            integral += value;
            weighted += value * x;
            x += step;
        }
        result.centroid = weighted / integral;
        result.integrated_flux = integral * step;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const TRUE_PARAMS: [f64; BUSY_PARAMETERS] = [4.0, 0.8, 0.8, 0.002, 30.0, 30.0, 12.0];

    fn synthetic_spectrum(n: usize) -> (Vec<f64>, Vec<f64>) {
        let values: Vec<f64> = (0..n)
            .map(|i| busy_function(&TRUE_PARAMS, TroughOrder::Parabolic, i as f64))
            .collect();
        let sigma = vec![0.05; n];
        (values, sigma)
    }

    #[test]
    fn input_validation() {
        assert_eq!(
            BusyFit::new(vec![], vec![], TroughOrder::Parabolic).unwrap_err(),
            BusyFitError::NoData
        );
        assert_eq!(
            BusyFit::new(vec![1.0; 5], vec![0.1; 5], TroughOrder::Parabolic).unwrap_err(),
            BusyFitError::InsufficientChannels(5)
        );
        assert_eq!(
            BusyFit::new(vec![1.0; 12], vec![0.1; 10], TroughOrder::Parabolic).unwrap_err(),
            BusyFitError::LengthMismatch {
                values: 12,
                sigma: 10
            }
        );
    }

    #[test]
    fn recovers_synthetic_parameters() {
        let (values, sigma) = synthetic_spectrum(61);
        let fit = BusyFit::new(values, sigma, TroughOrder::Parabolic).unwrap();
        let result = fit.fit();

        assert_eq!(result.quality, FitQuality::Good);
        for (&fitted, &truth) in result.params.iter().zip(TRUE_PARAMS.iter()) {
            assert_relative_eq!(fitted, truth, epsilon = 0.05 * truth.abs().max(0.01));
        }
        assert!(result.reduced_chi2 < 1.0);
    }

    #[test]
    fn derived_quantities_are_consistent() {
        let (values, sigma) = synthetic_spectrum(61);
        let fit = BusyFit::new(values, sigma, TroughOrder::Parabolic).unwrap();
        let result = fit.fit();

        assert_relative_eq!(result.centroid, 30.0, epsilon = 0.5);
        assert!(result.w20 > result.w50);
        assert!(result.w50 > 20.0 && result.w50 < 32.0);
        assert!(result.peak_flux > 0.0);
        assert!(result.integrated_flux > result.peak_flux);
    }

    #[test]
    fn infinite_sigma_channels_are_ignored() {
        let (values, mut sigma) = synthetic_spectrum(61);
        sigma[0] = f64::INFINITY;
        sigma[60] = f64::INFINITY;

        let fit = BusyFit::new(values, sigma, TroughOrder::Parabolic).unwrap();
        let result = fit.fit();
        assert_eq!(result.quality, FitQuality::Good);
        assert_relative_eq!(result.params[4], 30.0, epsilon = 1.0);
    }

    #[test]
    fn fixed_parameters_stay_at_estimate() {
        let (values, sigma) = synthetic_spectrum(61);
        let mut fit = BusyFit::new(values, sigma, TroughOrder::Parabolic).unwrap();
        fit.set_free_parameters([true, true, true, false, true, false, true]);
        fit.set_relax(true);

        let initial = [2.5, 0.5, 0.5, 0.0, 28.0, 0.0, 10.0];
        let result = fit.fit_from(initial);
        assert_eq!(result.params[3], 0.0);
        assert_eq!(result.params[5], 0.0);
        assert_eq!(result.uncertainties[3], 0.0);
    }

    #[test]
    fn quartic_trough_evaluates() {
        let params = [4.0, 0.8, 0.8, 1.0e-5, 30.0, 30.0, 12.0];
        let parabolic = busy_function(&params, TroughOrder::Parabolic, 20.0);
        let quartic = busy_function(&params, TroughOrder::Quartic, 20.0);
        assert!(quartic > parabolic);
    }
}
