// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Nonlinear least squares with the Levenberg-Marquardt algorithm.

use std::cmp::Ordering;

use labone_log::debug;
use nalgebra::{DMatrix, DVector};

use crate::models::{Model, ModelFn};
use crate::{Error, Result};

const MIN_DIAGONAL: f64 = 1e-12;
const MAX_DAMPING: f64 = 1e16;

/// Box constraints on the fitted parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Bounds {
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl Bounds {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>) -> Self {
        Bounds { lower, upper }
    }

    fn validate(&self, num_params: usize) -> Result<()> {
        if self.lower.len() != num_params || self.upper.len() != num_params {
            return Err(Error::InvalidBounds(format!(
                "expected {num_params} lower and upper bounds, got {} and {}",
                self.lower.len(),
                self.upper.len()
            )));
        }
        let ordered = |i: usize| {
            matches!(
                self.lower[i].partial_cmp(&self.upper[i]),
                Some(Ordering::Less | Ordering::Equal)
            )
        };
        if let Some(i) = (0..num_params).find(|&i| !ordered(i)) {
            return Err(Error::InvalidBounds(format!(
                "lower bound {} exceeds upper bound {} for parameter {i}",
                self.lower[i], self.upper[i]
            )));
        }
        Ok(())
    }

    fn project(&self, params: &mut DVector<f64>) {
        for (i, p) in params.iter_mut().enumerate() {
            *p = p.clamp(self.lower[i], self.upper[i]);
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FitOptions {
    pub max_iterations: usize,
    /// Relative reduction of the residual sum of squares below which the
    /// fit is converged.
    pub ftol: f64,
    /// Relative step size below which the fit is converged.
    pub xtol: f64,
    /// Largest gradient component below which the fit is converged.
    pub gtol: f64,
    pub initial_damping: f64,
}

impl Default for FitOptions {
    fn default() -> Self {
        FitOptions {
            max_iterations: 1000,
            ftol: 1e-12,
            xtol: 1e-12,
            gtol: 1e-14,
            initial_damping: 1e-3,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FitResult {
    pub params: Vec<f64>,
    /// Estimated covariance of `params`, row-major `p x p`.
    pub covariance: DMatrix<f64>,
    pub residual_sum_of_squares: f64,
    pub iterations: usize,
    model: ModelFn,
}

impl FitResult {
    /// One standard deviation errors of `params`.
    pub fn std_errors(&self) -> Vec<f64> {
        self.covariance.diagonal().iter().map(|v| v.sqrt()).collect()
    }

    /// Evaluate the fitted model at `x`.
    pub fn model_curve(&self, x: &[f64]) -> Vec<f64> {
        x.iter().map(|&x| (self.model)(x, &self.params)).collect()
    }
}

struct Problem<'a> {
    model: ModelFn,
    x: &'a [f64],
    y: &'a [f64],
}

impl Problem<'_> {
    fn residuals(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.x.len(),
            self.x
                .iter()
                .zip(self.y)
                .map(|(&x, &y)| y - (self.model)(x, params.as_slice())),
        )
    }

    fn evaluate(&self, params: &DVector<f64>) -> Vec<f64> {
        self.x
            .iter()
            .map(|&x| (self.model)(x, params.as_slice()))
            .collect()
    }

    /// Jacobian of the model by central differences.
    fn jacobian(&self, params: &DVector<f64>) -> DMatrix<f64> {
        let step_scale = f64::EPSILON.cbrt();
        let mut jac = DMatrix::zeros(self.x.len(), params.len());
        let mut shifted = params.clone();
        for (j, &value) in params.iter().enumerate() {
            let h = step_scale * value.abs().max(1.0);
            shifted[j] = value + h;
            let upper = self.evaluate(&shifted);
            shifted[j] = value - h;
            let lower = self.evaluate(&shifted);
            shifted[j] = value;
            for (i, (u, l)) in upper.iter().zip(&lower).enumerate() {
                jac[(i, j)] = (u - l) / (2.0 * h);
            }
        }
        jac
    }
}

fn solve_damped(
    normal: &DMatrix<f64>,
    gradient: &DVector<f64>,
    damping: f64,
) -> Option<DVector<f64>> {
    let mut damped = normal.clone();
    for i in 0..damped.nrows() {
        damped[(i, i)] += damping * normal[(i, i)].max(MIN_DIAGONAL);
    }
    match damped.clone().cholesky() {
        Some(cholesky) => Some(cholesky.solve(gradient)),
        None => damped.lu().solve(gradient),
    }
}

/// Fit `model` to `(x, y)` starting from `p0`, which holds between the
/// required and the total number of model parameters.
///
/// The covariance is `(JᵀJ)⁻¹ · RSS / (n - p)`; with as many points as
/// parameters it cannot be estimated and is filled with infinity.
pub fn curve_fit(
    model: &Model,
    x: &[f64],
    y: &[f64],
    p0: &[f64],
    bounds: Option<&Bounds>,
) -> Result<FitResult> {
    curve_fit_with(model, x, y, p0, bounds, &FitOptions::default())
}

pub fn curve_fit_with(
    model: &Model,
    x: &[f64],
    y: &[f64],
    p0: &[f64],
    bounds: Option<&Bounds>,
    options: &FitOptions,
) -> Result<FitResult> {
    if x.len() != y.len() {
        return Err(Error::LengthMismatch {
            x: x.len(),
            y: y.len(),
        });
    }
    if p0.is_empty() {
        return Err(anyhow::anyhow!("At least one parameter must be fitted").into());
    }
    model.check_param_count(p0.len())?;
    if x.len() < p0.len() {
        return Err(Error::TooFewPoints {
            points: x.len(),
            params: p0.len(),
        });
    }
    if x.iter().chain(y).chain(p0).any(|v| !v.is_finite()) {
        return Err(Error::NonFinite);
    }
    if let Some(bounds) = bounds {
        bounds.validate(p0.len())?;
    }

    let model = model.function();
    let problem = Problem { model, x, y };
    let mut params = DVector::from_column_slice(p0);
    if let Some(bounds) = bounds {
        bounds.project(&mut params);
    }
    let mut residuals = problem.residuals(&params);
    let mut rss = residuals.norm_squared();
    if !rss.is_finite() {
        return Err(Error::NonFinite);
    }
    let mut damping = options.initial_damping;
    let mut converged = rss == 0.0;
    let mut iterations = 0;

    while !converged {
        if iterations == options.max_iterations {
            return Err(Error::NoConvergence(options.max_iterations));
        }
        iterations += 1;

        let jac = problem.jacobian(&params);
        let gradient = jac.tr_mul(&residuals);
        if gradient.amax() <= options.gtol {
            break;
        }
        let normal = jac.tr_mul(&jac);

        loop {
            let Some(step) = solve_damped(&normal, &gradient, damping) else {
                return Err(Error::Singular);
            };
            let mut candidate = &params + &step;
            if let Some(bounds) = bounds {
                bounds.project(&mut candidate);
            }
            let candidate_residuals = problem.residuals(&candidate);
            let candidate_rss = candidate_residuals.norm_squared();

            if candidate_rss.is_finite() && candidate_rss < rss {
                let applied_step = (&candidate - &params).norm();
                converged = rss - candidate_rss <= options.ftol * rss
                    || applied_step <= options.xtol * (params.norm() + options.xtol)
                    || candidate_rss == 0.0;
                params = candidate;
                residuals = candidate_residuals;
                rss = candidate_rss;
                damping = (damping / 10.0).max(f64::EPSILON);
                break;
            }
            damping *= 10.0;
            if damping > MAX_DAMPING {
                // no step along the gradient improves the fit any more
                converged = true;
                break;
            }
        }
    }

    let jac = problem.jacobian(&params);
    let normal = jac.tr_mul(&jac);
    let inverse = normal.try_inverse().ok_or(Error::Singular)?;
    let dof = x.len() - p0.len();
    let covariance = if dof > 0 {
        inverse * (rss / dof as f64)
    } else {
        DMatrix::from_element(p0.len(), p0.len(), f64::INFINITY)
    };
    debug!(
        "Fit converged after {} iterations, residual sum of squares {:e}",
        iterations,
        rss
    );

    Ok(FitResult {
        params: params.iter().copied().collect(),
        covariance,
        residual_sum_of_squares: rss,
        iterations,
        model,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ModelKind, func_exp, func_lorentz};

    fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| start + (stop - start) * i as f64 / (n - 1) as f64)
            .collect()
    }

    fn line(x: f64, p: &[f64]) -> f64 {
        p[0] * x + p[1]
    }

    // second parameter has no effect
    fn degenerate(x: f64, p: &[f64]) -> f64 {
        p[0] * x
    }

    const LINE: Model = Model::new("line", line, 2, 2);
    const DEGENERATE: Model = Model::new("degenerate", degenerate, 2, 2);

    #[test]
    fn test_linear_fit_is_exact() {
        let x = linspace(0.0, 1.0, 11);
        let y: Vec<f64> = x.iter().map(|&x| line(x, &[2.0, -1.0])).collect();
        let fit = curve_fit(&LINE, &x, &y, &[0.0, 0.0], None).unwrap();
        assert!((fit.params[0] - 2.0).abs() < 1e-8);
        assert!((fit.params[1] + 1.0).abs() < 1e-8);
        assert!(fit.residual_sum_of_squares < 1e-16);
    }

    #[test]
    fn test_exponential_decay_with_noise() {
        let x = linspace(0.0, 10.0, 200);
        let truth = [0.45, 0.05, 0.9];
        let y: Vec<f64> = x
            .iter()
            .map(|&x| func_exp(x, &truth) + 0.01 * (37.0 * x).sin())
            .collect();
        let fit = curve_fit(&ModelKind::Exp.model(), &x, &y, &[0.3, 0.0, 1.0], None).unwrap();
        for (fitted, expected) in fit.params.iter().zip(truth) {
            assert!((fitted - expected).abs() < 0.02, "{fitted} vs {expected}");
        }
        let errors = fit.std_errors();
        assert!(errors.iter().all(|e| *e > 0.0 && e.is_finite()));
        let curve = fit.model_curve(&x);
        assert_eq!(curve.len(), x.len());
        let rss: f64 = curve.iter().zip(&y).map(|(c, y)| (c - y).powi(2)).sum();
        assert!((rss - fit.residual_sum_of_squares).abs() < 1e-12);
    }

    #[test]
    fn test_bounds_are_respected() {
        let x = linspace(0.0, 10.0, 101);
        let y: Vec<f64> = x.iter().map(|&x| func_lorentz(x, &[1.0, 5.0, 1.0, 0.0])).collect();
        let bounds = Bounds::new(vec![0.1, 0.0, 0.0, -1.0], vec![10.0, 4.5, 10.0, 1.0]);
        let lorentz = ModelKind::Lorentz.model();
        let fit = curve_fit(&lorentz, &x, &y, &[1.2, 4.0, 0.8, 0.0], Some(&bounds)).unwrap();
        assert!(fit.params[1] <= 4.5);
        for (i, p) in fit.params.iter().enumerate() {
            assert!(*p >= bounds.lower[i] && *p <= bounds.upper[i]);
        }
    }

    #[test]
    fn test_input_validation() {
        let x = [0.0, 1.0, 2.0];
        assert!(matches!(
            curve_fit(&LINE, &x, &[0.0, 1.0], &[1.0, 0.0], None),
            Err(Error::LengthMismatch { x: 3, y: 2 })
        ));
        assert!(matches!(
            curve_fit(&LINE, &x[..1], &[0.0], &[1.0, 0.0], None),
            Err(Error::TooFewPoints { .. })
        ));
        assert!(matches!(
            curve_fit(&LINE, &x, &[0.0, f64::NAN, 1.0], &[1.0, 0.0], None),
            Err(Error::NonFinite)
        ));
        let inverted = Bounds::new(vec![1.0, 0.0], vec![0.0, 1.0]);
        assert!(matches!(
            curve_fit(&LINE, &x, &[0.0, 1.0, 2.0], &[1.0, 0.0], Some(&inverted)),
            Err(Error::InvalidBounds(_))
        ));
    }

    #[test]
    fn test_unidentifiable_parameters_are_singular() {
        let x = linspace(0.0, 1.0, 10);
        let y: Vec<f64> = x.iter().map(|&x| 3.0 * x + 0.1 * (5.0 * x).cos()).collect();
        assert!(matches!(
            curve_fit(&DEGENERATE, &x, &y, &[1.0, 1.0], None),
            Err(Error::Singular)
        ));
    }

    #[test]
    fn test_exact_determination_has_infinite_covariance() {
        let x = [0.0, 1.0];
        let fit = curve_fit(&LINE, &x, &[1.0, 3.0], &[0.0, 0.0], None).unwrap();
        assert!((fit.params[0] - 2.0).abs() < 1e-8);
        assert!(fit.covariance.iter().all(|v| v.is_infinite()));
    }

    #[test]
    fn test_short_initial_guess_is_rejected() {
        let x = linspace(0.0, 10.0, 20);
        let y: Vec<f64> = x.iter().map(|&x| func_lorentz(x, &[1.0, 5.0, 1.0, 0.0])).collect();
        let lorentz = ModelKind::Lorentz.model();
        assert!(matches!(
            curve_fit(&lorentz, &x, &y, &[1.0], None),
            Err(Error::ParameterCount {
                model: "lorentz",
                min: 4,
                max: 4,
                got: 1
            })
        ));
        assert!(matches!(
            curve_fit(&LINE, &x, &y, &[1.0, 0.0, 0.0], None),
            Err(Error::ParameterCount { got: 3, .. })
        ));
        let short_bounds = Bounds::new(vec![0.0], vec![1.0]);
        assert!(matches!(
            curve_fit(&LINE, &x, &y, &[1.0, 0.0], Some(&short_bounds)),
            Err(Error::InvalidBounds(_))
        ));
    }
}
