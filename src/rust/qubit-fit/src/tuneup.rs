// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Fits for the standard qubit tune-up measurements.
//!
//! Optional guesses are trailing: a parameter is only fitted when all
//! parameters before it are, otherwise it stays at the model default.

use crate::Result;
use crate::fit::{Bounds, FitResult, curve_fit};
use crate::models::ModelKind;

fn initial_guess(required: &[f64], optional: &[Option<f64>]) -> Vec<f64> {
    required
        .iter()
        .copied()
        .chain(optional.iter().map_while(|p| *p))
        .collect()
}

/// Fit any model by kind. `p0` decides how many trailing parameters are
/// fitted.
pub fn fit_model(
    kind: ModelKind,
    x: &[f64],
    y: &[f64],
    p0: &[f64],
    bounds: Option<&Bounds>,
) -> Result<FitResult> {
    curve_fit(&kind.model(), x, y, p0, bounds)
}

/// Initial guess for Rabi oscillations (`func_osc`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RabiGuess {
    pub freq: f64,
    pub phase: f64,
    pub amp: Option<f64>,
    pub off: Option<f64>,
}

pub fn fit_rabi(
    x: &[f64],
    y: &[f64],
    guess: &RabiGuess,
    bounds: Option<&Bounds>,
) -> Result<FitResult> {
    let p0 = initial_guess(&[guess.freq, guess.phase], &[guess.amp, guess.off]);
    fit_model(ModelKind::Osc, x, y, &p0, bounds)
}

/// Initial guess for Ramsey fringes (`func_decay_osc`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RamseyGuess {
    pub freq: f64,
    pub phase: f64,
    pub rate: f64,
    pub amp: Option<f64>,
    pub off: Option<f64>,
}

pub fn fit_ramsey(
    x: &[f64],
    y: &[f64],
    guess: &RamseyGuess,
    bounds: Option<&Bounds>,
) -> Result<FitResult> {
    let p0 = initial_guess(&[guess.freq, guess.phase, guess.rate], &[guess.amp, guess.off]);
    fit_model(ModelKind::DecayOsc, x, y, &p0, bounds)
}

/// Initial guess for energy relaxation (`func_exp`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct T1Guess {
    pub rate: f64,
    pub off: f64,
    pub amp: Option<f64>,
}

pub fn fit_t1(
    x: &[f64],
    y: &[f64],
    guess: &T1Guess,
    bounds: Option<&Bounds>,
) -> Result<FitResult> {
    let p0 = initial_guess(&[guess.rate, guess.off], &[guess.amp]);
    fit_model(ModelKind::Exp, x, y, &p0, bounds)
}

/// Initial guess for a spectroscopy peak (`func_lorentz`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpecGuess {
    pub width: f64,
    pub pos: f64,
    pub amp: f64,
    /// Fitted in any case, starting from 0 when not given.
    pub off: Option<f64>,
}

pub fn fit_spec(
    x: &[f64],
    y: &[f64],
    guess: &SpecGuess,
    bounds: Option<&Bounds>,
) -> Result<FitResult> {
    let p0 = [guess.width, guess.pos, guess.amp, guess.off.unwrap_or(0.0)];
    fit_model(ModelKind::Lorentz, x, y, &p0, bounds)
}

/// Initial guess for resonator spectroscopy (`func_fano`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResSpecGuess {
    pub width: f64,
    pub pos: f64,
    pub amp: f64,
    pub fano: f64,
    pub off: Option<f64>,
}

pub fn fit_res_spec(
    x: &[f64],
    y: &[f64],
    guess: &ResSpecGuess,
    bounds: Option<&Bounds>,
) -> Result<FitResult> {
    let p0 = initial_guess(&[guess.width, guess.pos, guess.amp, guess.fano], &[guess.off]);
    fit_model(ModelKind::Fano, x, y, &p0, bounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use crate::models::{func_decay_osc, func_exp, func_fano, func_lorentz, func_osc};

    fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| start + (stop - start) * i as f64 / (n - 1) as f64)
            .collect()
    }

    fn sample(model: fn(f64, &[f64]) -> f64, x: &[f64], params: &[f64]) -> Vec<f64> {
        x.iter().map(|&x| model(x, params)).collect()
    }

    fn assert_close(actual: &[f64], expected: &[f64], tol: f64) {
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < tol, "{actual:?} vs {expected:?}");
        }
    }

    #[test]
    fn test_trailing_guesses() {
        assert_eq!(initial_guess(&[1.0], &[Some(2.0), Some(3.0)]), [1.0, 2.0, 3.0]);
        assert_eq!(initial_guess(&[1.0], &[None, Some(3.0)]), [1.0]);
        assert_eq!(initial_guess(&[1.0], &[Some(2.0), None]), [1.0, 2.0]);
    }

    #[test]
    fn test_rabi() {
        let x = linspace(0.0, 10.0, 120);
        let truth = [1.3, 0.4, 0.8, 0.1];
        let y = sample(func_osc, &x, &truth);
        let guess = RabiGuess {
            freq: 1.25,
            phase: 0.3,
            amp: Some(1.0),
            off: Some(0.0),
        };
        let result = fit_rabi(&x, &y, &guess, None).unwrap();
        assert_close(&result.params, &truth, 1e-6);

        let fixed = RabiGuess {
            amp: None,
            ..guess
        };
        let y = sample(func_osc, &x, &[1.3, 0.4]);
        let result = fit_rabi(&x, &y, &fixed, None).unwrap();
        assert_close(&result.params, &[1.3, 0.4], 1e-6);
    }

    #[test]
    fn test_ramsey() {
        let x = linspace(0.0, 8.0, 160);
        let truth = [2.1, 0.2, 0.35, 0.45, -0.5];
        let y = sample(func_decay_osc, &x, &truth);
        let guess = RamseyGuess {
            freq: 2.05,
            phase: 0.1,
            rate: 0.3,
            amp: Some(0.5),
            off: Some(-0.45),
        };
        let result = fit_ramsey(&x, &y, &guess, None).unwrap();
        assert_close(&result.params, &truth, 1e-6);
    }

    #[test]
    fn test_t1() {
        let x = linspace(0.0, 20.0, 100);
        let truth = [0.2, 0.05, 0.95];
        let y = sample(func_exp, &x, &truth);
        let guess = T1Guess {
            rate: 0.1,
            off: 0.0,
            amp: Some(1.0),
        };
        let result = fit_t1(&x, &y, &guess, None).unwrap();
        assert_close(&result.params, &truth, 1e-6);
    }

    #[test]
    fn test_spec_defaults_offset() {
        let x = linspace(4.0, 6.0, 101);
        let truth = [0.1, 5.02, 1.5, 0.0];
        let y = sample(func_lorentz, &x, &truth);
        let guess = SpecGuess {
            width: 0.15,
            pos: 5.0,
            amp: 1.2,
            off: None,
        };
        let result = fit_spec(&x, &y, &guess, None).unwrap();
        assert_eq!(result.params.len(), 4);
        assert_close(&result.params, &truth, 1e-6);
    }

    #[test]
    fn test_res_spec() {
        let x = linspace(6.9, 7.1, 201);
        let truth = [0.01, 7.0, 0.4, 0.3, 0.2];
        let y = sample(func_fano, &x, &truth);
        let guess = ResSpecGuess {
            width: 0.012,
            pos: 7.001,
            amp: 0.35,
            fano: 0.25,
            off: Some(0.25),
        };
        let result = fit_res_spec(&x, &y, &guess, None).unwrap();
        assert_close(&result.params, &truth, 1e-5);
    }

    #[test]
    fn test_fit_model_checks_parameter_count() {
        let x = linspace(0.0, 1.0, 10);
        let y = x.clone();
        assert!(matches!(
            fit_model(ModelKind::Lorentz, &x, &y, &[1.0, 0.5], None),
            Err(Error::ParameterCount { .. })
        ));
    }
}
