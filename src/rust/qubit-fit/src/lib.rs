// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Model functions and least-squares fits for qubit characterization.

pub mod fit;
pub mod models;
pub mod tuneup;

pub use fit::{Bounds, FitOptions, FitResult, curve_fit, curve_fit_with};
pub use models::{
    Model, ModelFn, ModelKind, func_decay_osc, func_exp, func_fano, func_inv_lorentz,
    func_lorentz, func_osc,
};
pub use tuneup::{
    RabiGuess, RamseyGuess, ResSpecGuess, SpecGuess, T1Guess, fit_model, fit_rabi, fit_ramsey,
    fit_res_spec, fit_spec, fit_t1,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("x and y must have the same length, got {x} and {y}")]
    LengthMismatch { x: usize, y: usize },
    #[error("{points} data points are not enough to fit {params} parameters")]
    TooFewPoints { points: usize, params: usize },
    #[error("Data or initial guess contains non-finite values")]
    NonFinite,
    #[error("Invalid bounds: {0}")]
    InvalidBounds(String),
    #[error("Normal matrix is singular, the parameters cannot be determined independently")]
    Singular,
    #[error("Fit did not converge within {0} iterations")]
    NoConvergence(usize),
    #[error("Model '{model}' takes {min} to {max} parameters, got {got}")]
    ParameterCount {
        model: &'static str,
        min: usize,
        max: usize,
        got: usize,
    },
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
