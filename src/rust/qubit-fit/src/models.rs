// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Tune-up model functions.
//!
//! Each model takes `x` and a parameter slice. Trailing parameters are
//! optional and fall back to the documented default when the slice is
//! shorter, which is how a fit keeps them fixed.

use std::fmt;
use std::str::FromStr;

/// Signature shared by all fit models.
pub type ModelFn = fn(f64, &[f64]) -> f64;

#[inline]
fn param_or(params: &[f64], index: usize, default: f64) -> f64 {
    params.get(index).copied().unwrap_or(default)
}

/// `amp * cos(freq * x + phase) + off`, parameters `[freq, phase, amp=1, off=0]`.
pub fn func_osc(x: f64, params: &[f64]) -> f64 {
    let (freq, phase) = (params[0], params[1]);
    let amp = param_or(params, 2, 1.0);
    let off = param_or(params, 3, 0.0);
    amp * (freq * x + phase).cos() + off
}

/// Exponentially damped oscillation, parameters
/// `[freq, phase, rate, amp=1, off=-0.5]`.
pub fn func_decay_osc(x: f64, params: &[f64]) -> f64 {
    let (freq, phase, rate) = (params[0], params[1], params[2]);
    let amp = param_or(params, 3, 1.0);
    let off = param_or(params, 4, -0.5);
    amp * (freq * x + phase).cos() * (-rate * x).exp() + off
}

/// `amp * exp(-rate * x) + off`, parameters `[rate, off, amp=1]`.
pub fn func_exp(x: f64, params: &[f64]) -> f64 {
    let (rate, off) = (params[0], params[1]);
    let amp = param_or(params, 2, 1.0);
    amp * (-rate * x).exp() + off
}

/// Lorentzian peak, parameters `[width, pos, amp, off]`.
pub fn func_lorentz(x: f64, params: &[f64]) -> f64 {
    let (width, pos, amp, off) = (params[0], params[1], params[2], params[3]);
    off + amp * width.powi(2) / (width.powi(2) + (x - pos).powi(2))
}

/// Lorentzian dip, parameters `[width, pos, amp, off=1]`.
pub fn func_inv_lorentz(x: f64, params: &[f64]) -> f64 {
    let (width, pos, amp) = (params[0], params[1], params[2]);
    let off = param_or(params, 3, 1.0);
    off - amp * width.powi(2) / (width.powi(2) + (x - pos).powi(2))
}

/// Fano resonance, parameters `[width, pos, amp, fano=0, off=0.5]`.
pub fn func_fano(x: f64, params: &[f64]) -> f64 {
    let (width, pos, amp) = (params[0], params[1], params[2]);
    let fano = param_or(params, 3, 0.0);
    let off = param_or(params, 4, 0.5);
    off + amp * (fano * width + x - pos).powi(2) / (width.powi(2) + (x - pos).powi(2))
}

/// A model function together with the number of parameters it accepts.
#[derive(Debug, Clone, Copy)]
pub struct Model {
    name: &'static str,
    function: ModelFn,
    min_params: usize,
    max_params: usize,
}

impl Model {
    pub const fn new(
        name: &'static str,
        function: ModelFn,
        min_params: usize,
        max_params: usize,
    ) -> Self {
        Model {
            name,
            function,
            min_params,
            max_params,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn function(&self) -> ModelFn {
        self.function
    }

    pub fn check_param_count(&self, count: usize) -> crate::Result<()> {
        if !(self.min_params..=self.max_params).contains(&count) {
            return Err(crate::Error::ParameterCount {
                model: self.name,
                min: self.min_params,
                max: self.max_params,
                got: count,
            });
        }
        Ok(())
    }
}

impl From<ModelKind> for Model {
    fn from(kind: ModelKind) -> Self {
        kind.model()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelKind {
    Osc,
    DecayOsc,
    Exp,
    Lorentz,
    InvLorentz,
    Fano,
}

impl ModelKind {
    pub const ALL: [ModelKind; 6] = [
        ModelKind::Osc,
        ModelKind::DecayOsc,
        ModelKind::Exp,
        ModelKind::Lorentz,
        ModelKind::InvLorentz,
        ModelKind::Fano,
    ];

    pub fn function(&self) -> ModelFn {
        match self {
            ModelKind::Osc => func_osc,
            ModelKind::DecayOsc => func_decay_osc,
            ModelKind::Exp => func_exp,
            ModelKind::Lorentz => func_lorentz,
            ModelKind::InvLorentz => func_inv_lorentz,
            ModelKind::Fano => func_fano,
        }
    }

    /// Parameter names in slice order. The first `required_params` are
    /// mandatory.
    pub fn param_names(&self) -> &'static [&'static str] {
        match self {
            ModelKind::Osc => &["freq", "phase", "amp", "off"],
            ModelKind::DecayOsc => &["freq", "phase", "rate", "amp", "off"],
            ModelKind::Exp => &["rate", "off", "amp"],
            ModelKind::Lorentz => &["width", "pos", "amp", "off"],
            ModelKind::InvLorentz => &["width", "pos", "amp", "off"],
            ModelKind::Fano => &["width", "pos", "amp", "fano", "off"],
        }
    }

    pub fn required_params(&self) -> usize {
        match self {
            ModelKind::Osc | ModelKind::Exp => 2,
            ModelKind::DecayOsc | ModelKind::InvLorentz | ModelKind::Fano => 3,
            ModelKind::Lorentz => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Osc => "osc",
            ModelKind::DecayOsc => "decay-osc",
            ModelKind::Exp => "exp",
            ModelKind::Lorentz => "lorentz",
            ModelKind::InvLorentz => "inv-lorentz",
            ModelKind::Fano => "fano",
        }
    }

    pub fn model(&self) -> Model {
        Model::new(
            self.as_str(),
            self.function(),
            self.required_params(),
            self.param_names().len(),
        )
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        let normalized = s.trim().to_lowercase().replace('_', "-");
        ModelKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| anyhow::anyhow!("Unknown fit model '{s}'").into())
    }
}
