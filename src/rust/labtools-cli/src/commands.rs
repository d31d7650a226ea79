// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use labone_instruments::{ImpedanceMap, bias_frequency_map};
use labone_log::info;
use labone_session::simulated::SimulatedSession;
use labone_session::{ImpedanceSample, NodeData, NodePath, NodeValue};
use num_complex::Complex;
use qubit_fit::{FitResult, ModelKind, fit_model};
use serde::Deserialize;

use crate::config::LabConfig;

/// Readout program for `channels`. `states` holds one 0/1 entry per
/// channel.
pub fn readout_program(
    channels: &[usize],
    frequencies: &[f64],
    averages: u32,
    states: Option<&[u8]>,
) -> Result<String> {
    let states = states
        .map(|states| {
            states
                .iter()
                .map(|&s| match s {
                    0 => Ok(false),
                    1 => Ok(true),
                    _ => bail!("Qubit states are 0 or 1, got {s}"),
                })
                .collect::<Result<Vec<_>>>()
        })
        .transpose()?;
    let program = seqc_programs::sequence_multiplexed_readout(
        channels,
        frequencies,
        averages,
        states.as_deref(),
    )?;
    Ok(program)
}

#[derive(Debug, Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

/// Read the `x` and `y` columns of a CSV file with a header row.
pub fn read_xy(path: &Path) -> Result<(Vec<f64>, Vec<f64>)> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut x = vec![];
    let mut y = vec![];
    for (line, row) in reader.deserialize::<Point>().enumerate() {
        let point =
            row.with_context(|| format!("{}: bad data row {}", path.display(), line + 1))?;
        x.push(point.x);
        y.push(point.y);
    }
    Ok((x, y))
}

pub fn fit_csv(model: ModelKind, path: &Path, p0: &[f64]) -> Result<FitResult> {
    let (x, y) = read_xy(path)?;
    let result = fit_model(model, &x, &y, p0, None)?;
    info!(
        "Fitted {} to {} points in {} iterations",
        model,
        x.len(),
        result.iterations
    );
    Ok(result)
}

pub fn format_fit(model: ModelKind, result: &FitResult) -> String {
    let mut out = String::new();
    for ((name, value), error) in model
        .param_names()
        .iter()
        .zip(&result.params)
        .zip(result.std_errors())
    {
        let _ = writeln!(out, "{name:>6} = {value:.6e} +/- {error:.2e}");
    }
    out
}

/// Parallel RC with a bias dependent junction capacitance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RcModel {
    pub resistance: f64,
    pub capacitance: f64,
    pub built_in_potential: f64,
}

impl Default for RcModel {
    fn default() -> Self {
        RcModel {
            resistance: 10e6,
            capacitance: 100e-12,
            built_in_potential: 0.7,
        }
    }
}

impl RcModel {
    pub fn capacitance_at(&self, bias: f64) -> f64 {
        self.capacitance / (1.0 + bias / self.built_in_potential).sqrt()
    }

    pub fn impedance(&self, bias: f64, frequency: f64) -> Complex<f64> {
        let omega = 2.0 * std::f64::consts::PI * frequency;
        Complex::new(1.0 / self.resistance, omega * self.capacitance_at(bias)).inv()
    }
}

/// Impedance analyzer stand-in that answers polls of `imps/<n>/sample`
/// from the current bias and frequency.
pub fn simulated_analyzer(
    device: &str,
    imp_index: usize,
    model: RcModel,
) -> Result<SimulatedSession> {
    let imp = |node: &str| NodePath::device(device, &format!("imps/{imp_index}/{node}"));
    let (sample, bias, frequency) = (imp("sample")?, imp("bias/value")?, imp("freq")?);
    let session = SimulatedSession::new()
        .with_device(device, "MFIA", "IA")?
        .with_node(bias.as_str(), 0.0)?
        .with_node(frequency.as_str(), 1000.0)?
        .without_realtime()
        .with_responder(Box::new(
            move |path: &NodePath, nodes: &IndexMap<NodePath, NodeValue>| {
                if *path != sample {
                    return None;
                }
                let bias = nodes.get(&bias)?.as_f64()?;
                let frequency = nodes.get(&frequency)?.as_f64()?;
                Some(NodeData::Impedance(vec![ImpedanceSample {
                    timestamp: 0,
                    z: model.impedance(bias, frequency),
                    param0: model.resistance,
                    param1: model.capacitance_at(bias),
                    frequency,
                }]))
            },
        ));
    Ok(session)
}

/// Measure the configured bias/frequency map on the simulator and write
/// the CSV files to the output directory.
pub fn simulate_impedance_map(config: &LabConfig) -> Result<(ImpedanceMap, [PathBuf; 3])> {
    let device = config.device.as_str();
    NodePath::device(device, "features/devtype")
        .with_context(|| format!("Invalid device ID '{device}'"))?;
    let imp_index = config.impedance.imp_index;
    let mut session = simulated_analyzer(device, imp_index, RcModel::default())?;
    let interface = config.session.interface.as_str();
    labone_session::create_api_session(&mut session, device, interface, &["IA"], None)?;
    config.impedance.apply(&mut session, device)?;

    // The simulator has no transients to wait for.
    let settings = labone_instruments::BiasSweepSettings {
        settle: Duration::ZERO,
        ..config.poll.bias_sweep_settings()
    };
    let map = bias_frequency_map(&mut session, device, imp_index, &config.grid, &settings)?;
    std::fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("Failed to create {}", config.output_dir.display()))?;
    let files = map.save_csv(&config.output_dir)?;
    Ok((map, files))
}
