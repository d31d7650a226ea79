// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Impedance measurements with the MFIA: point-by-point bias/frequency
//! maps and sweeper runs over DUTs selected through an external
//! multiplexer on the DIO port.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use labone_log::{diagnostic, info};
use labone_session::sweeper::{SaveFormat, SaveOptions};
use labone_session::{
    Accumulator, NodePath, NodeSettings, NodeValue, Session, SweepOutcome, SweepRun,
    SweeperModule, SweeperSettings, run_sweep,
};
use nalgebra::DMatrix;
use num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::export::write_matrix_csv;
use crate::{Error, Result};

/// Impedance unit configuration applied before a measurement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImpedanceSetup {
    pub imp_index: usize,
    pub mode: i64,
    pub auto_output: bool,
    pub auto_bandwidth: bool,
    pub auto_input_range: bool,
    pub bias_enable: bool,
    pub bias_value: f64,
    pub frequency: f64,
    pub output_amplitude: f64,
    pub output_range: f64,
    /// Representation model, 0 is R||C.
    pub model: i64,
    /// Scaling of signal input 0, e.g. 0.5 behind a multiplexer at 1 MOhm.
    pub input_scaling: Option<f64>,
}

impl Default for ImpedanceSetup {
    fn default() -> Self {
        ImpedanceSetup {
            imp_index: 0,
            mode: 0,
            auto_output: true,
            auto_bandwidth: true,
            auto_input_range: true,
            bias_enable: true,
            bias_value: 0.0,
            frequency: 1000.0,
            output_amplitude: 0.1,
            output_range: 10.0,
            model: 0,
            input_scaling: None,
        }
    }
}

impl ImpedanceSetup {
    /// Setup for DUTs reached through the multiplexer: no bias, 1 V drive
    /// and the input scaled by the multiplexer gain.
    pub fn multiplexed() -> Self {
        ImpedanceSetup {
            bias_enable: false,
            output_amplitude: 1.0,
            output_range: 1.0,
            input_scaling: Some(0.5),
            ..Default::default()
        }
    }

    pub fn settings(&self, device: &str) -> Result<NodeSettings> {
        let imp = |node: &str| format!("imps/{}/{node}", self.imp_index);
        let mut settings = NodeSettings::for_device(device)
            .set(&imp("enable"), 1)?
            .set(&imp("mode"), self.mode)?
            .set(&imp("auto/output"), self.auto_output)?
            .set(&imp("auto/bw"), self.auto_bandwidth)?
            .set(&imp("bias/enable"), self.bias_enable)?
            .set(&imp("bias/value"), self.bias_value)?
            .set(&imp("freq"), self.frequency)?
            .set(&imp("auto/inputrange"), self.auto_input_range)?
            .set(&imp("output/amplitude"), self.output_amplitude)?
            .set(&imp("output/range"), self.output_range)?
            .set(&imp("model"), self.model)?;
        if let Some(scaling) = self.input_scaling {
            settings.push("sigins/0/scaling", scaling)?;
        }
        Ok(settings)
    }

    pub fn apply<S: Session + ?Sized>(&self, session: &mut S, device: &str) -> Result<()> {
        session.set_many(&self.settings(device)?)?;
        session.sync()?;
        Ok(())
    }
}

/// `n` evenly spaced values from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// `n` values from `start` to `stop` evenly spaced on a log scale.
pub fn geomspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    linspace(start.log10(), stop.log10(), n)
        .into_iter()
        .map(|e| 10f64.powf(e))
        .collect()
}

/// Bias voltages (rows) and frequencies (columns) of a 2-D map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Grid2D {
    pub bias_start: f64,
    pub bias_stop: f64,
    pub bias_points: usize,
    pub frequency_start: f64,
    pub frequency_stop: f64,
    pub frequency_points: usize,
}

impl Default for Grid2D {
    fn default() -> Self {
        Grid2D {
            bias_start: 1.0,
            bias_stop: 1.7,
            bias_points: 201,
            frequency_start: 1e3,
            frequency_stop: 1e6,
            frequency_points: 201,
        }
    }
}

impl Grid2D {
    pub fn validate(&self) -> Result<()> {
        if self.bias_points == 0 || self.frequency_points == 0 {
            return Err(anyhow!("A grid needs at least one bias and one frequency point").into());
        }
        let positive = |f: f64| f > 0.0 && f.is_finite();
        if !positive(self.frequency_start) || !positive(self.frequency_stop) {
            return Err(anyhow!(
                "Frequencies of a logarithmic grid must be positive, got {} .. {}",
                self.frequency_start,
                self.frequency_stop
            )
            .into());
        }
        Ok(())
    }

    pub fn biases(&self) -> Vec<f64> {
        linspace(self.bias_start, self.bias_stop, self.bias_points)
    }

    pub fn frequencies(&self) -> Vec<f64> {
        geomspace(self.frequency_start, self.frequency_stop, self.frequency_points)
    }
}

/// Timing of one grid point.
#[derive(Debug, Clone, PartialEq)]
pub struct BiasSweepSettings {
    /// Wait after subscribing so the transient is not recorded.
    pub settle: Duration,
    pub recording: Duration,
    pub poll_timeout: Duration,
}

impl Default for BiasSweepSettings {
    fn default() -> Self {
        BiasSweepSettings {
            settle: Duration::from_secs(1),
            recording: Duration::from_millis(100),
            poll_timeout: Duration::from_millis(500),
        }
    }
}

/// Averaged impedance per grid point, rows are biases and columns are
/// frequencies.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpedanceMap {
    pub biases: Vec<f64>,
    pub frequencies: Vec<f64>,
    /// |Z| in Ohm.
    pub amplitude: DMatrix<f64>,
    /// arg(Z) in degrees.
    pub phase_deg: DMatrix<f64>,
    /// Second model parameter, the capacitance for the R||C model.
    pub capacitance: DMatrix<f64>,
}

impl ImpedanceMap {
    pub fn real(&self) -> DMatrix<f64> {
        self.amplitude
            .zip_map(&self.phase_deg, |a, p| a * p.to_radians().cos())
    }

    pub fn imag(&self) -> DMatrix<f64> {
        self.amplitude
            .zip_map(&self.phase_deg, |a, p| a * p.to_radians().sin())
    }

    fn select(&self, rows: &[usize]) -> ImpedanceMap {
        ImpedanceMap {
            biases: rows.iter().map(|&r| self.biases[r]).collect(),
            frequencies: self.frequencies.clone(),
            amplitude: self.amplitude.select_rows(rows),
            phase_deg: self.phase_deg.select_rows(rows),
            capacitance: self.capacitance.select_rows(rows),
        }
    }

    /// The bias rows in `range`.
    pub fn rows(&self, range: Range<usize>) -> Result<ImpedanceMap> {
        if range.start > range.end || range.end > self.biases.len() {
            return Err(anyhow!(
                "Rows {:?} out of range for a map with {} bias points",
                range,
                self.biases.len()
            )
            .into());
        }
        Ok(self.select(&range.collect::<Vec<_>>()))
    }

    /// Every `n`-th bias row, starting with the first.
    pub fn every_nth_row(&self, n: usize) -> Result<ImpedanceMap> {
        if n == 0 {
            return Err(anyhow!("Row step must be at least 1").into());
        }
        let rows: Vec<usize> = (0..self.biases.len()).step_by(n).collect();
        Ok(self.select(&rows))
    }

    /// Write `amp.csv`, `the.csv` and `c.csv` to `dir`.
    pub fn save_csv<P: AsRef<Path>>(&self, dir: P) -> Result<[PathBuf; 3]> {
        let dir = dir.as_ref();
        let files = [
            (dir.join("amp.csv"), &self.amplitude),
            (dir.join("the.csv"), &self.phase_deg),
            (dir.join("c.csv"), &self.capacitance),
        ];
        for (path, matrix) in &files {
            write_matrix_csv(path, matrix)?;
            info!("Wrote {}", path.display());
        }
        let [(amp, _), (the, _), (c, _)] = files;
        Ok([amp, the, c])
    }
}

struct GridNodes {
    bias: NodePath,
    frequency: NodePath,
    sample: NodePath,
}

fn measure_grid<S: Session + ?Sized>(
    session: &mut S,
    nodes: &GridNodes,
    biases: &[f64],
    frequencies: &[f64],
    settings: &BiasSweepSettings,
) -> Result<ImpedanceMap> {
    let (n_bias, n_freq) = (biases.len(), frequencies.len());
    let mut amplitude = DMatrix::zeros(n_bias, n_freq);
    let mut phase_deg = DMatrix::zeros(n_bias, n_freq);
    let mut capacitance = DMatrix::zeros(n_bias, n_freq);
    let sample_path = std::slice::from_ref(&nodes.sample);

    for (r, &bias) in biases.iter().enumerate() {
        session.set(&nodes.bias, NodeValue::Double(bias))?;
        for (c, &frequency) in frequencies.iter().enumerate() {
            session.set(&nodes.frequency, NodeValue::Double(frequency))?;
            session.sync()?;
            session.subscribe(sample_path)?;
            thread::sleep(settings.settle);
            let polled = session.poll(settings.recording, settings.poll_timeout);
            let unsubscribed = session.unsubscribe_all();
            let data = polled?;
            unsubscribed?;

            let mut accumulator = Accumulator::new(sample_path, 1);
            accumulator.extend(data);
            let samples = accumulator
                .into_impedance()?
                .shift_remove(&nodes.sample)
                .unwrap_or_default();
            if samples.is_empty() {
                return Err(Error::MissingSample { bias, frequency });
            }
            let n = samples.len() as f64;
            let z = samples.iter().map(|s| s.z).sum::<Complex<f64>>() / n;
            amplitude[(r, c)] = z.norm();
            phase_deg[(r, c)] = z.arg().to_degrees();
            capacitance[(r, c)] = samples.iter().map(|s| s.param1).sum::<f64>() / n;
        }
        diagnostic!("Bias {} V done ({} of {})", bias, r + 1, n_bias);
    }
    Ok(ImpedanceMap {
        biases: biases.to_vec(),
        frequencies: frequencies.to_vec(),
        amplitude,
        phase_deg,
        capacitance,
    })
}

fn restore_idle<S: Session + ?Sized>(session: &mut S, nodes: &GridNodes) -> Result<()> {
    session.set(&nodes.bias, NodeValue::Double(0.0))?;
    session.set(&nodes.frequency, NodeValue::Double(1000.0))?;
    Ok(())
}

/// Measure the impedance at every bias and frequency of `grid`.
///
/// Bias and frequency are set point by point; the impedance samples of one
/// short poll are averaged. Afterwards the bias returns to 0 V and the
/// frequency to 1 kHz, also when the measurement failed.
pub fn bias_frequency_map<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    imp_index: usize,
    grid: &Grid2D,
    settings: &BiasSweepSettings,
) -> Result<ImpedanceMap> {
    grid.validate()?;
    let nodes = GridNodes {
        bias: NodePath::device(device, &format!("imps/{imp_index}/bias/value"))?,
        frequency: NodePath::device(device, &format!("imps/{imp_index}/freq"))?,
        sample: NodePath::device(device, &format!("imps/{imp_index}/sample"))?,
    };
    let (biases, frequencies) = (grid.biases(), grid.frequencies());
    info!(
        "Measuring {} x {} impedance map on {}",
        biases.len(),
        frequencies.len(),
        device
    );
    let measured = measure_grid(session, &nodes, &biases, &frequencies, settings);
    let restored = restore_idle(session, &nodes);
    let map = measured?;
    restored?;
    Ok(map)
}

/// DIO output word that routes one DUT to the impedance analyzer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MuxRoute {
    pub dut: usize,
    pub dio_output: i64,
}

impl MuxRoute {
    /// Routes of the two-DUT multiplexer board.
    pub fn two_dut_board() -> Vec<MuxRoute> {
        vec![
            MuxRoute {
                dut: 1,
                dio_output: 4081,
            },
            MuxRoute {
                dut: 2,
                dio_output: 4093,
            },
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MuxSweep {
    pub route: MuxRoute,
    pub outcome: SweepOutcome,
}

/// Run one sweeper sweep per DUT, each saved as HDF5 file `DUT<n>`.
pub fn multiplexed_impedance_sweep<S, M>(
    session: &mut S,
    sweeper: &mut M,
    device: &str,
    imp_index: usize,
    routes: &[MuxRoute],
    sweep: &SweeperSettings,
    run: &SweepRun,
) -> Result<Vec<MuxSweep>>
where
    S: Session + ?Sized,
    M: SweeperModule + ?Sized,
{
    sweep.apply(sweeper, device)?;
    let output = NodePath::device(device, "dios/0/output")?;
    session.set(&NodePath::device(device, "dios/0/drive")?, NodeValue::Int(3))?;
    let sample = NodePath::device(device, &format!("imps/{imp_index}/sample"))?;

    info!("Will perform {} sweeps...", routes.len());
    let mut sweeps = Vec::with_capacity(routes.len());
    for route in routes {
        session.set(&output, NodeValue::Int(route.dio_output))?;
        session.sync()?;
        info!("DUT {}", route.dut);
        let run = SweepRun {
            save: Some(SaveOptions {
                filename: format!("DUT{}", route.dut),
                format: SaveFormat::Hdf5,
            }),
            ..run.clone()
        };
        let outcome = run_sweep(sweeper, &sample, &run)?;
        sweeps.push(MuxSweep {
            route: *route,
            outcome,
        });
    }
    Ok(sweeps)
}
