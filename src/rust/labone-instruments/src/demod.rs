// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Lock-in demodulator readout.

use labone_common::DeviceKind;
use labone_log::info;
use labone_session::sweeper::{BandwidthControl, ScanMode, XMapping};
use labone_session::{
    DemodSample, DeviceSession, NodeData, NodePath, NodeSettings, Session, SweepRecord, SweepRun,
    SweeperModule, SweeperSettings, run_sweep,
};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Latest sample of the demodulator at `path` (`/<dev>/demods/<n>/sample`).
pub fn read_demod_sample<S: Session + ?Sized>(
    session: &mut S,
    path: &NodePath,
) -> Result<DemodSample> {
    match session.get_sample(path)? {
        NodeData::Demod(samples) => samples.last().copied().ok_or_else(|| {
            anyhow::anyhow!("Demodulator {path} returned an empty sample").into()
        }),
        other => Err(Error::UnexpectedData {
            path: path.to_string(),
            expected: "demodulator sample",
            actual: other.kind(),
        }),
    }
}

/// Mixer channel that drives signal output `output` on this device.
pub fn default_output_mixer_channel(device: &DeviceSession, output: usize) -> usize {
    match device.kind {
        DeviceKind::Uhfli | DeviceKind::Uhfqa => {
            if output == 0 {
                3
            } else {
                7
            }
        }
        DeviceKind::Mfli | DeviceKind::Mfia if device.options.contains("MD") => 1,
        _ => 0,
    }
}

/// Loop-back demodulation: signal output `out_channel` drives signal input
/// `in_channel`, read by one demodulator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemodSetup {
    pub out_channel: usize,
    pub in_channel: usize,
    pub demod_index: usize,
    pub osc_index: usize,
    pub amplitude: f64,
    pub demod_rate: f64,
    pub time_constant: f64,
    pub order: i64,
}

impl Default for DemodSetup {
    fn default() -> Self {
        DemodSetup {
            out_channel: 0,
            in_channel: 0,
            demod_index: 0,
            osc_index: 0,
            amplitude: 0.1,
            demod_rate: 10e3,
            time_constant: 0.01,
            order: 4,
        }
    }
}

impl DemodSetup {
    pub fn settings(&self, device: &str, mixer_channel: usize) -> Result<NodeSettings> {
        let input = format!("sigins/{}", self.in_channel);
        let demod = format!("demods/{}", self.demod_index);
        let output = format!("sigouts/{}", self.out_channel);
        let settings = NodeSettings::for_device(device)
            .set(&format!("{input}/ac"), 0)?
            .set(&format!("{input}/range"), 2.0 * self.amplitude)?
            .set(&format!("{demod}/enable"), 1)?
            .set(&format!("{demod}/rate"), self.demod_rate)?
            .set(&format!("{demod}/adcselect"), self.in_channel as i64)?
            .set(&format!("{demod}/order"), self.order)?
            .set(&format!("{demod}/timeconstant"), self.time_constant)?
            .set(&format!("{demod}/oscselect"), self.osc_index as i64)?
            .set(&format!("{demod}/harmonic"), 1)?
            .set(&format!("{output}/on"), 1)?
            .set(&format!("{output}/enables/{mixer_channel}"), 1)?
            .set(&format!("{output}/range"), 1)?
            .set(
                &format!("{output}/amplitudes/{mixer_channel}"),
                self.amplitude,
            )?;
        Ok(settings)
    }

    /// The node the demodulator streams its samples to.
    pub fn sample_path(&self, device: &str) -> Result<NodePath> {
        Ok(NodePath::device(
            device,
            &format!("demods/{}/sample", self.demod_index),
        )?)
    }
}

/// Apply `setup` on `device` and wait for the settings to take effect.
pub fn configure_demod_readout<S: Session + ?Sized>(
    session: &mut S,
    device: &DeviceSession,
    setup: &DemodSetup,
) -> Result<NodeSettings> {
    let mixer_channel = default_output_mixer_channel(device, setup.out_channel);
    let settings = setup.settings(&device.device, mixer_channel)?;
    session.set_many(&settings)?;
    session.sync()?;
    Ok(settings)
}

/// Sweeper settings for a loop-back frequency response of `setup`: the
/// oscillator of the demodulator is swept logarithmically, up to 500 kHz
/// on MF devices and 50 MHz otherwise.
pub fn demod_sweeper_settings(device: &DeviceSession, setup: &DemodSetup) -> SweeperSettings {
    let stop = match device.kind {
        DeviceKind::Mfli | DeviceKind::Mfia => 500e3,
        _ => 50e6,
    };
    SweeperSettings {
        gridnode: format!("oscs/{}/freq", setup.osc_index),
        start: 0.01,
        stop,
        samplecount: 100,
        xmapping: XMapping::Log,
        bandwidthcontrol: BandwidthControl::Fixed,
        bandwidthoverlap: false,
        scan: ScanMode::Sequential,
        loopcount: 1,
        settling_time: 0.0,
        settling_inaccuracy: 0.001,
        averaging_tc: 10.0,
        averaging_sample: 10,
        ..Default::default()
    }
}

/// Magnitude and phase of one demodulator sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DemodSweep {
    pub frequency: Vec<f64>,
    pub r: Vec<f64>,
    /// Radians.
    pub phase: Vec<f64>,
}

impl DemodSweep {
    /// Polar form of the `x`/`y` fields of a sweep record. The frequency
    /// axis is the `frequency` field, or `grid` when it is missing.
    pub fn from_record(path: &NodePath, record: &SweepRecord) -> Result<Self> {
        let field = |name: &str| {
            record
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("Sweep of {path} has no '{name}' field"))
        };
        let (x, y) = (field("x")?, field("y")?);
        let frequency = match record.get("frequency") {
            Some(frequency) => frequency,
            None => field("grid")?,
        };
        if x.len() != y.len() || x.len() != frequency.len() {
            return Err(anyhow::anyhow!(
                "Sweep of {path} has {} frequencies, {} x and {} y values",
                frequency.len(),
                x.len(),
                y.len()
            )
            .into());
        }
        Ok(DemodSweep {
            frequency: frequency.to_vec(),
            r: x.iter().zip(y).map(|(x, y)| x.hypot(*y)).collect(),
            phase: x.iter().zip(y).map(|(x, y)| y.atan2(*x)).collect(),
        })
    }
}

/// Configure the loop-back readout of `setup`, sweep its oscillator with
/// `sweep` and return the response of every loop.
pub fn demod_frequency_sweep<S, M>(
    session: &mut S,
    sweeper: &mut M,
    device: &DeviceSession,
    setup: &DemodSetup,
    sweep: &SweeperSettings,
    run: &SweepRun,
) -> Result<Vec<DemodSweep>>
where
    S: Session + ?Sized,
    M: SweeperModule + ?Sized,
{
    configure_demod_readout(session, device, setup)?;
    sweep.apply(sweeper, &device.device)?;
    let path = setup.sample_path(&device.device)?;
    info!("Will perform {} sweeps...", sweep.loopcount);
    let outcome = run_sweep(sweeper, &path, run)?;
    outcome
        .results
        .records
        .iter()
        .map(|record| DemodSweep::from_record(&path, record))
        .collect()
}
