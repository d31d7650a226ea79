// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Multiplexed qubit readout on the UHFQA: crosstalk matrix, integration
//! weights, QA result and monitor units, and the measurement of optimal
//! integration weights from ground and excited state traces.

use std::f64::consts::TAU;
use std::thread;
use std::time::Duration;

use anyhow::anyhow;
use labone_common::DeviceKind;
use labone_log::info;
use labone_session::{
    AwgModule, CompileSettings, NodePath, NodeSettings, NodeValue, PollSettings, Session,
    acquisition_poll, compile_sequence,
};
use nalgebra::DMatrix;
use seqc_programs::{MAX_READOUT_CHANNELS, sequence_multiplexed_readout};

use crate::Result;

/// Capacity of the integration weight memory per channel and quadrature.
pub const MAX_INTEGRATION_LENGTH: usize = 4096;

fn node(device: &str, node: &str) -> Result<NodePath> {
    Ok(NodePath::device(device, node)?)
}

fn check_channel(channel: usize) -> Result<()> {
    if channel >= MAX_READOUT_CHANNELS {
        return Err(anyhow!(
            "Integration channel {channel} out of range, the UHFQA has {MAX_READOUT_CHANNELS} channels"
        )
        .into());
    }
    Ok(())
}

fn read_usize<S: Session + ?Sized>(session: &mut S, path: &NodePath) -> Result<usize> {
    let value = session.get_int(path)?;
    usize::try_from(value).map_err(|_| anyhow!("Node {path} holds a negative count {value}").into())
}

/// Write `matrix` to the crosstalk suppression matrix of the QA setup.
pub fn write_crosstalk_matrix<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    matrix: &DMatrix<f64>,
) -> Result<()> {
    if matrix.nrows() > MAX_READOUT_CHANNELS || matrix.ncols() > MAX_READOUT_CHANNELS {
        return Err(anyhow!(
            "Crosstalk matrix is {}x{}, at most {MAX_READOUT_CHANNELS}x{MAX_READOUT_CHANNELS} is supported",
            matrix.nrows(),
            matrix.ncols()
        )
        .into());
    }
    for r in 0..matrix.nrows() {
        for c in 0..matrix.ncols() {
            let path = node(device, &format!("qas/0/crosstalk/rows/{r}/cols/{c}"))?;
            session.set(&path, NodeValue::Double(matrix[(r, c)]))?;
        }
    }
    Ok(())
}

/// Sine weights for digital demodulation at `frequency`,
/// `sin(2π f i / fs + phase)` for `i` in `0..length`.
pub fn generate_demod_weights(
    length: usize,
    frequency: f64,
    sampling_rate: f64,
    phase: f64,
) -> Result<Vec<f64>> {
    if length > MAX_INTEGRATION_LENGTH {
        return Err(anyhow!(
            "Demodulation weights of length {length} exceed {MAX_INTEGRATION_LENGTH} samples"
        )
        .into());
    }
    if frequency <= 0.0 || !frequency.is_finite() {
        return Err(anyhow!("Demodulation frequency must be positive, got {frequency}").into());
    }
    Ok((0..length)
        .map(|i| (TAU * frequency * i as f64 / sampling_rate + phase).sin())
        .collect())
}

/// Arm the AWG for a single run and start it.
pub fn run_awg<S: Session + ?Sized>(session: &mut S, device: &str) -> Result<()> {
    session.set(&node(device, "awgs/0/single")?, NodeValue::Int(1))?;
    session.sync_set_int(&node(device, "awgs/0/enable")?, 1)?;
    Ok(())
}

/// Toggle signal output `channel` (0 or 1), or both when `None`.
pub fn toggle_outputs<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    channel: Option<usize>,
) -> Result<()> {
    let channels = match channel {
        Some(ch @ (0 | 1)) => vec![ch],
        Some(ch) => {
            return Err(anyhow!("Signal output {ch} does not exist, use 0 or 1").into());
        }
        None => vec![0, 1],
    };
    for ch in channels {
        let path = node(device, &format!("sigouts/{ch}/on"))?;
        match session.get_int(&path)? {
            0 => session.set(&path, NodeValue::Int(1))?,
            1 => session.set(&path, NodeValue::Int(0))?,
            _ => {}
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quadrature {
    Real,
    Imag,
}

impl Quadrature {
    pub fn as_str(&self) -> &'static str {
        match self {
            Quadrature::Real => "real",
            Quadrature::Imag => "imag",
        }
    }
}

fn weights_path(device: &str, channel: usize, quadrature: Quadrature) -> Result<NodePath> {
    node(
        device,
        &format!("qas/0/integration/weights/{channel}/{}", quadrature.as_str()),
    )
}

/// Program the integration weights of `channel`.
///
/// The weights are cut to the monitor length; a single value is repeated
/// over the whole monitor length. With `demod_frequency` the weights are
/// multiplied with the matching demodulation sine. Returns the integration
/// length that was set.
pub fn set_integration_weights<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    weights: &[f64],
    channel: usize,
    quadrature: Quadrature,
    demod_frequency: Option<f64>,
) -> Result<usize> {
    check_channel(channel)?;
    if weights.is_empty() || weights.len() > MAX_INTEGRATION_LENGTH {
        return Err(anyhow!(
            "Expected 1 to {MAX_INTEGRATION_LENGTH} integration weights, got {}",
            weights.len()
        )
        .into());
    }
    let monitor_length = read_usize(session, &node(device, "qas/0/monitor/length")?)?;
    let mut weights = match weights {
        [w] => vec![*w; monitor_length],
        _ => weights[..weights.len().min(monitor_length)].to_vec(),
    };
    let integration_length = weights.len();

    if let Some(frequency) = demod_frequency {
        let sampling_rate = DeviceKind::Uhfqa.traits().sampling_rate;
        let demod = generate_demod_weights(integration_length, frequency, sampling_rate, 0.0)?;
        for (w, d) in weights.iter_mut().zip(demod) {
            *w *= d;
        }
    }

    let length = node(device, "qas/0/integration/length")?;
    let path = weights_path(device, channel, quadrature)?;
    session.set(&length, NodeValue::Int(MAX_INTEGRATION_LENGTH as i64))?;
    session.set(&path, vec![0.0; MAX_INTEGRATION_LENGTH].into())?;
    session.set(&length, NodeValue::Int(integration_length as i64))?;
    session.set(&path, weights.into())?;
    Ok(integration_length)
}

/// Zero both quadratures of the integration weights of `channels`.
pub fn reset_integration_weights<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    channels: &[usize],
) -> Result<()> {
    session.set(
        &node(device, "qas/0/integration/length")?,
        NodeValue::Int(MAX_INTEGRATION_LENGTH as i64),
    )?;
    for &channel in channels {
        check_channel(channel)?;
        for quadrature in [Quadrature::Real, Quadrature::Imag] {
            session.set(
                &weights_path(device, channel, quadrature)?,
                vec![0.0; MAX_INTEGRATION_LENGTH].into(),
            )?;
        }
    }
    Ok(())
}

/// Data source of the QA result unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultSource {
    #[default]
    Integration,
    Rotation,
    Threshold,
}

impl ResultSource {
    pub fn code(self) -> i64 {
        match self {
            ResultSource::Integration => 7,
            ResultSource::Rotation => 2,
            ResultSource::Threshold => 1,
        }
    }
}

/// Configure and restart the QA result unit.
pub fn set_qa_results<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    result_length: u32,
    result_averages: u32,
    source: ResultSource,
) -> Result<()> {
    let settings = NodeSettings::for_device(device)
        .set("qas/0/result/enable", 0)?
        .set("qas/0/result/reset", 1)?
        .set("qas/0/result/length", i64::from(result_length))?
        .set("qas/0/result/averages", i64::from(result_averages))?
        .set("qas/0/result/source", source.code())?
        .set("qas/0/result/enable", 1)?;
    session.set_many(&settings)?;
    Ok(())
}

/// Configure and restart the QA input monitor.
pub fn set_qa_monitor<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    monitor_length: u32,
    averages: u32,
) -> Result<()> {
    let settings = NodeSettings::for_device(device)
        .set("qas/0/monitor/enable", 0)?
        .set("qas/0/monitor/reset", 1)?
        .set("qas/0/monitor/length", i64::from(monitor_length))?
        .set("qas/0/monitor/averages", i64::from(averages))?
        .set("qas/0/monitor/enable", 1)?;
    session.set_many(&settings)?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq)]
pub struct OptimalWeightsSettings {
    pub poll: PollSettings,
    pub compile: CompileSettings,
    /// Pause between sync and subscribing to the monitor.
    pub settle: Duration,
}

impl Default for OptimalWeightsSettings {
    fn default() -> Self {
        OptimalWeightsSettings {
            poll: PollSettings::default(),
            compile: CompileSettings::default(),
            settle: Duration::from_millis(100),
        }
    }
}

/// Monitor traces of both signal inputs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IqTrace {
    pub i: Vec<f64>,
    pub q: Vec<f64>,
}

/// Traces recorded for the ground and excited state and the weights
/// derived from them.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimalWeights {
    pub ground: IqTrace,
    pub excited: IqTrace,
    pub weights: IqTrace,
}

fn normalized_difference(excited: &[f64], ground: &[f64], delay: usize) -> Result<Vec<f64>> {
    let mut diff: Vec<f64> = excited.iter().zip(ground).map(|(e, g)| e - g).collect();
    let peak = diff.iter().fold(0.0f64, |acc, d| acc.max(d.abs()));
    if peak == 0.0 || !peak.is_finite() {
        return Err(anyhow!(
            "Ground and excited state traces do not differ, cannot derive integration weights"
        )
        .into());
    }
    for d in diff.iter_mut() {
        *d /= peak;
    }
    let delay = delay.min(diff.len());
    diff[..delay].fill(0.0);
    Ok(diff)
}

/// Measure the readout of `channel` with the qubit in the ground and in the
/// excited state and set the normalized difference as integration weights.
///
/// The first `delay` samples of the weights are set to zero.
pub fn optimal_integration_weights<S, M>(
    session: &mut S,
    awg: &mut M,
    device: &str,
    channel: usize,
    frequencies: &[f64],
    delay: Option<usize>,
    settings: &OptimalWeightsSettings,
) -> Result<OptimalWeights>
where
    S: Session + ?Sized,
    M: AwgModule + ?Sized,
{
    check_channel(channel)?;
    session.flush()?;
    let monitor_length = read_usize(session, &node(device, "qas/0/monitor/length")?)?;
    let monitor_averages = session.get_int(&node(device, "qas/0/monitor/averages")?)?;
    let monitor_averages = u32::try_from(monitor_averages)
        .map_err(|_| anyhow!("Invalid monitor averages {monitor_averages}"))?;
    reset_integration_weights(session, device, &[channel])?;

    let monitor_paths = [
        node(device, "qas/0/monitor/inputs/0/wave")?,
        node(device, "qas/0/monitor/inputs/1/wave")?,
    ];
    let mut traces = Vec::with_capacity(2);
    for excited in [false, true] {
        info!("Channel {} in state |{}>", channel, u8::from(excited));
        let program = sequence_multiplexed_readout(
            &[channel],
            frequencies,
            monitor_averages,
            Some(&[excited]),
        )?;
        compile_sequence(awg, &program, &settings.compile)?;

        session.sync()?;
        thread::sleep(settings.settle);
        session.subscribe(&monitor_paths)?;
        run_awg(session, device)?;
        let polled = acquisition_poll(session, &monitor_paths, monitor_length, &settings.poll);
        session.unsubscribe(&monitor_paths)?;
        let mut data = polled?;
        info!("Data acquired");

        let mut take = |path: &NodePath| {
            data.shift_remove(path)
                .ok_or_else(|| anyhow!("No monitor data received on {path}"))
        };
        traces.push(IqTrace {
            i: take(&monitor_paths[0])?,
            q: take(&monitor_paths[1])?,
        });
    }
    let excited = traces.pop().unwrap_or_default();
    let ground = traces.pop().unwrap_or_default();

    let delay = delay.unwrap_or(0);
    let weights = IqTrace {
        i: normalized_difference(&excited.i, &ground.i, delay)?,
        q: normalized_difference(&excited.q, &ground.q, delay)?,
    };
    set_integration_weights(session, device, &weights.i, channel, Quadrature::Real, None)?;
    set_integration_weights(session, device, &weights.q, channel, Quadrature::Imag, None)?;

    Ok(OptimalWeights {
        ground,
        excited,
        weights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use labone_session::NodeData;
    use labone_session::simulated::{SimulatedAwgModule, SimulatedSession};

    const DEV: &str = "dev2266";

    fn path(node: &str) -> NodePath {
        NodePath::device(DEV, node).unwrap()
    }

    fn logged(session: &SimulatedSession) -> Vec<(String, NodeValue)> {
        session
            .set_log()
            .iter()
            .map(|(p, v)| (p.as_str().trim_start_matches("/dev2266/").to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_crosstalk_matrix_nodes() {
        let mut session = SimulatedSession::new();
        let matrix = DMatrix::from_row_slice(2, 2, &[1.0, 0.1, 0.2, 1.0]);
        write_crosstalk_matrix(&mut session, DEV, &matrix).unwrap();
        assert_eq!(
            session.value("/dev2266/qas/0/crosstalk/rows/0/cols/1"),
            Some(&NodeValue::Double(0.1))
        );
        assert_eq!(
            session.value("/dev2266/qas/0/crosstalk/rows/1/cols/0"),
            Some(&NodeValue::Double(0.2))
        );
        assert_eq!(session.set_log().len(), 4);

        let too_large = DMatrix::<f64>::identity(11, 11);
        assert!(write_crosstalk_matrix(&mut session, DEV, &too_large).is_err());
    }

    #[test]
    fn test_demod_weights() {
        let weights = generate_demod_weights(4, 450e6, 1.8e9, 0.0).unwrap();
        let expected: Vec<f64> = (0..4).map(|i| (TAU * i as f64 / 4.0).sin()).collect();
        for (w, e) in weights.iter().zip(&expected) {
            assert!((w - e).abs() < 1e-12);
        }
        assert!(generate_demod_weights(4097, 1e6, 1.8e9, 0.0).is_err());
        assert!(generate_demod_weights(16, 0.0, 1.8e9, 0.0).is_err());
        assert!(generate_demod_weights(16, -5e6, 1.8e9, 0.0).is_err());
    }

    #[test]
    fn test_single_weight_is_broadcast() {
        let mut session = SimulatedSession::new()
            .with_node("/dev2266/qas/0/monitor/length", 5i64)
            .unwrap();
        let length =
            set_integration_weights(&mut session, DEV, &[0.5], 3, Quadrature::Imag, None).unwrap();
        assert_eq!(length, 5);
        let log = logged(&session);
        assert_eq!(
            log,
            vec![
                ("qas/0/integration/length".to_string(), NodeValue::Int(4096)),
                (
                    "qas/0/integration/weights/3/imag".to_string(),
                    NodeValue::Vector(vec![0.0; 4096])
                ),
                ("qas/0/integration/length".to_string(), NodeValue::Int(5)),
                (
                    "qas/0/integration/weights/3/imag".to_string(),
                    NodeValue::Vector(vec![0.5; 5])
                ),
            ]
        );
    }

    #[test]
    fn test_weights_cut_to_monitor_length_and_demodulated() {
        let mut session = SimulatedSession::new()
            .with_node("/dev2266/qas/0/monitor/length", 4i64)
            .unwrap();
        let length = set_integration_weights(
            &mut session,
            DEV,
            &[1.0; 8],
            0,
            Quadrature::Real,
            Some(450e6),
        )
        .unwrap();
        assert_eq!(length, 4);
        let Some(NodeValue::Vector(weights)) =
            session.value("/dev2266/qas/0/integration/weights/0/real")
        else {
            panic!("weights not written");
        };
        assert_eq!(weights.len(), 4);
        assert!((weights[1] - 1.0).abs() < 1e-12);
        assert!((weights[3] + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let mut session = SimulatedSession::new()
            .with_node("/dev2266/qas/0/monitor/length", 4i64)
            .unwrap();
        assert!(
            set_integration_weights(&mut session, DEV, &[], 0, Quadrature::Real, None).is_err()
        );
        assert!(
            set_integration_weights(&mut session, DEV, &[1.0], 10, Quadrature::Real, None).is_err()
        );
        assert!(
            set_integration_weights(&mut session, DEV, &[0.0; 4097], 0, Quadrature::Real, None)
                .is_err()
        );
        assert!(session.set_log().is_empty());
    }

    #[test]
    fn test_result_table_order() {
        let mut session = SimulatedSession::new();
        set_qa_results(&mut session, DEV, 100, 8, ResultSource::Rotation).unwrap();
        let log = logged(&session);
        let nodes: Vec<&str> = log.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            nodes,
            [
                "qas/0/result/enable",
                "qas/0/result/reset",
                "qas/0/result/length",
                "qas/0/result/averages",
                "qas/0/result/source",
                "qas/0/result/enable",
            ]
        );
        assert_eq!(log[4].1, NodeValue::Int(2));
        assert_eq!(log[5].1, NodeValue::Int(1));

        session.clear_set_log();
        set_qa_monitor(&mut session, DEV, 4096, 1).unwrap();
        assert_eq!(session.get_int(&path("qas/0/monitor/length")).unwrap(), 4096);
        assert_eq!(session.get_int(&path("qas/0/monitor/enable")).unwrap(), 1);
    }

    #[test]
    fn test_toggle_outputs() {
        let mut session = SimulatedSession::new()
            .with_node("/dev2266/sigouts/0/on", 0i64)
            .unwrap()
            .with_node("/dev2266/sigouts/1/on", 1i64)
            .unwrap();
        toggle_outputs(&mut session, DEV, None).unwrap();
        assert_eq!(session.get_int(&path("sigouts/0/on")).unwrap(), 1);
        assert_eq!(session.get_int(&path("sigouts/1/on")).unwrap(), 0);
        toggle_outputs(&mut session, DEV, Some(1)).unwrap();
        assert_eq!(session.get_int(&path("sigouts/0/on")).unwrap(), 1);
        assert_eq!(session.get_int(&path("sigouts/1/on")).unwrap(), 1);
        assert!(toggle_outputs(&mut session, DEV, Some(2)).is_err());
    }

    #[test]
    fn test_run_awg() {
        let mut session = SimulatedSession::new();
        run_awg(&mut session, DEV).unwrap();
        assert_eq!(session.get_int(&path("awgs/0/single")).unwrap(), 1);
        assert_eq!(session.get_int(&path("awgs/0/enable")).unwrap(), 1);
        assert_eq!(session.sync_count(), 1);
    }

    fn fast_settings() -> OptimalWeightsSettings {
        OptimalWeightsSettings {
            poll: PollSettings {
                timeout: Duration::from_millis(200),
                recording: Duration::from_millis(1),
                poll_timeout: Duration::from_millis(1),
            },
            compile: CompileSettings {
                timeout: Duration::from_millis(100),
                status_poll: Duration::from_millis(1),
                upload_poll: Duration::from_millis(1),
                ..Default::default()
            },
            settle: Duration::ZERO,
        }
    }

    #[test]
    fn test_optimal_weights_from_state_difference() {
        let mut session = SimulatedSession::new()
            .with_node("/dev2266/qas/0/monitor/length", 4i64)
            .unwrap()
            .with_node("/dev2266/qas/0/monitor/averages", 2i64)
            .unwrap();
        let input_i = path("qas/0/monitor/inputs/0/wave");
        let input_q = path("qas/0/monitor/inputs/1/wave");
        session.push_stream(&input_i, NodeData::Vector(vec![0.0; 4]));
        session.push_stream(&input_q, NodeData::Vector(vec![1.0; 4]));
        session.push_stream(&input_i, NodeData::Vector(vec![0.0, 1.0, 2.0, 4.0]));
        session.push_stream(&input_q, NodeData::Vector(vec![1.0, -1.0, 1.0, 3.0]));
        let mut awg = SimulatedAwgModule::new();

        let result = optimal_integration_weights(
            &mut session,
            &mut awg,
            DEV,
            0,
            &[100e6],
            Some(2),
            &fast_settings(),
        )
        .unwrap();

        assert_eq!(result.ground.i, vec![0.0; 4]);
        assert_eq!(result.excited.q, vec![1.0, -1.0, 1.0, 3.0]);
        assert_eq!(result.weights.i, vec![0.0, 0.0, 0.5, 1.0]);
        assert_eq!(result.weights.q, vec![0.0, 0.0, 0.0, 1.0]);
        assert_eq!(
            session.value("/dev2266/qas/0/integration/weights/0/imag"),
            Some(&NodeValue::Vector(vec![0.0, 0.0, 0.0, 1.0]))
        );
        assert_eq!(session.subscriptions().count(), 0);
        assert_eq!(session.flush_count(), 1);

        let sources = awg.sources();
        assert_eq!(sources.len(), 2);
        assert!(sources[0].contains("var result_averages = 2;"));
        assert!(sources[0].contains("cosine(totalLength, 1, 0, "));
        assert!(!sources[1].contains("cosine(totalLength, 1, 0, "));
    }

    #[test]
    fn test_identical_traces_are_rejected() {
        let mut session = SimulatedSession::new()
            .with_node("/dev2266/qas/0/monitor/length", 2i64)
            .unwrap()
            .with_node("/dev2266/qas/0/monitor/averages", 1i64)
            .unwrap();
        let input_i = path("qas/0/monitor/inputs/0/wave");
        let input_q = path("qas/0/monitor/inputs/1/wave");
        for _ in 0..2 {
            session.push_stream(&input_i, NodeData::Vector(vec![0.3, 0.3]));
            session.push_stream(&input_q, NodeData::Vector(vec![0.1, 0.1]));
        }
        let mut awg = SimulatedAwgModule::new();
        assert!(
            optimal_integration_weights(
                &mut session,
                &mut awg,
                DEV,
                0,
                &[100e6],
                None,
                &fast_settings()
            )
            .is_err()
        );
    }

    #[test]
    fn test_acquisition_timeout_unsubscribes() {
        let mut session = SimulatedSession::new()
            .with_node("/dev2266/qas/0/monitor/length", 4i64)
            .unwrap()
            .with_node("/dev2266/qas/0/monitor/averages", 1i64)
            .unwrap();
        let mut awg = SimulatedAwgModule::new();
        let mut settings = fast_settings();
        settings.poll.timeout = Duration::from_millis(10);
        let err = optimal_integration_weights(
            &mut session,
            &mut awg,
            DEV,
            0,
            &[100e6],
            None,
            &settings,
        )
        .unwrap_err();
        assert!(err.to_string().contains("Timeout Error"));
        assert_eq!(session.subscriptions().count(), 0);
    }
}
