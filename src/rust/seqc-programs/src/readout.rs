// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Sequence program for frequency-multiplexed qubit readout on the UHFQA.
//!
//! Each readout channel contributes one modulated copy of a common
//! gaussian-edged envelope; the sum is played `n_averages` times with the
//! integration and monitor triggers of the QA unit.

use std::f64::consts::FRAC_PI_4;

use anyhow::anyhow;
use labone_common::DeviceKind;

use crate::Result;
use crate::seqc_generator::{SeqCGenerator, call_expr};
use crate::seqc_statements::SeqCVariant;

pub const MAX_READOUT_CHANNELS: usize = 10;

const BASE_AMPLITUDES: [f64; MAX_READOUT_CHANNELS] =
    [0.13, 0.15, 0.16, 0.15, 0.14, 0.13, 0.17, 0.23, 0.19, 0.11];
const AMPLITUDE_SCALE: f64 = 20.0;
const DELTA_AMPLITUDE: [f64; MAX_READOUT_CHANNELS] =
    [0.02, 0.01, -0.01, 0.02, -0.012, 0.0, 0.02, -0.012, 0.06, 0.03];
const DELTA_PHASE: [f64; MAX_READOUT_CHANNELS] =
    [0.23, 0.31, 0.26, -0.171, 0.28, -0.31, 0.19, -0.21, 0.091, 0.29];

const RISE_TIME: f64 = 30e-9;
const FALL_TIME: f64 = 30e-9;
const FLAT_TIME: f64 = 200e-9;
const TRIGGER_HOLDOFF: i64 = 1024;

/// Pulse parameters of one simulated readout resonator.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadoutChannel {
    pub channel: usize,
    /// Always non-negative.
    pub frequency: f64,
    pub amplitude: f64,
    /// In radians.
    pub phase: f64,
}

/// Resolve the pulse parameters for `channels`.
///
/// `states[i]` selects the excited-state response for `channels[i]`;
/// `None` means every qubit is in the ground state.
pub fn readout_channels(
    channels: &[usize],
    frequencies: &[f64],
    states: Option<&[bool]>,
) -> Result<Vec<ReadoutChannel>> {
    let Some(&highest) = channels.iter().max() else {
        return Err(anyhow!("At least one readout channel is required").into());
    };
    if highest >= MAX_READOUT_CHANNELS {
        return Err(anyhow!(
            "Readout channel {highest} out of range, only channels 0 to {} are available",
            MAX_READOUT_CHANNELS - 1
        )
        .into());
    }
    if frequencies.len() <= highest {
        return Err(anyhow!(
            "Not enough readout frequencies specified! Channel {highest} needs {} frequencies, got {}",
            highest + 1,
            frequencies.len()
        )
        .into());
    }
    let n_states = states.map_or(channels.len(), <[bool]>::len);
    if n_states != channels.len() {
        return Err(anyhow!(
            "Got {} qubit states for {} readout channels",
            n_states,
            channels.len()
        )
        .into());
    }

    let channels = channels
        .iter()
        .enumerate()
        .map(|(i, &ch)| {
            let excited = states.is_some_and(|s| s[i]);
            let mut amplitude = BASE_AMPLITUDES[ch] / AMPLITUDE_SCALE;
            let mut phase = 0.0;
            if excited {
                amplitude *= 1.0 + DELTA_AMPLITUDE[ch];
                phase += DELTA_PHASE[ch] * FRAC_PI_4;
            }
            ReadoutChannel {
                channel: ch,
                frequency: frequencies[ch].abs(),
                amplitude,
                phase,
            }
        })
        .collect();
    Ok(channels)
}

fn envelope_definition(seqc: &mut SeqCGenerator) -> Result<()> {
    let sampling_rate = DeviceKind::Uhfqa.traits().sampling_rate;
    seqc.add_constant_definition("samplingRate", sampling_rate.into(), None::<String>)?;
    seqc.add_comment("parameters for envelope");
    seqc.add_constant_definition("riseTime", RISE_TIME.into(), None::<String>)?;
    seqc.add_constant_definition("fallTime", FALL_TIME.into(), None::<String>)?;
    seqc.add_constant_definition("flatTime", FLAT_TIME.into(), None::<String>)?;
    seqc.add_constant_definition("rise", "riseTime * samplingRate".into(), None::<String>)?;
    seqc.add_constant_definition("fall", "fallTime * samplingRate".into(), None::<String>)?;
    seqc.add_constant_definition("length", "flatTime * samplingRate".into(), None::<String>)?;
    seqc.add_constant_definition(
        "totalLength",
        "rise + length + fall".into(),
        None::<String>,
    )?;
    seqc.add_comment("define waveforms");
    seqc.add_wave_assignment("w_gauss_rise", call_expr("gauss", ["2*rise", "rise", "rise/4"]))?;
    seqc.add_wave_assignment("w_gauss_fall", call_expr("gauss", ["2*fall", "fall", "fall/4"]))?;
    seqc.add_wave_assignment("w_rise", call_expr("cut", ["w_gauss_rise", "0", "rise"]))?;
    seqc.add_wave_assignment(
        "w_fall",
        call_expr("cut", ["w_gauss_fall", "fall", "2*fall-1"]),
    )?;
    seqc.add_wave_assignment(
        "w_flat",
        call_expr("rect", [SeqCVariant::from("length"), SeqCVariant::Float(1.0)]),
    )?;
    seqc.add_wave_assignment("w_pad", call_expr("zeros", ["(totalLength-1)%16"]))?;
    seqc.add_comment("combine to total envelope");
    seqc.add_wave_assignment(
        "readoutPulse",
        call_expr("join", ["w_rise", "w_flat", "w_fall", "w_pad"]),
    )?;
    seqc.add_blank_line();
    seqc.add_comment("init empty final waveforms");
    seqc.add_wave_assignment("w_I", call_expr("zeros", ["totalLength"]))?;
    seqc.add_wave_assignment("w_Q", call_expr("zeros", ["totalLength"]))?;
    seqc.add_blank_line();
    Ok(())
}

fn readout_pulse(seqc: &mut SeqCGenerator, ch: &ReadoutChannel) -> Result<()> {
    let n = ch.channel;
    let frequency = format!("f{n}_readout");
    let modulation = |carrier: &str| {
        format!(
            "{} * readoutPulse * {}",
            SeqCVariant::Float(ch.amplitude),
            call_expr(
                carrier,
                [
                    SeqCVariant::from("totalLength"),
                    SeqCVariant::Integer(1),
                    SeqCVariant::Float(ch.phase),
                    SeqCVariant::String(format!("{frequency}*totalLength/samplingRate")),
                ],
            )
        )
    };

    seqc.add_comment(format!("modulate envelope for readout pulse {n}"));
    seqc.add_constant_definition(frequency.as_str(), ch.frequency.into(), None::<String>)
        .map_err(|_| anyhow!("Readout channel {n} is listed more than once"))?;
    seqc.add_wave_assignment(format!("w{n}_I"), modulation("cosine"))?;
    seqc.add_wave_assignment(format!("w{n}_Q"), modulation("sine"))?;
    seqc.add_function_call_statement(
        "add",
        vec!["w_I".into(), format!("w{n}_I").into()],
        Some("w_I"),
    );
    seqc.add_function_call_statement(
        "add",
        vec!["w_Q".into(), format!("w{n}_Q").into()],
        Some("w_Q"),
    );
    seqc.add_blank_line();
    Ok(())
}

fn play_loop(seqc: &mut SeqCGenerator, n_averages: u32) -> Result<()> {
    let set_trigger = |seqc: &mut SeqCGenerator, value: &str| {
        seqc.add_function_call_statement("setTrigger", vec![value.into()], None::<String>);
    };

    seqc.add_comment("play waveform");
    set_trigger(seqc, "AWG_INTEGRATION_ARM");
    seqc.add_variable_declaration(
        "result_averages",
        Some(SeqCVariant::Integer(n_averages.into())),
    )?;
    let mut body = SeqCGenerator::new();
    body.add_function_call_statement("playWave", vec!["w_I".into(), "w_Q".into()], None::<String>);
    set_trigger(
        &mut body,
        "AWG_INTEGRATION_ARM + AWG_INTEGRATION_TRIGGER + AWG_MONITOR_TRIGGER + 1",
    );
    set_trigger(&mut body, "AWG_INTEGRATION_ARM");
    body.add_function_call_statement("waitWave", vec![], None::<String>);
    body.add_function_call_statement("wait", vec![TRIGGER_HOLDOFF.into()], None::<String>);
    seqc.add_repeat("result_averages".into(), body);
    set_trigger(seqc, "0");
    seqc.add_blank_line();
    Ok(())
}

/// Build the multiplexed readout program for `channels`.
///
/// `frequencies` is indexed by channel number, so it must hold an entry
/// for the highest channel used.
pub fn sequence_multiplexed_readout(
    channels: &[usize],
    frequencies: &[f64],
    n_averages: u32,
    states: Option<&[bool]>,
) -> Result<String> {
    let pulses = readout_channels(channels, frequencies, states)?;
    let mut seqc = SeqCGenerator::new();
    envelope_definition(&mut seqc)?;
    for pulse in &pulses {
        readout_pulse(&mut seqc, pulse)?;
    }
    play_loop(&mut seqc, n_averages)?;
    Ok(seqc.generate_seq_c())
}
