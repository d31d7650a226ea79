// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Q-control of a resonator with a lock-in amplifier.
//!
//! Demodulators 2 and 3 measure the resonator response in phase and in
//! quadrature; PIDs 2 and 3 feed it back onto output amplitudes 2 and 3, so
//! the feedback gain shifts the effective quality factor.

use std::thread;
use std::time::Duration;

use labone_log::info;
use labone_session::{NodePath, NodeSettings, NodeValue, Session};

use crate::Result;

/// Time the device needs to settle after loading a preset.
pub const PRESET_SETTLE: Duration = Duration::from_secs(3);

const FEEDBACK_PIDS: [usize; 2] = [2, 3];

/// Output, input, demodulator and PID configuration for Q-control.
pub fn qcontrol_settings(device: &str) -> Result<NodeSettings> {
    let mut settings = NodeSettings::for_device(device);
    let table: [(&str, NodeValue); 28] = [
        ("sigouts/0/on", NodeValue::Int(0)),
        ("sigouts/0/imp50", NodeValue::Int(0)),
        ("sigouts/0/add", NodeValue::Int(0)),
        ("sigouts/0/range", NodeValue::Double(1.0)),
        ("sigouts/0/offset", NodeValue::Double(0.0)),
        ("sigouts/0/diff", NodeValue::Int(0)),
        ("sigouts/0/amplitudes/0", NodeValue::Double(0.0)),
        ("sigouts/0/amplitudes/1", NodeValue::Double(0.0)),
        ("sigouts/0/amplitudes/2", NodeValue::Double(0.0)),
        ("sigouts/0/amplitudes/3", NodeValue::Double(0.0)),
        ("sigouts/0/enables/0", NodeValue::Int(0)),
        ("sigouts/0/enables/1", NodeValue::Int(1)),
        ("sigouts/0/enables/2", NodeValue::Int(1)),
        ("sigouts/0/enables/3", NodeValue::Int(1)),
        ("sigins/0/imp50", NodeValue::Int(1)),
        ("sigins/0/float", NodeValue::Int(0)),
        ("sigins/0/diff", NodeValue::Int(0)),
        ("sigins/0/ac", NodeValue::Int(0)),
        ("sigins/0/range", NodeValue::Double(0.3)),
        ("extrefs/*/enable", NodeValue::Int(0)),
        ("demods/*/oscselect", NodeValue::Int(0)),
        ("demods/*/harmonic", NodeValue::Int(1)),
        ("demods/0/phaseshift", NodeValue::Double(0.0)),
        ("demods/1/phaseshift", NodeValue::Double(0.0)),
        ("demods/2/phaseshift", NodeValue::Double(0.0)),
        ("demods/3/phaseshift", NodeValue::Double(90.0)),
        ("demods/*/adcselect", NodeValue::Int(0)),
        ("pids/*/enable", NodeValue::Int(0)),
    ];
    for (node, value) in table {
        settings.push(node, value)?;
    }

    for (input, pid) in FEEDBACK_PIDS.into_iter().enumerate() {
        let pid_settings: [(&str, NodeValue); 15] = [
            ("input", NodeValue::Int(input as i64)),
            ("inputchannel", NodeValue::Int(0)),
            ("setpoint", NodeValue::Double(0.0)),
            ("demod/timeconstant", NodeValue::Double(0.5e-3)),
            ("demod/order", NodeValue::Int(4)),
            ("demod/harmonic", NodeValue::Int(1)),
            ("output", NodeValue::Int(0)),
            ("outputchannel", NodeValue::Int(pid as i64)),
            ("center", NodeValue::Double(0.0)),
            ("limitlower", NodeValue::Double(-0.5)),
            ("limitupper", NodeValue::Double(0.5)),
            ("p", NodeValue::Double(0.0)),
            ("i", NodeValue::Double(0.0)),
            ("d", NodeValue::Double(0.0)),
            ("keepint", NodeValue::Int(0)),
        ];
        for (node, value) in pid_settings {
            settings.push(&format!("pids/{pid}/{node}"), value)?;
        }
    }
    Ok(settings)
}

/// Load the default preset and apply the Q-control configuration.
pub fn device_initialization<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    settle: Duration,
) -> Result<NodeSettings> {
    session.sync_set_int(&NodePath::device(device, "system/preset/index")?, 0)?;
    session.sync_set_int(&NodePath::device(device, "system/preset/load")?, 1)?;
    thread::sleep(settle);
    let settings = qcontrol_settings(device)?;
    session.set_many(&settings)?;
    info!("Q-control configuration applied to {}", device);
    Ok(settings)
}

/// Drive the resonator with `amplitude` and close the feedback loops.
pub fn drive_signal_output<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    amplitude: f64,
) -> Result<()> {
    let settings = NodeSettings::for_device(device)
        .set("sigouts/0/amplitudes/1", amplitude)?
        .set("pids/2/enable", 1)?
        .set("pids/3/enable", 1)?
        .set("sigouts/0/on", 1)?;
    session.set_many(&settings)?;
    Ok(())
}

/// Set the proportional gain of both feedback PIDs to `-gain`.
pub fn adjust_feedback_gain<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    gain: f64,
) -> Result<()> {
    let mut settings = NodeSettings::for_device(device);
    for pid in FEEDBACK_PIDS {
        settings.push(&format!("pids/{pid}/p"), -gain)?;
    }
    session.set_many(&settings)?;
    Ok(())
}

pub fn set_resonance_frequency<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    frequency: f64,
) -> Result<()> {
    session.set(
        &NodePath::device(device, "oscs/0/freq")?,
        NodeValue::Double(frequency),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use labone_session::simulated::SimulatedSession;

    const DEV: &str = "dev4022";

    #[test]
    fn test_settings_table() {
        let settings = qcontrol_settings(DEV).unwrap();
        let value = |node: &str| {
            settings
                .last_value(&NodePath::device(DEV, node).unwrap())
                .cloned()
        };
        assert_eq!(value("demods/3/phaseshift"), Some(NodeValue::Double(90.0)));
        assert_eq!(value("pids/2/input"), Some(NodeValue::Int(0)));
        assert_eq!(value("pids/3/input"), Some(NodeValue::Int(1)));
        assert_eq!(value("pids/3/outputchannel"), Some(NodeValue::Int(3)));
        assert_eq!(value("pids/2/limitlower"), Some(NodeValue::Double(-0.5)));
        assert_eq!(value("pids/2/demod/timeconstant"), Some(NodeValue::Double(0.5e-3)));
        assert_eq!(value("sigins/0/range"), Some(NodeValue::Double(0.3)));

        let wildcard_disable = NodePath::device(DEV, "pids/*/enable").unwrap();
        let first_pid = settings
            .iter()
            .position(|(p, _)| p.as_str().starts_with("/dev4022/pids/2/"))
            .unwrap();
        let disable = settings
            .iter()
            .position(|(p, _)| *p == wildcard_disable)
            .unwrap();
        assert!(disable < first_pid);
    }

    #[test]
    fn test_initialization_loads_preset_first() {
        let mut session = SimulatedSession::new()
            .with_node("/dev4022/pids/2/enable", 1i64)
            .unwrap()
            .with_node("/dev4022/pids/3/enable", 1i64)
            .unwrap();
        device_initialization(&mut session, DEV, Duration::ZERO).unwrap();
        let log = session.set_log();
        assert_eq!(log[0].0.as_str(), "/dev4022/system/preset/index");
        assert_eq!(log[1].0.as_str(), "/dev4022/system/preset/load");
        assert_eq!(log[1].1, NodeValue::Int(1));
        assert_eq!(session.value("/dev4022/pids/2/enable"), Some(&NodeValue::Int(0)));
        assert_eq!(session.value("/dev4022/pids/3/p"), Some(&NodeValue::Double(0.0)));
    }

    #[test]
    fn test_drive_and_feedback() {
        let mut session = SimulatedSession::new();
        set_resonance_frequency(&mut session, DEV, 1.84342276e6).unwrap();
        drive_signal_output(&mut session, DEV, 0.1).unwrap();
        adjust_feedback_gain(&mut session, DEV, 10.0).unwrap();
        assert_eq!(session.value("/dev4022/oscs/0/freq"), Some(&NodeValue::Double(1.84342276e6)));
        assert_eq!(session.value("/dev4022/sigouts/0/amplitudes/1"), Some(&NodeValue::Double(0.1)));
        assert_eq!(session.value("/dev4022/sigouts/0/on"), Some(&NodeValue::Int(1)));
        assert_eq!(session.value("/dev4022/pids/2/p"), Some(&NodeValue::Double(-10.0)));
        assert_eq!(session.value("/dev4022/pids/3/p"), Some(&NodeValue::Double(-10.0)));
    }
}
