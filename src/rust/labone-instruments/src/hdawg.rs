// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! One AWG core of an HDAWG in 2x4 channel grouping, driven with sequence
//! programs that share constants and user registers with the host.

use std::thread;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use labone_common::DeviceKind;
use labone_log::{debug, info};
use labone_session::{
    AwgModule, CompileSettings, NodePath, NodeSettings, NodeValue, Session, VersionRequirements,
    compile_sequence,
};
use seqc_programs::SequencePreamble;
use serde::Serialize;

use crate::Result;

const COMMAND_TABLE_VERSION: &str = "0.2";
const RUN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Convert one or two waveforms in `[-1, 1]` to the interleaved int16
/// layout of the AWG waveform memory. Marker bits are not set.
pub fn interleave_waveform(wave1: &[f64], wave2: Option<&[f64]>) -> Result<Vec<i16>> {
    if let Some(wave2) = wave2 {
        if wave2.len() != wave1.len() {
            return Err(anyhow!(
                "Waveforms of one channel pair must have equal length, got {} and {}",
                wave1.len(),
                wave2.len()
            )
            .into());
        }
    }
    let scale = |x: f64| -> Result<i16> {
        if !x.is_finite() || x.abs() > 1.0 {
            return Err(anyhow!("Waveform sample {x} outside of [-1, 1]").into());
        }
        Ok((x * f64::from(i16::MAX)) as i16)
    };
    let mut raw = Vec::with_capacity(wave1.len() * if wave2.is_some() { 2 } else { 1 });
    for (i, &x) in wave1.iter().enumerate() {
        raw.push(scale(x)?);
        if let Some(wave2) = wave2 {
            raw.push(scale(wave2[i])?);
        }
    }
    Ok(raw)
}

/// Samples of one waveform slot, optionally with the second channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Waveform {
    pub wave1: Vec<f64>,
    pub wave2: Option<Vec<f64>>,
}

impl Waveform {
    pub fn new(wave1: Vec<f64>, wave2: Option<Vec<f64>>) -> Self {
        Waveform { wave1, wave2 }
    }
}

#[derive(Serialize)]
struct CommandTableHeader {
    version: &'static str,
}

#[derive(Serialize)]
struct CommandTableDocument<'a, T: ?Sized> {
    header: CommandTableHeader,
    table: &'a T,
}

/// Owns the session and the AWG module of a single HDAWG core.
pub struct HdawgCore<S, M> {
    session: S,
    awg_module: M,
    device: String,
    awg_index: usize,
    preamble: SequencePreamble,
    compile_settings: CompileSettings,
}

impl<S: Session, M: AwgModule> HdawgCore<S, M> {
    /// Connect `device`, check versions, select the 2x4 grouping and bind
    /// the AWG module to core `awg_index`.
    pub fn new(mut session: S, mut awg_module: M, device: &str, awg_index: usize) -> Result<Self> {
        let device = device.trim().to_lowercase();
        let cores = usize::from(DeviceKind::Hdawg.traits().awg_cores);
        if awg_index >= cores {
            return Err(
                anyhow!("AWG core {awg_index} does not exist, the HDAWG has {cores}").into(),
            );
        }
        session.connect_device(&device, "1GbE")?;
        VersionRequirements::hdawg().check(&mut session, &device)?;
        session.set(
            &NodePath::device(&device, "system/awg/channelgrouping")?,
            "groups_of_2".into(),
        )?;
        awg_module.set_string("device", &device)?;
        awg_module.set_int("index", awg_index as i64)?;
        awg_module.execute()?;
        info!("AWG core {} of {} ready", awg_index, device);
        Ok(HdawgCore {
            session,
            awg_module,
            device,
            awg_index,
            preamble: SequencePreamble::new(),
            compile_settings: CompileSettings::default(),
        })
    }

    pub fn with_compile_settings(mut self, settings: CompileSettings) -> Self {
        self.compile_settings = settings;
        self
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn awg_index(&self) -> usize {
        self.awg_index
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn awg_module(&self) -> &M {
        &self.awg_module
    }

    /// Constants and user registers prepended to every program.
    pub fn preamble(&self) -> &SequencePreamble {
        &self.preamble
    }

    pub fn preamble_mut(&mut self) -> &mut SequencePreamble {
        &mut self.preamble
    }

    /// Forget all constants and registers.
    pub fn reset_parameters(&mut self) {
        self.preamble = SequencePreamble::new();
    }

    pub fn into_parts(self) -> (S, M) {
        (self.session, self.awg_module)
    }

    fn node(&self, node: &str) -> Result<NodePath> {
        Ok(NodePath::device(&self.device, node)?)
    }

    fn awg_node(&self, node: &str) -> Result<NodePath> {
        self.node(&format!("awgs/{}/{node}", self.awg_index))
    }

    /// Stop the core, compile `program` behind the preamble, enable both
    /// outputs of the core and upload the waveforms and command table.
    pub fn config(
        &mut self,
        program: &str,
        command_table: Option<&serde_json::Value>,
        waves: &[Waveform],
    ) -> Result<()> {
        self.session.set(&self.awg_node("enable")?, NodeValue::Int(0))?;

        let program = self.preamble.prepend(program)?;
        compile_sequence(&mut self.awg_module, &program, &self.compile_settings)?;

        self.session.set(&self.awg_node("single")?, NodeValue::Int(1))?;
        for output in [2 * self.awg_index, 2 * self.awg_index + 1] {
            self.session
                .set(&self.node(&format!("sigouts/{output}/on"))?, NodeValue::Int(1))?;
        }

        for (i, wave) in waves.iter().enumerate() {
            let raw = interleave_waveform(&wave.wave1, wave.wave2.as_deref())?;
            debug!("Uploading waveform {} ({} samples)", i, raw.len());
            self.session
                .set(&self.awg_node(&format!("waveform/waves/{i}"))?, raw.into())?;
        }

        if let Some(table) = command_table {
            self.load_command_table(table)?;
        }
        Ok(())
    }

    /// Upload `table` as the entries of the command table.
    pub fn load_command_table<T: Serialize + ?Sized>(&mut self, table: &T) -> Result<()> {
        let document = CommandTableDocument {
            header: CommandTableHeader {
                version: COMMAND_TABLE_VERSION,
            },
            table,
        };
        let json = serde_json::to_string(&document)?;
        self.session
            .set(&self.awg_node("commandtable/data")?, NodeValue::Json(json))?;
        Ok(())
    }

    fn set_user_registers(&mut self) -> Result<()> {
        if self.preamble.registers().is_empty() {
            return Ok(());
        }
        let mut settings = NodeSettings::new();
        for (index, value) in self.preamble.register_values() {
            settings.push_path(self.awg_node(&format!("userregs/{index}"))?, value);
        }
        self.session.set_many(&settings)?;
        Ok(())
    }

    pub fn set_hold(&mut self, hold: bool) -> Result<()> {
        for output in 0..2 {
            self.session.set(
                &self.awg_node(&format!("outputs/{output}/hold"))?,
                hold.into(),
            )?;
        }
        Ok(())
    }

    pub fn oscillator_control(&mut self, enable: bool) -> Result<()> {
        self.session
            .set(&self.node("system/awg/oscillatorcontrol")?, enable.into())?;
        Ok(())
    }

    pub fn set_frequency(&mut self, frequency: f64, oscillator: usize) -> Result<()> {
        self.session.set(
            &self.node(&format!("oscs/{oscillator}/freq"))?,
            NodeValue::Double(frequency),
        )?;
        Ok(())
    }

    pub fn set_modulation(&mut self, mode: i64) -> Result<()> {
        for output in 0..2 {
            self.session.set(
                &self.awg_node(&format!("outputs/{output}/modulation/mode"))?,
                NodeValue::Int(mode),
            )?;
        }
        Ok(())
    }

    /// Write the user registers and start the sequence.
    ///
    /// With `block` the call returns once the core has stopped, failing
    /// after `timeout` if one is given.
    pub fn run(&mut self, block: bool, timeout: Option<Duration>) -> Result<()> {
        self.set_user_registers()?;
        let enable = self.awg_node("enable")?;
        self.session.sync_set_int(&enable, 1)?;
        if !block {
            return Ok(());
        }
        let start = Instant::now();
        while self.session.get_int(&enable)? == 1 {
            if let Some(timeout) = timeout {
                if start.elapsed() > timeout {
                    return Err(labone_session::Error::Timeout {
                        what: format!("AWG core {} to finish", self.awg_index),
                        timeout,
                    }
                    .into());
                }
            }
            thread::sleep(RUN_POLL_INTERVAL);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labone_session::simulated::{SimulatedAwgModule, SimulatedSession};
    use serde_json::json;

    const DEV: &str = "dev8000";

    fn fast_compile() -> CompileSettings {
        CompileSettings {
            timeout: Duration::from_millis(50),
            status_poll: Duration::from_millis(1),
            upload_poll: Duration::from_millis(1),
            ..Default::default()
        }
    }

    fn core(session: SimulatedSession) -> HdawgCore<SimulatedSession, SimulatedAwgModule> {
        HdawgCore::new(session, SimulatedAwgModule::new(), "DEV8000", 1)
            .unwrap()
            .with_compile_settings(fast_compile())
    }

    fn hdawg() -> SimulatedSession {
        SimulatedSession::new()
            .with_device(DEV, "HDAWG8", "MF\nME")
            .unwrap()
    }

    #[test]
    fn test_interleave() {
        let raw = interleave_waveform(&[1.0, -0.5], Some(&[0.0, -1.0])).unwrap();
        assert_eq!(raw, vec![32767, -16383, 0, -32767]);
        assert_eq!(interleave_waveform(&[0.5], None).unwrap(), vec![16383]);
        assert!(interleave_waveform(&[1.5], None).is_err());
        assert!(interleave_waveform(&[f64::NAN], None).is_err());
        assert!(interleave_waveform(&[0.0, 0.0], Some(&[0.0])).is_err());
    }

    #[test]
    fn test_new_configures_core() {
        let hdawg = core(hdawg());
        assert_eq!(hdawg.device(), DEV);
        assert_eq!(hdawg.session().connected_devices(), [DEV]);
        assert_eq!(
            hdawg.session().value("/dev8000/system/awg/channelgrouping"),
            Some(&NodeValue::from("groups_of_2"))
        );
        assert_eq!(hdawg.awg_module().value("index"), Some(&NodeValue::Int(1)));
        assert_eq!(hdawg.awg_module().executions(), 1);
    }

    #[test]
    fn test_new_rejects_old_firmware() {
        let session = hdawg().with_node("/dev8000/system/fwrevision", 60000i64).unwrap();
        let err = HdawgCore::new(session, SimulatedAwgModule::new(), DEV, 0)
            .err()
            .unwrap();
        assert!(err.to_string().contains("FW upgrade"));
        assert!(HdawgCore::new(hdawg(), SimulatedAwgModule::new(), DEV, 4).is_err());
    }

    #[test]
    fn test_config_compiles_with_preamble_and_uploads() {
        let mut hdawg = core(hdawg());
        hdawg.preamble_mut().set_constant("N", 8i64);
        hdawg.preamble_mut().set_register("amplitude", 3);
        let table = json!([{"index": 0, "waveform": {"index": 0}}]);
        hdawg
            .config(
                "executeTableEntry(0);",
                Some(&table),
                &[Waveform::new(vec![1.0], Some(vec![-1.0]))],
            )
            .unwrap();

        let source = &hdawg.awg_module().sources()[0];
        assert!(source.starts_with("//Constants definition\nconst N = 8;\n"));
        assert!(source.contains("var amplitude = getUserReg(0);\n"));
        assert!(source.ends_with("executeTableEntry(0);"));

        let session = hdawg.session();
        assert_eq!(session.value("/dev8000/sigouts/2/on"), Some(&NodeValue::Int(1)));
        assert_eq!(session.value("/dev8000/sigouts/3/on"), Some(&NodeValue::Int(1)));
        assert_eq!(session.value("/dev8000/awgs/1/single"), Some(&NodeValue::Int(1)));
        assert_eq!(
            session.value("/dev8000/awgs/1/waveform/waves/0"),
            Some(&NodeValue::Int16Vector(vec![32767, -32767]))
        );
        let Some(NodeValue::Json(document)) = session.value("/dev8000/awgs/1/commandtable/data")
        else {
            panic!("command table not uploaded");
        };
        let document: serde_json::Value = serde_json::from_str(document).unwrap();
        assert_eq!(document["header"]["version"], "0.2");
        assert_eq!(document["table"], table);

        let (first_path, first_value) = &session.set_log()[1];
        assert_eq!(first_path.as_str(), "/dev8000/awgs/1/enable");
        assert_eq!(first_value, &NodeValue::Int(0));
    }

    #[test]
    fn test_compile_failure_stops_config() {
        let session = hdawg();
        let awg = SimulatedAwgModule::new()
            .with_compiler_statuses(&[1])
            .with_status_string("syntax error");
        let mut hdawg = HdawgCore::new(session, awg, DEV, 0)
            .unwrap()
            .with_compile_settings(fast_compile());
        let err = hdawg.config("playWave(", None, &[]).unwrap_err();
        assert!(err.to_string().contains("syntax error"));
        assert_eq!(hdawg.session().value("/dev8000/sigouts/0/on"), None);
    }

    #[test]
    fn test_run_writes_registers_and_blocks() {
        let mut hdawg = core(hdawg().with_auto_clear("/dev8000/awgs/1/enable").unwrap());
        hdawg.preamble_mut().set_register("n", 5);
        hdawg.preamble_mut().set_register("m", 7);
        hdawg.run(true, Some(Duration::from_secs(1))).unwrap();
        let session = hdawg.session();
        assert_eq!(session.value("/dev8000/awgs/1/userregs/0"), Some(&NodeValue::Int(5)));
        assert_eq!(session.value("/dev8000/awgs/1/userregs/1"), Some(&NodeValue::Int(7)));
        assert_eq!(session.value("/dev8000/awgs/1/enable"), Some(&NodeValue::Int(0)));
    }

    #[test]
    fn test_blocking_run_times_out() {
        let mut hdawg = core(hdawg());
        let err = hdawg
            .run(true, Some(Duration::from_millis(20)))
            .unwrap_err();
        assert!(err.to_string().contains("AWG core 1 to finish"));
        hdawg.run(false, None).unwrap();
    }

    #[test]
    fn test_output_controls() {
        let mut hdawg = core(hdawg());
        hdawg.set_hold(true).unwrap();
        hdawg.oscillator_control(true).unwrap();
        hdawg.set_frequency(10e6, 4).unwrap();
        hdawg.set_modulation(1).unwrap();
        hdawg.reset_parameters();
        assert!(hdawg.preamble().registers().is_empty());
        let session = hdawg.session();
        assert_eq!(session.value("/dev8000/awgs/1/outputs/1/hold"), Some(&NodeValue::Int(1)));
        assert_eq!(
            session.value("/dev8000/system/awg/oscillatorcontrol"),
            Some(&NodeValue::Int(1))
        );
        assert_eq!(session.value("/dev8000/oscs/4/freq"), Some(&NodeValue::Double(10e6)));
        assert_eq!(
            session.value("/dev8000/awgs/1/outputs/0/modulation/mode"),
            Some(&NodeValue::Int(1))
        );
    }
}
