// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Sweeper module: parameter sweeps executed by the data server.

use std::thread;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use labone_log::{diagnostic, info, warn};
use serde::{Deserialize, Serialize};

use crate::node::{NodePath, NodeValue};
use crate::{Error, Result};

/// The vendor sweeper module, a stateful helper that runs the sweep in the
/// background of the data server.
pub trait SweeperModule {
    fn set(&mut self, key: &str, value: NodeValue) -> Result<()>;
    fn get_int(&mut self, key: &str) -> Result<i64>;
    fn subscribe(&mut self, path: &NodePath) -> Result<()>;
    fn unsubscribe(&mut self, path: &NodePath) -> Result<()>;
    fn execute(&mut self) -> Result<()>;
    fn finished(&mut self) -> Result<bool>;
    /// Progress of the running sweep in `[0, 1]`.
    fn progress(&mut self) -> Result<f64>;
    /// Stop the sweep at the current grid point.
    fn finish(&mut self) -> Result<()>;
    fn read(&mut self) -> Result<SweepResultSet>;
}

/// One completed sweep: field name (`grid`, `absz`, `param1`, …) to values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepRecord(IndexMap<String, Vec<f64>>);

impl SweepRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: &str, values: Vec<f64>) -> Self {
        self.0.insert(name.to_string(), values);
        self
    }

    pub fn get(&self, field: &str) -> Option<&[f64]> {
        self.0.get(field).map(Vec::as_slice)
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of grid points.
    pub fn len(&self) -> usize {
        self.get("grid").map_or(0, <[f64]>::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Results of a sweeper run, one record per loop.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SweepResultSet {
    pub path: Option<NodePath>,
    pub records: Vec<SweepRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum XMapping {
    Linear,
    Log,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandwidthControl {
    Manual,
    Fixed,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Sequential,
    Binary,
    Bidirectional,
    Reverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveFormat {
    Matlab,
    Csv,
    Zview,
    Sxm,
    Hdf5,
}

impl SaveFormat {
    fn code(self) -> i64 {
        match self {
            SaveFormat::Matlab => 0,
            SaveFormat::Csv => 1,
            SaveFormat::Zview => 2,
            SaveFormat::Sxm => 3,
            SaveFormat::Hdf5 => 4,
        }
    }
}

/// Sweeper configuration. Defaults reproduce the standard impedance sweep.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SweeperSettings {
    pub gridnode: String,
    pub start: f64,
    pub stop: f64,
    pub samplecount: u32,
    pub xmapping: XMapping,
    pub bandwidthcontrol: BandwidthControl,
    pub scan: ScanMode,
    pub loopcount: u32,
    pub bandwidth: f64,
    pub order: u32,
    pub settling_inaccuracy: f64,
    pub settling_time: f64,
    pub averaging_tc: f64,
    pub averaging_sample: u32,
    pub averaging_time: f64,
    pub maxbandwidth: f64,
    pub bandwidthoverlap: bool,
    pub omegasuppression: f64,
    pub phaseunwrap: bool,
    pub sincfilter: bool,
    pub awgcontrol: bool,
    pub historylength: u32,
}

impl Default for SweeperSettings {
    fn default() -> Self {
        SweeperSettings {
            gridnode: "oscs/0/freq".to_string(),
            start: 1e3,
            stop: 5e6,
            samplecount: 100,
            xmapping: XMapping::Log,
            bandwidthcontrol: BandwidthControl::Auto,
            scan: ScanMode::Sequential,
            loopcount: 1,
            bandwidth: 10.0,
            order: 8,
            settling_inaccuracy: 0.01,
            settling_time: 0.0,
            averaging_tc: 15.0,
            averaging_sample: 20,
            averaging_time: 0.1,
            maxbandwidth: 100.0,
            bandwidthoverlap: true,
            omegasuppression: 80.0,
            phaseunwrap: false,
            sincfilter: false,
            awgcontrol: false,
            historylength: 100,
        }
    }
}

impl SweeperSettings {
    /// Write the configuration to `module` for `device`.
    pub fn apply<M: SweeperModule + ?Sized>(&self, module: &mut M, device: &str) -> Result<()> {
        if self.stop <= self.start && self.xmapping == XMapping::Log {
            return Err(anyhow::anyhow!(
                "Logarithmic sweep needs start < stop (got {} .. {})",
                self.start,
                self.stop
            )
            .into());
        }
        let xmapping: i64 = match self.xmapping {
            XMapping::Linear => 0,
            XMapping::Log => 1,
        };
        let bandwidthcontrol: i64 = match self.bandwidthcontrol {
            BandwidthControl::Manual => 0,
            BandwidthControl::Fixed => 1,
            BandwidthControl::Auto => 2,
        };
        let scan: i64 = match self.scan {
            ScanMode::Sequential => 0,
            ScanMode::Binary => 1,
            ScanMode::Bidirectional => 2,
            ScanMode::Reverse => 3,
        };
        let settings: [(&str, NodeValue); 23] = [
            ("device", device.into()),
            ("historylength", i64::from(self.historylength).into()),
            ("gridnode", self.gridnode.as_str().into()),
            ("start", self.start.into()),
            ("stop", self.stop.into()),
            ("samplecount", i64::from(self.samplecount).into()),
            ("xmapping", xmapping.into()),
            ("bandwidthcontrol", bandwidthcontrol.into()),
            ("scan", scan.into()),
            ("loopcount", i64::from(self.loopcount).into()),
            ("bandwidth", self.bandwidth.into()),
            ("order", i64::from(self.order).into()),
            ("settling/inaccuracy", self.settling_inaccuracy.into()),
            ("settling/time", self.settling_time.into()),
            ("averaging/tc", self.averaging_tc.into()),
            ("averaging/sample", i64::from(self.averaging_sample).into()),
            ("averaging/time", self.averaging_time.into()),
            ("maxbandwidth", self.maxbandwidth.into()),
            ("bandwidthoverlap", self.bandwidthoverlap.into()),
            ("omegasuppression", self.omegasuppression.into()),
            ("phaseunwrap", self.phaseunwrap.into()),
            ("sincfilter", self.sincfilter.into()),
            ("awgcontrol", self.awgcontrol.into()),
        ];
        for (key, value) in settings {
            module.set(key, value)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveOptions {
    pub filename: String,
    pub format: SaveFormat,
}

/// How a sweep is run and collected.
#[derive(Debug, Clone, PartialEq)]
pub struct SweepRun {
    /// After this, the sweep is forced to finish.
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub save: Option<SaveOptions>,
    pub save_poll_interval: Duration,
}

impl Default for SweepRun {
    fn default() -> Self {
        SweepRun {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(200),
            save: None,
            save_poll_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepOutcome {
    pub results: SweepResultSet,
    /// The sweep did not finish in time and was stopped early.
    pub forced_finish: bool,
}

/// Run one sweep of `path` and read back the results.
///
/// When the sweep is not done within `run.timeout` it is forced to finish;
/// if it still does not report completion within another `run.timeout`,
/// the run fails. The results must hold one record per configured loop
/// (`loopcount`, 0 for endless sweeps is not checked). `path` is
/// unsubscribed again on every exit.
pub fn run_sweep<M: SweeperModule + ?Sized>(
    module: &mut M,
    path: &NodePath,
    run: &SweepRun,
) -> Result<SweepOutcome> {
    module.subscribe(path)?;
    let swept = execute_and_read(module, path, run);
    let unsubscribed = module.unsubscribe(path);
    let (mut results, forced_finish) = swept?;
    unsubscribed?;

    if results.records.is_empty() || results.path.as_ref().is_some_and(|p| p != path) {
        return Err(Error::NoSweepData(path.to_string()));
    }
    let loopcount = module.get_int("loopcount")?;
    let expected = usize::try_from(loopcount).map_err(anyhow::Error::from)?;
    if expected != 0 && results.records.len() != expected {
        return Err(Error::SweepCount {
            expected,
            actual: results.records.len(),
        });
    }
    info!(
        "Returned sweeper data contains {} sweeps.",
        results.records.len()
    );
    results.path.get_or_insert_with(|| path.clone());
    Ok(SweepOutcome {
        results,
        forced_finish,
    })
}

fn execute_and_read<M: SweeperModule + ?Sized>(
    module: &mut M,
    path: &NodePath,
    run: &SweepRun,
) -> Result<(SweepResultSet, bool)> {
    module.execute()?;
    let start = Instant::now();
    let mut forced_finish = false;
    while !module.finished()? {
        thread::sleep(run.poll_interval);
        let progress = module.progress()?;
        diagnostic!("Individual sweep progress: {:.2}%", progress * 100.0);
        let elapsed = start.elapsed();
        if !forced_finish && elapsed > run.timeout {
            warn!("Sweep still not finished, forcing finish...");
            module.finish()?;
            forced_finish = true;
        } else if forced_finish && elapsed > 2 * run.timeout {
            return Err(Error::Timeout {
                what: format!("the forced finish of the sweep of {path}"),
                timeout: 2 * run.timeout,
            });
        }
    }

    if let Some(save) = &run.save {
        module.set("save/filename", save.filename.as_str().into())?;
        module.set("save/fileformat", save.format.code().into())?;
        info!("Saving sweep of {} to '{}'", path, save.filename);
        module.set("save/save", NodeValue::Int(1))?;
        let save_start = Instant::now();
        while module.get_int("save/save")? != 0 {
            if save_start.elapsed() > run.timeout {
                return Err(Error::Timeout {
                    what: format!("saving '{}'", save.filename),
                    timeout: run.timeout,
                });
            }
            thread::sleep(run.save_poll_interval);
        }
        info!("Save done");
    }

    Ok((module.read()?, forced_finish))
}
