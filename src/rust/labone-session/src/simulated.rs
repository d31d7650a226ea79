// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! In-memory stand-ins for the data server and its modules.
//!
//! The simulator keeps a flat node tree, delivers scripted data chunks to
//! subscribed paths and records every setting it receives, which is what the
//! tests of the workflows assert against.

use std::collections::{HashMap, HashSet, VecDeque};
use std::thread;
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};

use crate::awg_module::AwgModule;
use crate::node::{NodeData, NodePath, NodeValue};
use crate::session::{PollResult, Session};
use crate::sweeper::{SweepRecord, SweepResultSet, SweeperModule};
use crate::{Error, Result};

/// Produces data for a subscribed path from the current node values.
pub type Responder = Box<dyn FnMut(&NodePath, &IndexMap<NodePath, NodeValue>) -> Option<NodeData>>;

const DEFAULT_REVISION: i64 = 230_200_000;

pub struct SimulatedSession {
    nodes: IndexMap<NodePath, NodeValue>,
    streams: HashMap<NodePath, VecDeque<NodeData>>,
    samples: HashMap<NodePath, NodeData>,
    subscribed: IndexSet<NodePath>,
    auto_clear: HashSet<NodePath>,
    responder: Option<Responder>,
    set_log: Vec<(NodePath, NodeValue)>,
    connected: Vec<String>,
    api_revision: i64,
    realtime: bool,
    sync_count: usize,
    flush_count: usize,
    poll_count: usize,
    poll_budget: Option<usize>,
}

impl Default for SimulatedSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSession {
    pub fn new() -> Self {
        let mut nodes = IndexMap::new();
        nodes.insert(
            NodePath("/zi/about/revision".to_string()),
            NodeValue::Int(DEFAULT_REVISION),
        );
        SimulatedSession {
            nodes,
            streams: HashMap::new(),
            samples: HashMap::new(),
            subscribed: IndexSet::new(),
            auto_clear: HashSet::new(),
            responder: None,
            set_log: Vec::new(),
            connected: Vec::new(),
            api_revision: DEFAULT_REVISION,
            realtime: true,
            sync_count: 0,
            flush_count: 0,
            poll_count: 0,
            poll_budget: None,
        }
    }

    /// Populate the feature nodes of a device.
    pub fn with_device(self, device: &str, devtype: &str, options: &str) -> Result<Self> {
        self.with_node(&format!("/{device}/features/devtype"), devtype)?
            .with_node(&format!("/{device}/features/options"), options)?
            .with_node(&format!("/{device}/system/fwrevision"), 70000i64)
    }

    /// Add or overwrite a node.
    pub fn with_node(mut self, path: &str, value: impl Into<NodeValue>) -> Result<Self> {
        let path = NodePath::parse(path)?;
        self.nodes.insert(path, value.into());
        Ok(self)
    }

    pub fn with_api_revision(mut self, revision: i64) -> Self {
        self.api_revision = revision;
        self
    }

    pub fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    /// Node resets to 0 right after a `sync_set_int`, like an AWG that ran
    /// its single-shot sequence to completion.
    pub fn with_auto_clear(mut self, path: &str) -> Result<Self> {
        let path = NodePath::parse(path)?;
        self.auto_clear.insert(path);
        Ok(self)
    }

    /// Return immediately from `poll` instead of waiting the recording time.
    pub fn without_realtime(mut self) -> Self {
        self.realtime = false;
        self
    }

    /// Fail every poll after the first `polls`, like a dropped connection.
    pub fn losing_connection_after(mut self, polls: usize) -> Self {
        self.poll_budget = Some(polls);
        self
    }

    /// Queue a chunk that a later poll delivers once `path` is subscribed.
    /// Each poll delivers at most one chunk per path.
    pub fn push_stream(&mut self, path: &NodePath, data: NodeData) {
        self.streams.entry(path.clone()).or_default().push_back(data);
    }

    pub fn set_sample(&mut self, path: &NodePath, data: NodeData) {
        self.samples.insert(path.clone(), data);
    }

    pub fn value(&self, path: &str) -> Option<&NodeValue> {
        NodePath::parse(path).ok().and_then(|p| self.nodes.get(&p))
    }

    pub fn set_log(&self) -> &[(NodePath, NodeValue)] {
        &self.set_log
    }

    pub fn clear_set_log(&mut self) {
        self.set_log.clear();
    }

    pub fn connected_devices(&self) -> &[String] {
        &self.connected
    }

    pub fn subscriptions(&self) -> impl Iterator<Item = &NodePath> {
        self.subscribed.iter()
    }

    pub fn sync_count(&self) -> usize {
        self.sync_count
    }

    pub fn flush_count(&self) -> usize {
        self.flush_count
    }

    pub fn poll_count(&self) -> usize {
        self.poll_count
    }
}

impl Session for SimulatedSession {
    fn connect_device(&mut self, device: &str, _interface: &str) -> Result<()> {
        let devtype = NodePath::device(device, "features/devtype")?;
        if !self.nodes.contains_key(&devtype) {
            return Err(anyhow::anyhow!("Device {device} is not visible to the data server").into());
        }
        if !self.connected.iter().any(|d| d == device) {
            self.connected.push(device.to_string());
        }
        Ok(())
    }

    fn get(&mut self, path: &NodePath) -> Result<NodeValue> {
        self.nodes
            .get(path)
            .cloned()
            .ok_or_else(|| Error::NodeNotFound(path.to_string()))
    }

    fn set(&mut self, path: &NodePath, value: NodeValue) -> Result<()> {
        if path.is_wildcard() {
            for (node, current) in self.nodes.iter_mut() {
                if path.matches(node) {
                    *current = value.clone();
                }
            }
        } else {
            self.nodes.insert(path.clone(), value.clone());
        }
        self.set_log.push((path.clone(), value));
        Ok(())
    }

    fn get_sample(&mut self, path: &NodePath) -> Result<NodeData> {
        if let Some(sample) = self.samples.get(path) {
            return Ok(sample.clone());
        }
        self.responder
            .as_mut()
            .and_then(|responder| responder(path, &self.nodes))
            .ok_or_else(|| Error::NodeNotFound(path.to_string()))
    }

    fn sync(&mut self) -> Result<()> {
        self.sync_count += 1;
        Ok(())
    }

    /// Scripted streams stand for data the device has not produced yet, so
    /// flushing leaves them in place.
    fn flush(&mut self) -> Result<()> {
        self.flush_count += 1;
        Ok(())
    }

    fn subscribe(&mut self, paths: &[NodePath]) -> Result<()> {
        self.subscribed.extend(paths.iter().cloned());
        Ok(())
    }

    fn unsubscribe(&mut self, paths: &[NodePath]) -> Result<()> {
        for path in paths {
            self.subscribed.shift_remove(path);
        }
        Ok(())
    }

    fn unsubscribe_all(&mut self) -> Result<()> {
        self.subscribed.clear();
        Ok(())
    }

    fn poll(&mut self, recording: Duration, _timeout: Duration) -> Result<PollResult> {
        self.poll_count += 1;
        if self.poll_budget.is_some_and(|budget| self.poll_count > budget) {
            return Err(anyhow::anyhow!("Lost connection to the data server").into());
        }
        if self.realtime {
            thread::sleep(recording);
        }
        let mut result = PollResult::new();
        for path in &self.subscribed {
            let chunk = match self.streams.get_mut(path).and_then(VecDeque::pop_front) {
                Some(chunk) => Some(chunk),
                None => self
                    .responder
                    .as_mut()
                    .and_then(|responder| responder(path, &self.nodes)),
            };
            if let Some(chunk) = chunk {
                result.insert(path.clone(), vec![chunk]);
            }
        }
        Ok(result)
    }

    fn api_revision(&self) -> i64 {
        self.api_revision
    }

    fn sync_set_int(&mut self, path: &NodePath, value: i64) -> Result<i64> {
        self.set(path, NodeValue::Int(value))?;
        self.sync()?;
        if self.auto_clear.contains(path) {
            self.nodes.insert(path.clone(), NodeValue::Int(0));
        }
        Ok(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinishMode {
    AfterPolls(usize),
    WhenForced,
    Never,
}

/// Scripted sweeper module.
#[derive(Debug, Clone)]
pub struct SimulatedSweeper {
    settings: IndexMap<String, NodeValue>,
    subscribed: Vec<NodePath>,
    finish_mode: FinishMode,
    finished_calls: usize,
    forced: bool,
    records: Vec<SweepRecord>,
    saved: Vec<String>,
    executions: usize,
}

impl Default for SimulatedSweeper {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSweeper {
    pub fn new() -> Self {
        SimulatedSweeper {
            settings: IndexMap::from([("loopcount".to_string(), NodeValue::Int(1))]),
            subscribed: Vec::new(),
            finish_mode: FinishMode::AfterPolls(1),
            finished_calls: 0,
            forced: false,
            records: Vec::new(),
            saved: Vec::new(),
            executions: 0,
        }
    }

    /// Report completion on the `polls`-th call of `finished()`.
    pub fn finishing_after(mut self, polls: usize) -> Self {
        self.finish_mode = FinishMode::AfterPolls(polls);
        self
    }

    pub fn finishing_only_when_forced(mut self) -> Self {
        self.finish_mode = FinishMode::WhenForced;
        self
    }

    pub fn never_finishing(mut self) -> Self {
        self.finish_mode = FinishMode::Never;
        self
    }

    pub fn with_result(mut self, record: SweepRecord) -> Self {
        self.records.push(record);
        self
    }

    pub fn setting(&self, key: &str) -> Option<&NodeValue> {
        self.settings.get(key)
    }

    pub fn saved_files(&self) -> &[String] {
        &self.saved
    }

    pub fn subscriptions(&self) -> &[NodePath] {
        &self.subscribed
    }

    pub fn was_forced(&self) -> bool {
        self.forced
    }

    pub fn executions(&self) -> usize {
        self.executions
    }
}

impl SweeperModule for SimulatedSweeper {
    fn set(&mut self, key: &str, value: NodeValue) -> Result<()> {
        if key == "save/save" && value.as_i64() == Some(1) {
            let filename = self
                .settings
                .get("save/filename")
                .and_then(NodeValue::as_str)
                .unwrap_or("sweep")
                .to_string();
            self.saved.push(filename);
            // Saving completes immediately.
            self.settings.insert(key.to_string(), NodeValue::Int(0));
            return Ok(());
        }
        self.settings.insert(key.to_string(), value);
        Ok(())
    }

    fn get_int(&mut self, key: &str) -> Result<i64> {
        self.settings
            .get(key)
            .and_then(NodeValue::as_i64)
            .ok_or_else(|| Error::NodeNotFound(key.to_string()))
    }

    fn subscribe(&mut self, path: &NodePath) -> Result<()> {
        if !self.subscribed.contains(path) {
            self.subscribed.push(path.clone());
        }
        Ok(())
    }

    fn unsubscribe(&mut self, path: &NodePath) -> Result<()> {
        self.subscribed.retain(|p| p != path);
        Ok(())
    }

    fn execute(&mut self) -> Result<()> {
        self.executions += 1;
        self.finished_calls = 0;
        self.forced = false;
        Ok(())
    }

    fn finished(&mut self) -> Result<bool> {
        self.finished_calls += 1;
        Ok(match self.finish_mode {
            FinishMode::AfterPolls(polls) => self.finished_calls >= polls,
            FinishMode::WhenForced => self.forced,
            FinishMode::Never => false,
        })
    }

    fn progress(&mut self) -> Result<f64> {
        Ok(match self.finish_mode {
            FinishMode::AfterPolls(polls) if polls > 0 => {
                (self.finished_calls as f64 / polls as f64).min(1.0)
            }
            _ => 0.5,
        })
    }

    fn finish(&mut self) -> Result<()> {
        self.forced = true;
        Ok(())
    }

    fn read(&mut self) -> Result<SweepResultSet> {
        Ok(SweepResultSet {
            path: self.subscribed.first().cloned(),
            records: self.records.clone(),
        })
    }
}

/// Scripted AWG module with a configurable compiler outcome.
#[derive(Debug, Clone)]
pub struct SimulatedAwgModule {
    values: IndexMap<String, NodeValue>,
    compiler_statuses: Vec<i64>,
    pending_statuses: VecDeque<i64>,
    sources: Vec<String>,
    executions: usize,
}

impl Default for SimulatedAwgModule {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedAwgModule {
    pub fn new() -> Self {
        let mut values = IndexMap::new();
        values.insert("compiler/statusstring".to_string(), NodeValue::from(""));
        values.insert("elf/status".to_string(), NodeValue::Int(0));
        values.insert("progress".to_string(), NodeValue::Double(1.0));
        SimulatedAwgModule {
            values,
            compiler_statuses: vec![0],
            pending_statuses: VecDeque::new(),
            sources: Vec::new(),
            executions: 0,
        }
    }

    /// Statuses returned by successive reads of `compiler/status` after each
    /// new source string; the last one sticks.
    pub fn with_compiler_statuses(mut self, statuses: &[i64]) -> Self {
        self.compiler_statuses = statuses.to_vec();
        self
    }

    pub fn with_status_string(mut self, message: &str) -> Self {
        self.values
            .insert("compiler/statusstring".to_string(), message.into());
        self
    }

    pub fn with_upload_failure(mut self) -> Self {
        self.values.insert("elf/status".to_string(), NodeValue::Int(1));
        self.values
            .insert("progress".to_string(), NodeValue::Double(0.0));
        self
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub fn value(&self, key: &str) -> Option<&NodeValue> {
        self.values.get(key)
    }

    pub fn executions(&self) -> usize {
        self.executions
    }
}

impl AwgModule for SimulatedAwgModule {
    fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        if key == "compiler/sourcestring" {
            self.sources.push(value.to_string());
            self.pending_statuses = self.compiler_statuses.iter().copied().collect();
        }
        self.values.insert(key.to_string(), value.into());
        Ok(())
    }

    fn set_int(&mut self, key: &str, value: i64) -> Result<()> {
        self.values.insert(key.to_string(), value.into());
        Ok(())
    }

    fn get_int(&mut self, key: &str) -> Result<i64> {
        if key == "compiler/status" {
            let status = if self.pending_statuses.len() > 1 {
                self.pending_statuses.pop_front()
            } else {
                self.pending_statuses.front().copied()
            };
            return Ok(status.unwrap_or(-1));
        }
        self.values
            .get(key)
            .and_then(NodeValue::as_i64)
            .ok_or_else(|| Error::NodeNotFound(key.to_string()))
    }

    fn get_double(&mut self, key: &str) -> Result<f64> {
        self.values
            .get(key)
            .and_then(NodeValue::as_f64)
            .ok_or_else(|| Error::NodeNotFound(key.to_string()))
    }

    fn get_string(&mut self, key: &str) -> Result<String> {
        self.values
            .get(key)
            .and_then(NodeValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| Error::NodeNotFound(key.to_string()))
    }

    fn execute(&mut self) -> Result<()> {
        self.executions += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wildcard_set_updates_matching_nodes_only() {
        let mut session = SimulatedSession::new()
            .with_node("/dev1/demods/0/harmonic", 2i64)
            .unwrap()
            .with_node("/dev1/demods/1/harmonic", 3i64)
            .unwrap()
            .with_node("/dev1/demods/1/enable", 1i64)
            .unwrap();
        session
            .set(
                &NodePath::parse("/dev1/demods/*/harmonic").unwrap(),
                NodeValue::Int(1),
            )
            .unwrap();
        assert_eq!(session.value("/dev1/demods/0/harmonic"), Some(&NodeValue::Int(1)));
        assert_eq!(session.value("/dev1/demods/1/harmonic"), Some(&NodeValue::Int(1)));
        assert_eq!(session.value("/dev1/demods/1/enable"), Some(&NodeValue::Int(1)));
        assert_eq!(session.set_log().len(), 1);
    }

    #[test]
    fn test_poll_delivers_only_subscribed_paths() {
        let wave = NodePath::parse("/dev1/qas/0/monitor/inputs/0/wave").unwrap();
        let mut session = SimulatedSession::new().without_realtime();
        session.push_stream(&wave, NodeData::Vector(vec![1.0]));
        let data = session
            .poll(Duration::from_millis(1), Duration::from_millis(1))
            .unwrap();
        assert!(data.is_empty());

        session.subscribe(std::slice::from_ref(&wave)).unwrap();
        let data = session
            .poll(Duration::from_millis(1), Duration::from_millis(1))
            .unwrap();
        assert_eq!(data[&wave], vec![NodeData::Vector(vec![1.0])]);
        assert_eq!(session.poll_count(), 2);
    }

    #[test]
    fn test_unknown_node_is_an_error() {
        let mut session = SimulatedSession::new();
        let path = NodePath::parse("/dev1/sigouts/0/on").unwrap();
        assert!(matches!(session.get_int(&path), Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_auto_clear_after_sync_set() {
        let enable = NodePath::parse("/dev1/awgs/0/enable").unwrap();
        let mut session = SimulatedSession::new()
            .with_auto_clear("/dev1/awgs/0/enable")
            .unwrap();
        assert_eq!(session.sync_set_int(&enable, 1).unwrap(), 1);
        assert_eq!(session.get_int(&enable).unwrap(), 0);
    }

    #[test]
    fn test_poll_fails_after_connection_loss() {
        let path = NodePath::parse("/dev1/demods/0/sample").unwrap();
        let mut session = SimulatedSession::new()
            .without_realtime()
            .losing_connection_after(1);
        session.subscribe(std::slice::from_ref(&path)).unwrap();
        assert!(session.poll(Duration::ZERO, Duration::ZERO).is_ok());
        assert!(matches!(
            session.poll(Duration::ZERO, Duration::ZERO),
            Err(Error::Anyhow(_))
        ));
        assert_eq!(session.poll_count(), 2);
    }

    #[test]
    fn test_builders_reject_malformed_paths() {
        assert!(matches!(
            SimulatedSession::new().with_node("dev1/sigouts/0/on", 1i64),
            Err(Error::InvalidNodePath { .. })
        ));
        assert!(matches!(
            SimulatedSession::new().with_auto_clear("/dev1//enable"),
            Err(Error::InvalidNodePath { .. })
        ));
        assert!(SimulatedSession::new().with_device("dev 1", "MFLI", "").is_err());
        let session = SimulatedSession::new()
            .with_device("DEV1", "MFLI", "MD")
            .unwrap();
        assert_eq!(
            session.value("/dev1/features/options"),
            Some(&NodeValue::from("MD"))
        );
    }

    #[test]
    fn test_compiler_statuses_restart_per_source() {
        let mut awg = SimulatedAwgModule::new().with_compiler_statuses(&[-1, 0]);
        awg.set_string("compiler/sourcestring", "a").unwrap();
        assert_eq!(awg.get_int("compiler/status").unwrap(), -1);
        assert_eq!(awg.get_int("compiler/status").unwrap(), 0);
        assert_eq!(awg.get_int("compiler/status").unwrap(), 0);
        awg.set_string("compiler/sourcestring", "b").unwrap();
        assert_eq!(awg.get_int("compiler/status").unwrap(), -1);
    }
}
