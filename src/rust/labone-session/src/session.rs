// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::node::{NodeData, NodePath, NodeValue};
use crate::settings::NodeSettings;
use crate::{Error, Result};

/// Data returned by a single poll: the chunks received per subscribed path,
/// in arrival order.
pub type PollResult = IndexMap<NodePath, Vec<NodeData>>;

/// Connection parameters of a data-server session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub api_level: u8,
    pub interface: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            host: "localhost".to_string(),
            port: 8004,
            api_level: 6,
            interface: "1GbE".to_string(),
        }
    }
}

/// Blocking access to a LabOne data server.
///
/// Mirrors the node-level calls of the vendor API. Calls are issued
/// sequentially from a single thread; the instrument runs sweeps and
/// sequences in the background and is observed through polling.
pub trait Session {
    fn connect_device(&mut self, device: &str, interface: &str) -> Result<()>;

    fn get(&mut self, path: &NodePath) -> Result<NodeValue>;

    fn set(&mut self, path: &NodePath, value: NodeValue) -> Result<()>;

    /// Latest streamed sample of a node, without subscribing.
    fn get_sample(&mut self, path: &NodePath) -> Result<NodeData>;

    /// Block until all previously issued settings reached the device.
    fn sync(&mut self) -> Result<()>;

    /// Drop all data buffered for subscribed paths.
    fn flush(&mut self) -> Result<()>;

    fn subscribe(&mut self, paths: &[NodePath]) -> Result<()>;

    fn unsubscribe(&mut self, paths: &[NodePath]) -> Result<()>;

    fn unsubscribe_all(&mut self) -> Result<()>;

    /// Record data of subscribed paths for `recording`, waiting at most
    /// `timeout` for the first data to arrive.
    fn poll(&mut self, recording: Duration, timeout: Duration) -> Result<PollResult>;

    /// Revision of the client library, encoded like `/zi/about/revision`.
    fn api_revision(&self) -> i64;

    /// Apply a settings table as one transaction.
    fn set_many(&mut self, settings: &NodeSettings) -> Result<()> {
        for (path, value) in settings {
            self.set(path, value.clone())?;
        }
        Ok(())
    }

    /// Set an integer and wait until the device has acknowledged it.
    fn sync_set_int(&mut self, path: &NodePath, value: i64) -> Result<i64> {
        self.set(path, NodeValue::Int(value))?;
        self.sync()?;
        self.get_int(path)
    }

    fn get_int(&mut self, path: &NodePath) -> Result<i64> {
        let value = self.get(path)?;
        value.as_i64().ok_or_else(|| Error::NodeType {
            path: path.to_string(),
            expected: "integer",
            actual: value.type_name(),
        })
    }

    fn get_double(&mut self, path: &NodePath) -> Result<f64> {
        let value = self.get(path)?;
        value.as_f64().ok_or_else(|| Error::NodeType {
            path: path.to_string(),
            expected: "double",
            actual: value.type_name(),
        })
    }

    fn get_string(&mut self, path: &NodePath) -> Result<String> {
        let value = self.get(path)?;
        match value {
            NodeValue::String(s) | NodeValue::Json(s) => Ok(s),
            other => Err(Error::NodeType {
                path: path.to_string(),
                expected: "string",
                actual: other.type_name(),
            }),
        }
    }
}
