// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::fmt;

use num_complex::Complex;

use crate::{Error, Result};

/// Absolute, lower-case address of a node in the instrument settings tree,
/// e.g. `/dev2266/qas/0/monitor/length`.
///
/// A segment may be the wildcard `*`, which matches exactly one segment of a
/// concrete path. Wildcards are only meaningful for settings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodePath(pub(crate) String);

impl NodePath {
    pub fn parse(path: impl AsRef<str>) -> Result<Self> {
        let raw = path.as_ref().trim();
        let invalid = |reason| Error::InvalidNodePath {
            path: raw.to_string(),
            reason,
        };
        if !raw.starts_with('/') {
            return Err(invalid("path must start with '/'"));
        }
        let normalized = raw.trim_end_matches('/').to_lowercase();
        if normalized.is_empty() {
            return Err(invalid("path has no segments"));
        }
        let segments: Vec<&str> = normalized[1..].split('/').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(invalid("path contains an empty segment"));
        }
        for segment in &segments {
            let valid = *segment == "*"
                || segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.');
            if !valid {
                return Err(invalid("segments may only contain [a-z0-9_.] or be '*'"));
            }
        }
        Ok(NodePath(normalized))
    }

    /// Join a device ID and a device-relative node, `("dev4022", "sigouts/0/on")`.
    pub fn device(device: &str, node: &str) -> Result<Self> {
        Self::parse(format!(
            "/{}/{}",
            device.trim_matches('/'),
            node.trim_start_matches('/')
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0[1..].split('/')
    }

    pub fn is_wildcard(&self) -> bool {
        self.segments().any(|s| s == "*")
    }

    /// Whether `self`, possibly containing wildcards, addresses `concrete`.
    pub fn matches(&self, concrete: &NodePath) -> bool {
        let mut pattern = self.segments();
        let mut target = concrete.segments();
        loop {
            match (pattern.next(), target.next()) {
                (None, None) => return true,
                (Some(p), Some(t)) if p == "*" || p == t => {}
                _ => return false,
            }
        }
    }
}

impl fmt::Display for NodePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for NodePath {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        NodePath::parse(value)
    }
}

/// A scalar or vector setting value.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue {
    Int(i64),
    Double(f64),
    String(String),
    Vector(Vec<f64>),
    /// Raw AWG waveform data, interleaved channel samples.
    Int16Vector(Vec<i16>),
    /// A JSON document uploaded through a vector node (command tables).
    Json(String),
}

impl NodeValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            NodeValue::Int(_) => "integer",
            NodeValue::Double(_) => "double",
            NodeValue::String(_) => "string",
            NodeValue::Vector(_) => "vector",
            NodeValue::Int16Vector(_) => "int16 vector",
            NodeValue::Json(_) => "json",
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NodeValue::Int(v) => Some(*v),
            NodeValue::Double(v) if v.fract() == 0.0 => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NodeValue::Int(v) => Some(*v as f64),
            NodeValue::Double(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NodeValue::String(s) | NodeValue::Json(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for NodeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeValue::Int(v) => write!(f, "{v}"),
            NodeValue::Double(v) => write!(f, "{v}"),
            NodeValue::String(s) | NodeValue::Json(s) => write!(f, "{s}"),
            NodeValue::Vector(v) => write!(f, "<vector of {} values>", v.len()),
            NodeValue::Int16Vector(v) => write!(f, "<int16 vector of {} values>", v.len()),
        }
    }
}

impl From<i64> for NodeValue {
    fn from(value: i64) -> Self {
        NodeValue::Int(value)
    }
}

impl From<i32> for NodeValue {
    fn from(value: i32) -> Self {
        NodeValue::Int(value.into())
    }
}

impl From<bool> for NodeValue {
    fn from(value: bool) -> Self {
        NodeValue::Int(value.into())
    }
}

impl From<f64> for NodeValue {
    fn from(value: f64) -> Self {
        NodeValue::Double(value)
    }
}

impl From<&str> for NodeValue {
    fn from(value: &str) -> Self {
        NodeValue::String(value.to_string())
    }
}

impl From<String> for NodeValue {
    fn from(value: String) -> Self {
        NodeValue::String(value)
    }
}

impl From<Vec<f64>> for NodeValue {
    fn from(value: Vec<f64>) -> Self {
        NodeValue::Vector(value)
    }
}

impl From<Vec<i16>> for NodeValue {
    fn from(value: Vec<i16>) -> Self {
        NodeValue::Int16Vector(value)
    }
}

/// Demodulator sample as delivered under `/<dev>/demods/<n>/sample`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DemodSample {
    pub timestamp: u64,
    pub x: f64,
    pub y: f64,
    pub frequency: f64,
}

impl DemodSample {
    /// Amplitude of the polar representation.
    pub fn r(&self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Phase of the polar representation in radians.
    pub fn theta(&self) -> f64 {
        self.y.atan2(self.x)
    }
}

/// Impedance analyzer sample as delivered under `/<dev>/imps/<n>/sample`.
///
/// `param0`/`param1` depend on the representation model selected with
/// `imps/<n>/model`; for the R||C model they are resistance and capacitance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImpedanceSample {
    pub timestamp: u64,
    pub z: Complex<f64>,
    pub param0: f64,
    pub param1: f64,
    pub frequency: f64,
}

/// One chunk of streamed data returned by a poll.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeData {
    Vector(Vec<f64>),
    Demod(Vec<DemodSample>),
    Impedance(Vec<ImpedanceSample>),
}

impl NodeData {
    pub fn len(&self) -> usize {
        match self {
            NodeData::Vector(v) => v.len(),
            NodeData::Demod(v) => v.len(),
            NodeData::Impedance(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn kind(&self) -> &'static str {
        match self {
            NodeData::Vector(_) => "vector",
            NodeData::Demod(_) => "demodulator sample",
            NodeData::Impedance(_) => "impedance sample",
        }
    }
}
