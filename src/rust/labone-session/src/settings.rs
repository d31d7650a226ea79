// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Ordered configuration tables.
//!
//! A table is applied in one transaction. Order is significant and the same
//! node may appear more than once, e.g. `result/enable = 0` first and
//! `result/enable = 1` last.

use crate::node::{NodePath, NodeValue};
use crate::Result;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeSettings {
    device: Option<String>,
    entries: Vec<(NodePath, NodeValue)>,
}

impl NodeSettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table whose relative nodes are resolved under `/<device>/`.
    pub fn for_device(device: &str) -> Self {
        NodeSettings {
            device: Some(device.to_string()),
            entries: Vec::new(),
        }
    }

    /// Append a device-relative setting.
    ///
    /// Absolute paths are taken as they are; relative ones require the table
    /// to be bound to a device.
    pub fn set(mut self, node: &str, value: impl Into<NodeValue>) -> Result<Self> {
        self.push(node, value)?;
        Ok(self)
    }

    pub fn push(&mut self, node: &str, value: impl Into<NodeValue>) -> Result<()> {
        let path = match (&self.device, node.starts_with('/')) {
            (_, true) => NodePath::parse(node)?,
            (Some(device), false) => NodePath::device(device, node)?,
            (None, false) => {
                return Err(anyhow::anyhow!(
                    "Relative node '{node}' in a settings table without a device"
                )
                .into());
            }
        };
        self.entries.push((path, value.into()));
        Ok(())
    }

    pub fn push_path(&mut self, path: NodePath, value: impl Into<NodeValue>) {
        self.entries.push((path, value.into()));
    }

    pub fn extend(&mut self, other: NodeSettings) {
        self.entries.extend(other.entries);
    }

    pub fn iter(&self) -> impl Iterator<Item = &(NodePath, NodeValue)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Last value written to `path` by this table, if any.
    pub fn last_value(&self, path: &NodePath) -> Option<&NodeValue> {
        self.entries
            .iter()
            .rev()
            .find(|(p, _)| p == path)
            .map(|(_, v)| v)
    }
}

impl<'a> IntoIterator for &'a NodeSettings {
    type Item = &'a (NodePath, NodeValue);
    type IntoIter = std::slice::Iter<'a, (NodePath, NodeValue)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_and_duplicates_preserved() {
        let settings = NodeSettings::for_device("dev2266")
            .set("qas/0/result/enable", 0)
            .unwrap()
            .set("qas/0/result/length", 100)
            .unwrap()
            .set("qas/0/result/enable", 1)
            .unwrap();
        let paths: Vec<&str> = settings.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/dev2266/qas/0/result/enable",
                "/dev2266/qas/0/result/length",
                "/dev2266/qas/0/result/enable",
            ]
        );
        let enable = NodePath::parse("/dev2266/qas/0/result/enable").unwrap();
        assert_eq!(settings.last_value(&enable), Some(&NodeValue::Int(1)));
    }

    #[test]
    fn test_relative_node_requires_device() {
        assert!(NodeSettings::new().set("sigouts/0/on", 1).is_err());
        assert!(NodeSettings::new().set("/dev1/sigouts/0/on", 1).is_ok());
    }
}
