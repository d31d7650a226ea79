// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! TOML configuration of the command line tool.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use labone_instruments::{BiasSweepSettings, Grid2D, ImpedanceSetup};
use labone_session::SessionConfig;
use serde::{Deserialize, Serialize};

const MAX_API_LEVEL: u8 = 6;

#[derive(Debug, Clone)]
pub struct SanitizationChange {
    pub field: &'static str,
    pub original: String,
    pub sanitized: String,
    pub reason: String,
}

/// Timing of a point-by-point measurement, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub settle_ms: u64,
    pub recording_ms: u64,
    pub timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            settle_ms: 1000,
            recording_ms: 100,
            timeout_ms: 500,
        }
    }
}

impl PollConfig {
    pub fn bias_sweep_settings(&self) -> BiasSweepSettings {
        BiasSweepSettings {
            settle: Duration::from_millis(self.settle_ms),
            recording: Duration::from_millis(self.recording_ms),
            poll_timeout: Duration::from_millis(self.timeout_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabConfig {
    pub device: String,
    pub output_dir: PathBuf,
    pub session: SessionConfig,
    pub poll: PollConfig,
    pub impedance: ImpedanceSetup,
    pub grid: Grid2D,
}

impl Default for LabConfig {
    fn default() -> Self {
        LabConfig {
            device: "dev4220".to_string(),
            output_dir: PathBuf::from("."),
            session: SessionConfig::default(),
            poll: PollConfig::default(),
            impedance: ImpedanceSetup::default(),
            grid: Grid2D::default(),
        }
    }
}

impl LabConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid configuration {}", path.display()))
    }

    /// Clamp values the instruments would reject. Returns one entry per
    /// changed field.
    pub fn sanitize(&mut self) -> Vec<SanitizationChange> {
        let mut changes = vec![];
        let mut record = |field, original: String, sanitized: String, reason: &str| {
            if original != sanitized {
                changes.push(SanitizationChange {
                    field,
                    original,
                    sanitized,
                    reason: reason.to_string(),
                });
            }
        };

        let device = self.device.trim().to_lowercase();
        record(
            "device",
            self.device.clone(),
            device.clone(),
            "Device IDs are lowercase without whitespace.",
        );
        self.device = device;

        let api_level = self.session.api_level.clamp(1, MAX_API_LEVEL);
        record(
            "session.api_level",
            self.session.api_level.to_string(),
            api_level.to_string(),
            "Supported API levels are 1 to 6.",
        );
        self.session.api_level = api_level;

        if self.session.port == 0 {
            let port = SessionConfig::default().port;
            record(
                "session.port",
                "0".to_string(),
                port.to_string(),
                "Port 0 is not a data server port.",
            );
            self.session.port = port;
        }

        let timeout_ms = self.poll.timeout_ms.max(self.poll.recording_ms);
        record(
            "poll.timeout_ms",
            self.poll.timeout_ms.to_string(),
            timeout_ms.to_string(),
            "The poll timeout must cover the recording time.",
        );
        self.poll.timeout_ms = timeout_ms;

        for (field, points) in [
            ("grid.bias_points", &mut self.grid.bias_points),
            ("grid.frequency_points", &mut self.grid.frequency_points),
        ] {
            let sanitized = (*points).max(1);
            record(
                field,
                points.to_string(),
                sanitized.to_string(),
                "A grid axis needs at least one point.",
            );
            *points = sanitized;
        }

        let range = self.impedance.output_range.abs();
        let amplitude = self.impedance.output_amplitude.clamp(0.0, range);
        record(
            "impedance.output_amplitude",
            self.impedance.output_amplitude.to_string(),
            amplitude.to_string(),
            "The drive amplitude must lie within the output range.",
        );
        self.impedance.output_amplitude = amplitude;

        changes
    }
}
