// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::types::DeviceKind;

/// Commonly used device traits
pub struct DeviceTraits {
    pub sampling_rate: f64,
    pub signal_outputs: u16,
    pub demodulators: u16,
    pub oscillators: u16,
    pub scopes: u16,
    pub pids: u16,
    pub awg_cores: u16,
    pub channels_per_awg: u16,
    pub impedance_units: u16,
    /// Port of the data server the device is served by.
    pub data_server_port: u16,
    /// Lowest firmware revision the helpers in this workspace were tested with.
    pub min_firmware_revision: Option<i64>,
}

impl DeviceTraits {
    pub fn from_device_kind(kind: &DeviceKind) -> &'static Self {
        match kind {
            DeviceKind::Mfli => &MFLI_TRAITS,
            DeviceKind::Mfia => &MFIA_TRAITS,
            DeviceKind::Uhfli => &UHFLI_TRAITS,
            DeviceKind::Uhfqa => &UHFQA_TRAITS,
            DeviceKind::Hdawg => &HDAWG_TRAITS,
        }
    }

    pub fn has_awg(&self) -> bool {
        self.awg_cores > 0
    }
}

pub const MFLI_TRAITS: DeviceTraits = DeviceTraits {
    sampling_rate: 60e6,
    signal_outputs: 1,
    demodulators: 4,
    oscillators: 1,
    scopes: 1,
    pids: 4,
    awg_cores: 0,
    channels_per_awg: 0,
    impedance_units: 0,
    data_server_port: 8004,
    min_firmware_revision: None,
};

pub const MFIA_TRAITS: DeviceTraits = DeviceTraits {
    impedance_units: 1,
    ..MFLI_TRAITS
};

pub const UHFLI_TRAITS: DeviceTraits = DeviceTraits {
    sampling_rate: 1.8e9,
    signal_outputs: 2,
    demodulators: 8,
    oscillators: 8,
    scopes: 1,
    pids: 4,
    awg_cores: 0,
    channels_per_awg: 0,
    impedance_units: 0,
    data_server_port: 8004,
    min_firmware_revision: None,
};

pub const UHFQA_TRAITS: DeviceTraits = DeviceTraits {
    sampling_rate: 1.8e9,
    signal_outputs: 2,
    demodulators: 0,
    oscillators: 0,
    scopes: 1,
    pids: 0,
    awg_cores: 1,
    channels_per_awg: 2,
    impedance_units: 0,
    data_server_port: 8004,
    min_firmware_revision: None,
};

pub const HDAWG_TRAITS: DeviceTraits = DeviceTraits {
    sampling_rate: 2.4e9,
    signal_outputs: 8,
    demodulators: 0,
    oscillators: 16,
    scopes: 0,
    pids: 0,
    awg_cores: 4,
    channels_per_awg: 2,
    impedance_units: 0,
    data_server_port: 8004,
    min_firmware_revision: Some(67742),
};
