// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Session setup: device connection, option and version checks, and
//! resetting a device to a known state.

use std::fmt;

use labone_common::{DeviceKind, DeviceOptions};
use labone_log::info;

use crate::node::NodePath;
use crate::session::Session;
use crate::settings::NodeSettings;
use crate::{Error, Result};

/// A connected device and what it reported about itself.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceSession {
    pub device: String,
    pub kind: DeviceKind,
    pub options: DeviceOptions,
}

impl DeviceSession {
    pub fn node(&self, node: &str) -> Result<NodePath> {
        NodePath::device(&self.device, node)
    }
}

/// Connect `device` and verify that it carries `required_options`.
///
/// `required_err_msg` replaces the default message when an option is
/// missing, e.g. "This example only supports instruments with IA option."
pub fn create_api_session<S: Session + ?Sized>(
    session: &mut S,
    device: &str,
    interface: &str,
    required_options: &[&str],
    required_err_msg: Option<&str>,
) -> Result<DeviceSession> {
    let device = device.trim().to_lowercase();
    session.connect_device(&device, interface)?;
    let devtype = session.get_string(&NodePath::device(&device, "features/devtype")?)?;
    let options = DeviceOptions::parse(
        &session.get_string(&NodePath::device(&device, "features/options")?)?,
    );
    for option in required_options {
        if !options.contains(option) {
            let message = required_err_msg
                .map(str::to_string)
                .unwrap_or_else(|| {
                    format!("Device {device} does not have the required option {option}.")
                });
            return Err(Error::MissingOption {
                option: option.to_string(),
                message,
            });
        }
    }
    let kind = DeviceKind::from_devtype(&devtype, &options).ok_or_else(|| {
        anyhow::anyhow!("Device {device} reports unsupported device type '{devtype}'")
    })?;
    info!("Connected to {} ({}) via {}", device, kind, interface);
    Ok(DeviceSession {
        device,
        kind,
        options,
    })
}

/// LabOne release decoded from a revision integer such as `210820085`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LabOneRevision {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl LabOneRevision {
    pub const fn new(major: u32, minor: u32, build: u32) -> Self {
        LabOneRevision {
            major,
            minor,
            build,
        }
    }

    pub fn from_revision(revision: i64) -> Self {
        let revision = revision.max(0) as u64;
        LabOneRevision {
            major: (revision / 10u64.pow(7)) as u32,
            minor: ((revision / 10u64.pow(5)) % 100) as u32,
            build: (revision % 10u64.pow(5)) as u32,
        }
    }

    pub fn same_release(&self, other: &LabOneRevision) -> bool {
        self.major == other.major && self.minor == other.minor
    }
}

impl fmt::Display for LabOneRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Fail unless the client library and the data server belong to the same
/// LabOne release.
pub fn api_server_version_check<S: Session + ?Sized>(session: &mut S) -> Result<()> {
    let client = LabOneRevision::from_revision(session.api_revision());
    let server = LabOneRevision::from_revision(
        session.get_int(&NodePath::parse("/zi/about/revision")?)?,
    );
    if client.same_release(&server) {
        return Ok(());
    }
    let hint = if client < server {
        format!("Please update the client API to version {}.{}.", server.major, server.minor)
    } else {
        format!(
            "Please update the LabOne installation to version {}.{}.",
            client.major, client.minor
        )
    };
    Err(Error::VersionMismatch {
        message: format!(
            "Data server version ({server}) does not match the API version ({client})."
        ),
        hint,
    })
}

/// Minimum versions a helper was validated against.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionRequirements {
    pub client_min: LabOneRevision,
    pub labone_min: LabOneRevision,
    pub firmware_min: Option<i64>,
}

impl VersionRequirements {
    /// Requirements of the HDAWG command-table and register helpers.
    pub fn hdawg() -> Self {
        VersionRequirements {
            client_min: LabOneRevision::new(21, 8, 20085),
            labone_min: LabOneRevision::new(21, 8, 20085),
            firmware_min: DeviceKind::Hdawg.traits().min_firmware_revision,
        }
    }

    pub fn check<S: Session + ?Sized>(&self, session: &mut S, device: &str) -> Result<()> {
        let client = LabOneRevision::from_revision(session.api_revision());
        if client < self.client_min {
            return Err(Error::VersionMismatch {
                message: format!(
                    "The client API needs to be updated to version {} or above (found {client})!",
                    self.client_min
                ),
                hint: format!(
                    "You can do that by installing the client package of release {}.",
                    self.client_min
                ),
            });
        }
        let labone = LabOneRevision::from_revision(
            session.get_int(&NodePath::parse("/zi/about/revision")?)?,
        );
        if labone < self.labone_min {
            return Err(Error::VersionMismatch {
                message: format!(
                    "The LabOne installation needs to be updated to version {} or above (found {labone})!",
                    self.labone_min
                ),
                hint: "Please follow the instructions in the User Manual to perform the upgrade."
                    .to_string(),
            });
        }
        if let Some(firmware_min) = self.firmware_min {
            let firmware = session.get_int(&NodePath::device(device, "system/fwrevision")?)?;
            if firmware < firmware_min {
                return Err(Error::VersionMismatch {
                    message: format!(
                        "The FW on device {device} needs to be updated (found {firmware}, need {firmware_min})!"
                    ),
                    hint: "Please follow the instructions in the User Manual to perform the FW upgrade."
                        .to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Switch off every output and streaming unit present on the device.
///
/// Returns the table that was applied.
pub fn disable_everything<S: Session + ?Sized>(
    session: &mut S,
    device: &DeviceSession,
) -> Result<NodeSettings> {
    let traits = device.kind.traits();
    let mut settings = NodeSettings::for_device(&device.device);
    if traits.demodulators > 0 {
        settings.push("demods/*/enable", 0)?;
        settings.push("demods/*/trigger", 0)?;
    }
    if traits.signal_outputs > 0 {
        settings.push("sigouts/*/enables/*", 0)?;
        settings.push("sigouts/*/on", 0)?;
    }
    if traits.scopes > 0 {
        settings.push("scopes/*/enable", 0)?;
    }
    if traits.pids > 0 {
        settings.push("pids/*/enable", 0)?;
    }
    if traits.has_awg() {
        settings.push("awgs/*/enable", 0)?;
    }
    if traits.impedance_units > 0 {
        settings.push("imps/*/enable", 0)?;
    }
    session.set_many(&settings)?;
    session.sync()?;
    Ok(settings)
}
