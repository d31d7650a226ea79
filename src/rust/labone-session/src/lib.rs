// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Thin, blocking layer over a LabOne data-server session.
//!
//! The vendor API itself is reached through the [`Session`], [`SweeperModule`]
//! and [`AwgModule`] traits. Everything in this crate is written against
//! those traits, so the same workflows run against a real binding or the
//! in-memory [`simulated`] instrument.

pub mod awg_module;
pub mod node;
pub mod poll;
pub mod session;
pub mod settings;
pub mod setup;
pub mod simulated;
pub mod sweeper;

use std::time::Duration;

pub use awg_module::{AwgModule, CompileSettings, CompilerStatus, compile_sequence};
pub use node::{DemodSample, ImpedanceSample, NodeData, NodePath, NodeValue};
pub use poll::{Accumulator, PathShortfall, PollSettings, acquisition_poll};
pub use session::{PollResult, Session, SessionConfig};
pub use settings::NodeSettings;
pub use setup::{
    DeviceSession, LabOneRevision, VersionRequirements, api_server_version_check,
    create_api_session, disable_everything,
};
pub use sweeper::{
    SweepOutcome, SweepRecord, SweepResultSet, SweepRun, SweeperModule, SweeperSettings, run_sweep,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Invalid node path '{path}': {reason}")]
    InvalidNodePath { path: String, reason: &'static str },
    #[error("Node '{0}' does not exist")]
    NodeNotFound(String),
    #[error("Node '{path}' holds a {actual} value, expected {expected}")]
    NodeType {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error("{message}")]
    MissingOption { option: String, message: String },
    #[error("{message}\n{hint}")]
    VersionMismatch { message: String, hint: String },
    #[error(
        "Timeout Error: Did not get all results within {:.1} s!\n{}",
        .timeout.as_secs_f64(),
        poll::format_shortfall(.shortfall)
    )]
    AcquisitionTimeout {
        timeout: Duration,
        shortfall: Vec<PathShortfall>,
    },
    #[error("Timed out after {:.1} s while waiting for {what}", .timeout.as_secs_f64())]
    Timeout { what: String, timeout: Duration },
    #[error("No sweep data for '{0}'")]
    NoSweepData(String),
    #[error("The sweeper returned an unexpected number of sweeps: {actual}. Expected: {expected}.")]
    SweepCount { expected: usize, actual: usize },
    #[error("Failed to compile program. Error message:\n{0}")]
    Compilation(String),
    #[error("Compilation successful with warnings. Warning message:\n{0}")]
    CompilationWarning(String),
    #[error("Failed to upload program.")]
    Upload,
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
