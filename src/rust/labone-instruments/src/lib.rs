// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Measurement workflows for Zurich Instruments devices.
//!
//! Each module covers one instrument application and is written against the
//! session traits of `labone_session`, so it runs unchanged on the simulator.

pub mod demod;
pub mod export;
pub mod hdawg;
pub mod impedance;
pub mod mfli_qcontrol;
pub mod uhfqa;

pub use demod::{
    DemodSetup, DemodSweep, configure_demod_readout, default_output_mixer_channel,
    demod_frequency_sweep, demod_sweeper_settings, read_demod_sample,
};
pub use export::{write_matrix_csv, write_matrix_csv_to};
pub use hdawg::{HdawgCore, Waveform, interleave_waveform};
pub use impedance::{
    BiasSweepSettings, Grid2D, ImpedanceMap, ImpedanceSetup, MuxRoute, MuxSweep,
    bias_frequency_map, multiplexed_impedance_sweep,
};
pub use uhfqa::{
    IqTrace, OptimalWeights, OptimalWeightsSettings, Quadrature, ResultSource,
    generate_demod_weights, optimal_integration_weights, reset_integration_weights, run_awg,
    set_integration_weights, set_qa_monitor, set_qa_results, toggle_outputs,
    write_crosstalk_matrix,
};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Session(#[from] labone_session::Error),
    #[error(transparent)]
    Sequence(#[from] seqc_programs::Error),
    #[error("No impedance data at bias {bias} V and frequency {frequency} Hz")]
    MissingSample { bias: f64, frequency: f64 },
    #[error("Unexpected data on '{path}': expected {expected}, got {actual}")]
    UnexpectedData {
        path: String,
        expected: &'static str,
        actual: &'static str,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
