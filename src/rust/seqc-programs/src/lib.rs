// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

//! Generation of AWG sequence programs (`.seqc` text).

pub mod preamble;
pub mod readout;
pub mod seqc_generator;
pub mod seqc_statements;

pub use preamble::SequencePreamble;
pub use readout::{
    MAX_READOUT_CHANNELS, ReadoutChannel, readout_channels, sequence_multiplexed_readout,
};
pub use seqc_generator::{SeqCGenerator, call_expr};
pub use seqc_statements::{SeqCStatement, SeqCVariant};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
