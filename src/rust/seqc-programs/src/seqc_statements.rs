// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use crate::seqc_generator::SeqCGenerator;
use std::fmt;

// identifiers, expressions and numeric literals
#[derive(Debug, Clone, PartialEq)]
pub enum SeqCVariant {
    /// Identifier or expression, emitted verbatim.
    String(String),
    Integer(i64),
    Float(f64),
}

impl fmt::Display for SeqCVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SeqCVariant::String(s) => write!(f, "{s}"),
            SeqCVariant::Integer(i) => write!(f, "{i}"),
            SeqCVariant::Float(flt) => write!(f, "{flt}"),
        }
    }
}

impl From<i64> for SeqCVariant {
    fn from(value: i64) -> Self {
        SeqCVariant::Integer(value)
    }
}

impl From<f64> for SeqCVariant {
    fn from(value: f64) -> Self {
        SeqCVariant::Float(value)
    }
}

impl From<&str> for SeqCVariant {
    fn from(value: &str) -> Self {
        SeqCVariant::String(value.to_string())
    }
}

impl From<String> for SeqCVariant {
    fn from(value: String) -> Self {
        SeqCVariant::String(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SeqCStatement {
    Comment {
        text: String,
    },
    BlankLine,
    FunctionCall {
        name: String,
        args: Vec<SeqCVariant>,
        assign_to: Option<String>,
    },
    WaveAssignment {
        wave_id: String,
        expression: String,
    },
    Constant {
        name: String,
        value: SeqCVariant,
        comment: Option<String>,
    },
    Repeat {
        num_repeats: SeqCVariant,
        body: SeqCGenerator,
    },
    VariableDeclaration {
        variable_name: String,
        initial_value: Option<SeqCVariant>,
    },
}
