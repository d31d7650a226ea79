// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use indexmap::IndexMap;

use crate::Result;
use crate::seqc_generator::{SeqCGenerator, call_expr};
use crate::seqc_statements::SeqCVariant;

/// Constants and user registers shared between the host and a sequence
/// program.
///
/// Registers are bound in insertion order, so the first register reads
/// `getUserReg(0)`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SequencePreamble {
    constants: IndexMap<String, SeqCVariant>,
    registers: IndexMap<String, i64>,
}

impl SequencePreamble {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_constant<S: Into<String>, V: Into<SeqCVariant>>(&mut self, name: S, value: V) {
        self.constants.insert(name.into(), value.into());
    }

    /// Add or update a user register. Updating keeps the register index.
    pub fn set_register<S: Into<String>>(&mut self, name: S, value: i64) {
        self.registers.insert(name.into(), value);
    }

    pub fn constants(&self) -> &IndexMap<String, SeqCVariant> {
        &self.constants
    }

    pub fn registers(&self) -> &IndexMap<String, i64> {
        &self.registers
    }

    /// `(register index, value)` pairs to write to `awgs/<n>/userregs/<i>`.
    pub fn register_values(&self) -> impl Iterator<Item = (usize, i64)> + '_ {
        self.registers.values().copied().enumerate()
    }

    fn constants_seqc(&self) -> Result<String> {
        if self.constants.is_empty() {
            return Ok(String::new());
        }
        let mut seqc = SeqCGenerator::new();
        for (name, value) in &self.constants {
            seqc.add_constant_definition(name.as_str(), value.clone(), None::<String>)?;
        }
        seqc.add_blank_line();
        Ok(format!("//Constants definition\n{}", seqc.generate_seq_c()))
    }

    fn registers_seqc(&self) -> Result<String> {
        if self.registers.is_empty() {
            return Ok(String::new());
        }
        let mut seqc = SeqCGenerator::new();
        for (index, name) in self.registers.keys().enumerate() {
            if self.constants.contains_key(name) {
                return Err(anyhow::anyhow!(
                    "User register {name} shadows a constant of the same name"
                )
                .into());
            }
            let index = i64::try_from(index).map_err(anyhow::Error::from)?;
            seqc.add_variable_declaration(
                name.as_str(),
                Some(call_expr("getUserReg", [index]).into()),
            )?;
        }
        seqc.add_blank_line();
        Ok(format!("//User registers\n{}", seqc.generate_seq_c()))
    }

    /// The preamble text alone.
    pub fn render(&self) -> Result<String> {
        Ok(self.constants_seqc()? + &self.registers_seqc()?)
    }

    /// `program` with the preamble in front of it.
    pub fn prepend(&self, program: &str) -> Result<String> {
        Ok(self.render()? + program)
    }
}
