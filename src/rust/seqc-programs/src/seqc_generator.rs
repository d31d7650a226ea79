// Copyright 2025 Zurich Instruments AG
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;

use crate::Result;
use crate::seqc_statements::{SeqCStatement, SeqCVariant};
use anyhow::anyhow;

fn format_comment(comment: &Option<String>) -> String {
    match comment {
        Some(comment) if !comment.is_empty() => format!("  // {comment}"),
        _ => String::new(),
    }
}

fn indent(s: &str, prefix: &str) -> String {
    s.lines()
        .flat_map(|line| [prefix, line, "\n"].into_iter())
        .collect()
}

/// Render a function call expression, `name(a, b, c)`.
pub fn call_expr<I, V>(name: &str, args: I) -> String
where
    I: IntoIterator<Item = V>,
    V: Into<SeqCVariant>,
{
    let args = args
        .into_iter()
        .map(|a| a.into().to_string())
        .collect::<Vec<String>>()
        .join(", ");
    format!("{name}({args})")
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SeqCGenerator {
    statements: Vec<SeqCStatement>,
    symbols: HashSet<String>,
}

impl SeqCGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_comment<S: Into<String>>(&mut self, comment: S) {
        self.statements.push(SeqCStatement::Comment {
            text: comment.into(),
        });
    }

    pub fn add_blank_line(&mut self) {
        self.statements.push(SeqCStatement::BlankLine);
    }

    pub fn add_function_call_statement<S1: Into<String>, S2: Into<String>>(
        &mut self,
        name: S1,
        args: Vec<SeqCVariant>,
        assign_to: Option<S2>,
    ) {
        self.statements.push(SeqCStatement::FunctionCall {
            name: name.into(),
            args,
            assign_to: assign_to.map(|s| s.into()),
        });
    }

    pub fn add_wave_assignment<S1: Into<String>, S2: Into<String>>(
        &mut self,
        wave_id: S1,
        expression: S2,
    ) -> Result<()> {
        let wave_id: String = wave_id.into();
        if !self.symbols.insert(wave_id.clone()) {
            return Err(anyhow!("Wave {wave_id} has already been declared in this scope").into());
        }
        self.statements.push(SeqCStatement::WaveAssignment {
            wave_id,
            expression: expression.into(),
        });
        Ok(())
    }

    pub fn add_constant_definition<S1: Into<String>, S2: Into<String>>(
        &mut self,
        name: S1,
        value: SeqCVariant,
        comment: Option<S2>,
    ) -> Result<()> {
        let name: String = name.into();
        if !self.symbols.insert(name.clone()) {
            return Err(anyhow!("Constant {name} has already been declared in this scope").into());
        }
        self.statements.push(SeqCStatement::Constant {
            name,
            value,
            comment: comment.map(|s| s.into()),
        });
        Ok(())
    }

    pub fn add_repeat(&mut self, num_repeats: SeqCVariant, body: SeqCGenerator) {
        self.statements
            .push(SeqCStatement::Repeat { num_repeats, body });
    }

    // only valid while the generator maps to a single scope
    pub fn add_variable_declaration<S: Into<String>>(
        &mut self,
        variable_name: S,
        initial_value: Option<SeqCVariant>,
    ) -> Result<()> {
        let variable_name: String = variable_name.into();
        if self.symbols.contains(&variable_name) {
            return Err(anyhow!(
                "Trying to declare variable {variable_name} which has already been declared in this scope"
            )
            .into());
        }
        self.symbols.insert(variable_name.clone());
        self.statements.push(SeqCStatement::VariableDeclaration {
            variable_name,
            initial_value,
        });
        Ok(())
    }

    pub fn generate_seq_c(&self) -> String {
        self.statements
            .iter()
            .map(|statement| self.emit_statement(statement))
            .collect::<String>()
    }

    fn emit_statement(&self, statement: &SeqCStatement) -> String {
        match statement {
            SeqCStatement::Comment { text } => format!("// {text}\n"),
            SeqCStatement::BlankLine => "\n".to_string(),
            SeqCStatement::FunctionCall {
                name,
                args,
                assign_to,
            } => {
                let assign_to = assign_to
                    .as_ref()
                    .map(|s| format!("{s} = "))
                    .unwrap_or_default();
                let args = args
                    .iter()
                    .map(|s| s.to_string())
                    .collect::<Vec<String>>()
                    .join(", ");

                format!("{assign_to}{name}({args});\n")
            }
            SeqCStatement::WaveAssignment {
                wave_id,
                expression,
            } => format!("wave {wave_id} = {expression};\n"),
            SeqCStatement::VariableDeclaration {
                variable_name,
                initial_value,
            } => {
                let initial_value = initial_value
                    .as_ref()
                    .map(|s| format!(" = {s}"))
                    .unwrap_or_default();
                format!("var {variable_name}{initial_value};\n")
            }
            SeqCStatement::Repeat {
                num_repeats, body, ..
            } => {
                let body = indent(&body.generate_seq_c(), "    ");
                format!("repeat ({num_repeats}) {{\n{body}}}\n")
            }
            SeqCStatement::Constant {
                name,
                value,
                comment,
            } => {
                format!("const {} = {};{}\n", name, value, format_comment(comment))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repeat_body_is_indented() {
        let mut seqc = SeqCGenerator::new();
        seqc.add_variable_declaration("n", Some(SeqCVariant::Integer(4)))
            .unwrap();
        let mut body = SeqCGenerator::new();
        body.add_function_call_statement(
            "playWave",
            vec!["w_I".into(), "w_Q".into()],
            None::<String>,
        );
        body.add_function_call_statement("wait", vec![1024i64.into()], None::<String>);
        seqc.add_repeat("n".into(), body);
        assert_eq!(
            seqc.generate_seq_c(),
            "var n = 4;\nrepeat (n) {\n    playWave(w_I, w_Q);\n    wait(1024);\n}\n"
        );
    }

    #[test]
    fn test_redeclaration_is_rejected() {
        let mut seqc = SeqCGenerator::new();
        seqc.add_variable_declaration("x", None).unwrap();
        assert!(seqc.add_variable_declaration("x", None).is_err());
        assert!(seqc.add_wave_assignment("x", "zeros(16)").is_err());
    }

    #[test]
    fn test_constant_with_comment() {
        let mut seqc = SeqCGenerator::new();
        seqc.add_constant_definition("f0", 1.5e8_f64.into(), Some("readout"))
            .unwrap();
        seqc.add_constant_definition("n", SeqCVariant::Integer(-3), Some(""))
            .unwrap();
        assert_eq!(
            seqc.generate_seq_c(),
            "const f0 = 150000000;  // readout\nconst n = -3;\n"
        );
        assert!(
            seqc.add_constant_definition("n", SeqCVariant::Integer(1), None::<String>)
                .is_err()
        );
    }

    #[test]
    fn test_assigned_call_and_expression() {
        let mut seqc = SeqCGenerator::new();
        seqc.add_wave_assignment("w_pad", call_expr("zeros", ["(totalLength-1)%16"]))
            .unwrap();
        seqc.add_function_call_statement(
            "add",
            vec!["w_I".into(), "w0_I".into()],
            Some("w_I"),
        );
        assert_eq!(
            seqc.generate_seq_c(),
            "wave w_pad = zeros((totalLength-1)%16);\nw_I = add(w_I, w0_I);\n"
        );
    }
}
