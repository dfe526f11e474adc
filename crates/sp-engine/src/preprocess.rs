//! Script preprocessing
//!
//! One ordered pass over the script before the first line runs: registers
//! labels so forward jumps resolve, and checks that every command line has a
//! command. All problems are collected; the caller decides whether they are
//! fatal.

use sp_core::ScriptExecutionError;
use std::collections::HashMap;
use thiserror::Error;

use crate::script::{Line, Script, TextKind};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreprocessError {
    #[error("line {duplicate}: label '{label}' is already defined on line {first}")]
    DuplicateLabel {
        label: String,
        first: usize,
        duplicate: usize,
    },

    #[error("line {line}: label has no name")]
    EmptyLabel { line: usize },

    #[error("line {line}: no command for '{text}'")]
    MissingCommand { line: usize, text: String },
}

impl PreprocessError {
    pub fn line(&self) -> usize {
        match self {
            PreprocessError::DuplicateLabel { duplicate, .. } => *duplicate,
            PreprocessError::EmptyLabel { line } => *line,
            PreprocessError::MissingCommand { line, .. } => *line,
        }
    }
}

/// Outcome of preprocessing
#[derive(Debug, Clone, Default)]
pub struct PreprocessReport {
    /// Label name to line index; the first definition wins
    pub labels: HashMap<String, usize>,
    pub errors: Vec<PreprocessError>,
}

impl PreprocessReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Fold the report into a single validation error
    pub fn to_error(&self, script_name: &str) -> Option<ScriptExecutionError> {
        let first = self.errors.first()?;
        let mut error = ScriptExecutionError::validation(format!(
            "preprocessing found {} error(s), first: {}",
            self.errors.len(),
            first
        ))
        .in_script(script_name)
        .at_line(first.line())
        .with_suggestion("fix the script and play it again");

        for (i, e) in self.errors.iter().enumerate() {
            error = error.with_context(format!("error.{}", i), e.to_string());
        }
        Some(error)
    }
}

/// Scan the script once, in order
pub fn preprocess(script: &Script) -> PreprocessReport {
    let mut report = PreprocessReport::default();

    for (index, line) in script.lines().iter().enumerate() {
        match line {
            Line::Text(text) => {
                if let TextKind::Label(name) = text.kind() {
                    if name.is_empty() {
                        report.errors.push(PreprocessError::EmptyLabel { line: index });
                        continue;
                    }
                    match report.labels.get(name) {
                        Some(&first) => report.errors.push(PreprocessError::DuplicateLabel {
                            label: name.to_string(),
                            first,
                            duplicate: index,
                        }),
                        None => {
                            report.labels.insert(name.to_string(), index);
                        }
                    }
                }
            }
            Line::Command(command) => {
                if command.command().is_none() {
                    report.errors.push(PreprocessError::MissingCommand {
                        line: index,
                        text: command.text().to_string(),
                    });
                }
            }
        }
    }

    report
}
