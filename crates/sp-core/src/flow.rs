//! Command results and the flow actions they carry

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{JumpTarget, ScriptExecutionError};

/// Directive a command gives the engine for moving the cursor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FlowAction {
    /// Advance to the next line
    #[default]
    Continue,
    JumpToLine(usize),
    JumpToLabel(String),
    Stop(String),
    /// Pop the call stack, or complete the script when it is empty
    Return,
    /// Hand playback over to another script
    CallScript(String),
}

impl From<JumpTarget> for FlowAction {
    fn from(target: JumpTarget) -> Self {
        match target {
            JumpTarget::Line(n) => FlowAction::JumpToLine(n),
            JumpTarget::Label(name) => FlowAction::JumpToLabel(name),
        }
    }
}

impl fmt::Display for FlowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowAction::Continue => f.write_str("continue"),
            FlowAction::JumpToLine(n) => write!(f, "jump to line {}", n),
            FlowAction::JumpToLabel(name) => write!(f, "jump to #{}", name),
            FlowAction::Stop(reason) => write!(f, "stop ({})", reason),
            FlowAction::Return => f.write_str("return"),
            FlowAction::CallScript(name) => write!(f, "call script {}", name),
        }
    }
}

/// Outcome of executing one line
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub success: bool,
    pub error: Option<ScriptExecutionError>,
    pub flow: FlowAction,
}

impl CommandResult {
    /// Successful execution, advance normally
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            flow: FlowAction::Continue,
        }
    }

    /// Successful execution with a flow directive
    pub fn flow(flow: FlowAction) -> Self {
        Self {
            success: true,
            error: None,
            flow,
        }
    }

    /// Failed execution
    pub fn failed(error: ScriptExecutionError) -> Self {
        Self {
            success: false,
            error: Some(error),
            flow: FlowAction::Continue,
        }
    }

    /// Whether applying this result may move the cursor somewhere other than the next line
    pub fn redirects(&self) -> bool {
        !matches!(self.flow, FlowAction::Continue)
    }
}
