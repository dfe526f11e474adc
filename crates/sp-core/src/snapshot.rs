//! Serializable execution snapshots and playback results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ScriptExecutionError;

/// Return address pushed by a subroutine call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub return_line_index: usize,
}

impl Frame {
    pub fn new(return_line_index: usize) -> Self {
        Self { return_line_index }
    }
}

/// Deep copy of an execution context
///
/// This is the only state that survives a stop or a process restart.
/// Labels are not stored; they are rebuilt by preprocessing the script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionSnapshot {
    pub script_name: String,
    pub cursor: usize,
    #[serde(default)]
    pub call_stack: Vec<Frame>,
    #[serde(default)]
    pub variables: BTreeMap<String, Value>,
    #[serde(default)]
    pub breakpoints: Vec<usize>,
    #[serde(default)]
    pub lines_executed: u64,
    #[serde(default)]
    pub commands_executed: u64,
    pub saved_at: DateTime<Utc>,
}

/// How a playback ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Success,
    Failure,
    Cancelled,
    Stopped,
}

impl ExecutionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionOutcome::Success => "success",
            ExecutionOutcome::Failure => "failure",
            ExecutionOutcome::Cancelled => "cancelled",
            ExecutionOutcome::Stopped => "stopped",
        }
    }
}

/// Terminal summary of one playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub outcome: ExecutionOutcome,
    pub script_name: String,
    pub lines_executed: u64,
    pub commands_executed: u64,
    pub elapsed: Duration,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ScriptExecutionError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_index: Option<usize>,
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        self.outcome == ExecutionOutcome::Success
    }
}
