//! Script execution error taxonomy

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// What kind of failure a command produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Timeout,
    Validation,
    StateManagement,
    Security,
    ResourceLoading,
    Network,
    Configuration,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Validation => "validation",
            ErrorCategory::StateManagement => "state_management",
            ErrorCategory::Security => "security",
            ErrorCategory::ResourceLoading => "resource_loading",
            ErrorCategory::Network => "network",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How bad a failure is
///
/// Ordered: `Recoverable < Critical < Fatal`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    /// Retried locally, playback continues
    Recoverable,
    /// Retried only when the command type allows it
    Critical,
    /// Never retried, never recovered
    Fatal,
}

impl ErrorSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorSeverity::Recoverable => "recoverable",
            ErrorSeverity::Critical => "critical",
            ErrorSeverity::Fatal => "fatal",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Target of a cursor redirection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpTarget {
    Line(usize),
    Label(String),
}

impl fmt::Display for JumpTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JumpTarget::Line(n) => write!(f, "line {}", n),
            JumpTarget::Label(name) => write!(f, "#{}", name),
        }
    }
}

/// Remedy chosen for an error that exhausted its retries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryAction {
    /// Treat the line as done and move on
    Skip,
    /// Redirect the cursor
    Jump(JumpTarget),
    /// Stop playback
    Stop,
    /// Restore the last checkpoint snapshot
    Rollback,
    /// Execute the same line once more
    Retry,
}

impl fmt::Display for RecoveryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecoveryAction::Skip => f.write_str("skip"),
            RecoveryAction::Jump(target) => write!(f, "jump to {}", target),
            RecoveryAction::Stop => f.write_str("stop"),
            RecoveryAction::Rollback => f.write_str("rollback"),
            RecoveryAction::Retry => f.write_str("retry"),
        }
    }
}

/// A classified failure while executing a script line
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("[{category}/{severity}] {message}")]
pub struct ScriptExecutionError {
    pub message: String,
    pub severity: ErrorSeverity,
    pub category: ErrorCategory,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub line_index: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_name: Option<String>,

    pub retryable: bool,

    /// Action the recovery manager should take, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recovery_action: Option<RecoveryAction>,

    /// Human-readable hint for whoever reads the log
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub suggestion: String,

    #[serde(default)]
    pub retry_attempts: u32,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ScriptExecutionError {
    pub fn new(
        category: ErrorCategory,
        severity: ErrorSeverity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            severity,
            category,
            command_type: None,
            line_index: None,
            script_name: None,
            retryable: false,
            recovery_action: None,
            suggestion: String::new(),
            retry_attempts: 0,
            context: BTreeMap::new(),
        }
    }

    /// Shorthand for a critical validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Validation, ErrorSeverity::Critical, message)
    }

    /// Shorthand for a critical configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Configuration, ErrorSeverity::Critical, message)
    }

    pub fn at_line(mut self, index: usize) -> Self {
        self.line_index = Some(index);
        self
    }

    pub fn in_script(mut self, name: impl Into<String>) -> Self {
        self.script_name = Some(name.into());
        self
    }

    pub fn for_command(mut self, command_type: impl Into<String>) -> Self {
        self.command_type = Some(command_type.into());
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_recovery(mut self, action: RecoveryAction) -> Self {
        self.recovery_action = Some(action);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = suggestion.into();
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    pub fn is_fatal(&self) -> bool {
        self.severity == ErrorSeverity::Fatal
    }
}
