//! Events published by the playback engine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::ScriptExecutionError;
use crate::snapshot::ExecutionResult;
use crate::state::PlaybackState;
use crate::Context;

/// Kind of an engine event, used to subscribe to a subset of events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ScriptStarted,
    ScriptCompleted,
    ScriptFailed,
    LineExecuting,
    LineExecuted,
    LineFailed,
    CommandExecuting,
    CommandExecuted,
    CommandRetrying,
    StateChanged,
    ProgressChanged,
    BreakpointHit,
    VariableChanged,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ScriptStarted => "script_started",
            EventKind::ScriptCompleted => "script_completed",
            EventKind::ScriptFailed => "script_failed",
            EventKind::LineExecuting => "line_executing",
            EventKind::LineExecuted => "line_executed",
            EventKind::LineFailed => "line_failed",
            EventKind::CommandExecuting => "command_executing",
            EventKind::CommandExecuted => "command_executed",
            EventKind::CommandRetrying => "command_retrying",
            EventKind::StateChanged => "state_changed",
            EventKind::ProgressChanged => "progress_changed",
            EventKind::BreakpointHit => "breakpoint_hit",
            EventKind::VariableChanged => "variable_changed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of an engine event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    ScriptStarted {
        script: String,
    },
    /// Every playback that does not fail ends with this event,
    /// including stopped and cancelled runs
    ScriptCompleted {
        script: String,
        result: ExecutionResult,
    },
    ScriptFailed {
        script: String,
        error: ScriptExecutionError,
    },
    LineExecuting {
        index: usize,
        line: String,
    },
    LineExecuted {
        index: usize,
        line: String,
    },
    /// An unrecoverable error was skipped because the engine continues on error
    LineFailed {
        index: usize,
        error: ScriptExecutionError,
    },
    CommandExecuting {
        index: usize,
        command_type: String,
    },
    CommandExecuted {
        index: usize,
        command_type: String,
        success: bool,
    },
    CommandRetrying {
        index: usize,
        command_type: String,
        attempt: u32,
        delay_ms: u64,
    },
    StateChanged {
        old: PlaybackState,
        new: PlaybackState,
    },
    ProgressChanged {
        progress: f64,
    },
    BreakpointHit {
        index: usize,
    },
    VariableChanged {
        name: String,
        /// None when the variable was cleared
        value: Option<Value>,
    },
}

impl EngineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            EngineEvent::ScriptStarted { .. } => EventKind::ScriptStarted,
            EngineEvent::ScriptCompleted { .. } => EventKind::ScriptCompleted,
            EngineEvent::ScriptFailed { .. } => EventKind::ScriptFailed,
            EngineEvent::LineExecuting { .. } => EventKind::LineExecuting,
            EngineEvent::LineExecuted { .. } => EventKind::LineExecuted,
            EngineEvent::LineFailed { .. } => EventKind::LineFailed,
            EngineEvent::CommandExecuting { .. } => EventKind::CommandExecuting,
            EngineEvent::CommandExecuted { .. } => EventKind::CommandExecuted,
            EngineEvent::CommandRetrying { .. } => EventKind::CommandRetrying,
            EngineEvent::StateChanged { .. } => EventKind::StateChanged,
            EngineEvent::ProgressChanged { .. } => EventKind::ProgressChanged,
            EngineEvent::BreakpointHit { .. } => EventKind::BreakpointHit,
            EngineEvent::VariableChanged { .. } => EventKind::VariableChanged,
        }
    }
}

/// An event as delivered to subscribers
///
/// Events carry the context of the run that produced them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// The event payload
    pub data: EngineEvent,

    /// When the event was fired
    pub time_fired: DateTime<Utc>,

    /// Playback run that produced the event
    pub context: Context,
}

impl Event {
    /// Create a new event with current timestamp
    pub fn new(data: EngineEvent, context: Context) -> Self {
        Self {
            data,
            time_fired: Utc::now(),
            context,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_matches_payload() {
        let event = Event::new(
            EngineEvent::StateChanged {
                old: PlaybackState::Playing,
                new: PlaybackState::Paused,
            },
            Context::new(),
        );
        assert_eq!(event.kind(), EventKind::StateChanged);
    }

    #[test]
    fn test_payload_is_tagged() {
        let value = serde_json::to_value(EngineEvent::BreakpointHit { index: 3 }).unwrap();
        assert_eq!(value["type"], "breakpoint_hit");
        assert_eq!(value["index"], 3);
    }
}
