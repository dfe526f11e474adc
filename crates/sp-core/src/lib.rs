//! Core types for scriptplay
//!
//! This crate provides the vocabulary shared by the playback engine and its
//! collaborators: playback states and their transition table, flow actions
//! and command results, the execution error taxonomy, snapshots, results and
//! the events the engine publishes.

mod context;
mod error;
mod event;
mod flow;
mod snapshot;
mod state;

pub use context::Context;
pub use error::{ErrorCategory, ErrorSeverity, JumpTarget, RecoveryAction, ScriptExecutionError};
pub use event::{EngineEvent, Event, EventKind};
pub use flow::{CommandResult, FlowAction};
pub use snapshot::{ExecutionOutcome, ExecutionResult, ExecutionSnapshot, Frame};
pub use state::{InvalidTransition, PlaybackState};

/// Marker that starts a label line
pub const LABEL_MARKER: &str = "#";

/// Marker that starts a comment line
pub const COMMENT_MARKER: &str = "//";
