//! Errors returned by the engine's control API

use sp_core::{InvalidTransition, PlaybackState};
use sp_storage::StorageError;
use thiserror::Error;

use crate::loader::LoaderError;

/// Failure of an engine operation
///
/// Playback failures are not reported here; they end up in the
/// [`sp_core::ExecutionResult`] of the run.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("no script is loaded")]
    NoScript,

    #[error("line {index} is out of range (script has {len} lines)")]
    LineOutOfRange { index: usize, len: usize },

    #[error("label not found: {0}")]
    LabelNotFound(String),

    #[error("invalid value for {name}: {reason}")]
    InvalidValue { name: &'static str, reason: String },

    #[error("cannot {operation} while {state}")]
    InvalidState {
        operation: &'static str,
        state: PlaybackState,
    },

    #[error("no script loader configured")]
    NoLoader,

    #[error("no persistence service configured")]
    NoPersistence,

    #[error("no saved execution state under key {0}")]
    SnapshotNotFound(String),

    #[error("saved state belongs to script {found}, not {expected}")]
    SnapshotMismatch { expected: String, found: String },

    #[error(transparent)]
    Loader(#[from] LoaderError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("engine has been shut down")]
    ShutDown,
}

pub type EngineResult<T> = Result<T, EngineError>;
