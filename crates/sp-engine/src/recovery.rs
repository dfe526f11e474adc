//! Recovery manager
//!
//! Decides what happens to a line whose command failed and exhausted its
//! retries. The command type's declared `on_error` wins over the
//! classifier's suggestion. Fatal errors are never recovered.

use sp_core::{ExecutionSnapshot, FlowAction, RecoveryAction, ScriptExecutionError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use tracing::{info, warn};

use crate::metadata::CommandMetadata;

/// What the engine should do with the failed line
#[derive(Debug, Clone, PartialEq)]
pub enum RecoveryOutcome {
    /// Treat the line as done and apply this flow action
    Continue(FlowAction),
    /// Execute the same line again
    RetryLine,
    /// Restore this snapshot and continue from its cursor
    Rollback(ExecutionSnapshot),
    /// Halt the playback, reporting the error that caused it
    Stop,
    Unrecoverable,
}

#[derive(Debug, Default)]
pub struct RecoveryManager {
    checkpoint: RwLock<Option<ExecutionSnapshot>>,
    attempts: AtomicU64,
    successes: AtomicU64,
}

impl RecoveryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot that `rollback` returns to
    pub fn set_checkpoint(&self, snapshot: ExecutionSnapshot) {
        *self.checkpoint.write().unwrap() = Some(snapshot);
    }

    pub fn checkpoint(&self) -> Option<ExecutionSnapshot> {
        self.checkpoint.read().unwrap().clone()
    }

    pub fn clear_checkpoint(&self) {
        self.checkpoint.write().unwrap().take();
    }

    /// The action to take for `error`, if any
    pub fn resolve_action(
        &self,
        error: &ScriptExecutionError,
        metadata: &CommandMetadata,
    ) -> Option<RecoveryAction> {
        if error.is_fatal() {
            return None;
        }
        metadata
            .on_error
            .clone()
            .or_else(|| error.recovery_action.clone())
    }

    /// Plan the recovery of a failed line
    ///
    /// `line_attempts` counts the retries and rollbacks already spent on
    /// this line; both are bounded by `max_line_attempts`.
    pub fn recover(
        &self,
        error: &ScriptExecutionError,
        metadata: &CommandMetadata,
        line_attempts: u32,
        max_line_attempts: u32,
    ) -> RecoveryOutcome {
        let Some(action) = self.resolve_action(error, metadata) else {
            return RecoveryOutcome::Unrecoverable;
        };

        self.attempts.fetch_add(1, Ordering::Relaxed);
        let outcome = match &action {
            RecoveryAction::Skip => RecoveryOutcome::Continue(FlowAction::Continue),
            RecoveryAction::Jump(target) => RecoveryOutcome::Continue(target.clone().into()),
            RecoveryAction::Stop => RecoveryOutcome::Stop,
            RecoveryAction::Rollback => match self.checkpoint() {
                Some(snapshot) if line_attempts < max_line_attempts => {
                    RecoveryOutcome::Rollback(snapshot)
                }
                _ => RecoveryOutcome::Unrecoverable,
            },
            RecoveryAction::Retry if line_attempts < max_line_attempts => {
                RecoveryOutcome::RetryLine
            }
            RecoveryAction::Retry => RecoveryOutcome::Unrecoverable,
        };

        if outcome == RecoveryOutcome::Unrecoverable {
            warn!(
                action = %action,
                line = ?error.line_index,
                "Recovery not possible"
            );
        } else {
            info!(
                action = %action,
                line = ?error.line_index,
                category = %error.category,
                "Recovering from command error"
            );
        }
        outcome
    }

    /// Count a recovery whose plan was applied
    ///
    /// A plan that fails when applied, such as a jump to a missing label,
    /// is never recorded.
    pub fn record_success(&self) {
        self.successes.fetch_add(1, Ordering::Relaxed);
    }

    /// Share of recovery attempts whose plan was applied, None before the
    /// first attempt
    pub fn success_rate(&self) -> Option<f64> {
        let attempts = self.attempts.load(Ordering::Relaxed);
        if attempts == 0 {
            return None;
        }
        Some(self.successes.load(Ordering::Relaxed) as f64 / attempts as f64)
    }

    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}
