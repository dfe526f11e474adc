//! Playback state machine
//!
//! Enforces valid state transitions for one playback:
//!
//! ```text
//! Idle → Loading → Playing ⇄ Paused
//!                  Playing ⇄ Waiting
//!        Loading/Playing → Failed
//!        Loading/Playing/Paused/Waiting → Stopped
//!                  Playing → Completed
//!
//! any → Idle (reset only, never through try_transition)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// State of the playback engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    /// Nothing loaded or the engine was reset
    #[default]
    Idle,
    /// Preprocessing and resource preload in progress
    Loading,
    /// Advancing through lines
    Playing,
    /// Suspended by the user or a breakpoint
    Paused,
    /// A single command is in flight
    Waiting,
    /// Stopped explicitly or by an unrecoverable error
    Stopped,
    /// Ran past the last line with an empty call stack
    Completed,
    /// Preprocessing or a dependency failed
    Failed,
}

impl PlaybackState {
    /// Get the state name as used in logs and persisted data
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Waiting => "waiting",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Completed => "completed",
            PlaybackState::Failed => "failed",
        }
    }

    /// Terminal states only leave through a reset
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PlaybackState::Stopped | PlaybackState::Completed | PlaybackState::Failed
        )
    }

    /// A playback is in progress (loaded and not terminal)
    pub fn is_active(self) -> bool {
        matches!(
            self,
            PlaybackState::Loading
                | PlaybackState::Playing
                | PlaybackState::Paused
                | PlaybackState::Waiting
        )
    }

    /// Attempt a transition to a new state.
    ///
    /// Returns the new state if valid, or an error describing why the transition
    /// is invalid.
    pub fn try_transition(self, to: PlaybackState) -> Result<PlaybackState, InvalidTransition> {
        use PlaybackState::*;

        let valid = match (self, to) {
            (Idle, Loading) => true,

            (Loading, Playing) => true,
            (Loading, Failed) => true,
            (Loading, Stopped) => true,

            (Playing, Paused) => true,
            (Playing, Waiting) => true,
            (Playing, Stopped) => true,
            (Playing, Completed) => true,
            (Playing, Failed) => true,

            (Paused, Playing) => true,
            (Paused, Stopped) => true,

            (Waiting, Playing) => true,
            (Waiting, Stopped) => true,

            // Terminal states only leave through reset
            (Stopped, _) | (Completed, _) | (Failed, _) => false,

            _ => false,
        };

        if valid {
            Ok(to)
        } else {
            Err(InvalidTransition {
                from: self,
                to,
                reason: Self::transition_error_reason(self, to),
            })
        }
    }

    /// Check if a transition is valid without performing it
    pub fn can_transition_to(self, to: PlaybackState) -> bool {
        self.try_transition(to).is_ok()
    }

    fn transition_error_reason(from: PlaybackState, to: PlaybackState) -> &'static str {
        use PlaybackState::*;

        match (from, to) {
            (Stopped, _) | (Completed, _) | (Failed, _) => {
                "terminal state - reset the engine before playing again"
            }
            (_, Idle) => "returning to Idle requires a reset",
            (Idle, _) => "nothing is loaded - start a playback first",
            (Paused, Waiting) => "resume before executing a command",
            (Waiting, Paused) => "a command is in flight - pause applies after it completes",
            (Waiting, Completed) => "a command is in flight - cannot complete yet",
            (Paused, Completed) => "resume before completing",
            (Loading, Paused) | (Loading, Waiting) => "still loading",
            _ => "invalid state transition",
        }
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error when an invalid state transition is attempted
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("invalid playback transition from {from} to {to}: {reason}")]
pub struct InvalidTransition {
    pub from: PlaybackState,
    pub to: PlaybackState,
    pub reason: &'static str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use PlaybackState::*;

    const ALL: [PlaybackState; 8] = [
        Idle, Loading, Playing, Paused, Waiting, Stopped, Completed, Failed,
    ];

    // ==================== Valid Transitions ====================

    #[test]
    fn test_idle_to_loading() {
        assert_eq!(Idle.try_transition(Loading), Ok(Loading));
    }

    #[test]
    fn test_loading_outcomes() {
        assert!(Loading.can_transition_to(Playing));
        assert!(Loading.can_transition_to(Failed));
        assert!(Loading.can_transition_to(Stopped));
    }

    #[test]
    fn test_pause_resume() {
        assert!(Playing.can_transition_to(Paused));
        assert!(Paused.can_transition_to(Playing));
    }

    #[test]
    fn test_waiting_round_trip() {
        assert!(Playing.can_transition_to(Waiting));
        assert!(Waiting.can_transition_to(Playing));
    }

    #[test]
    fn test_stop_from_active_states() {
        for from in [Loading, Playing, Paused, Waiting] {
            assert!(from.can_transition_to(Stopped), "{from} -> stopped");
        }
    }

    // ==================== Invalid Transitions ====================

    #[test]
    fn test_idle_cannot_jump_to_playing() {
        let err = Idle.try_transition(Playing).unwrap_err();
        assert_eq!(err.from, Idle);
        assert_eq!(err.to, Playing);
    }

    #[test]
    fn test_waiting_cannot_pause_directly() {
        let err = Waiting.try_transition(Paused).unwrap_err();
        assert!(err.reason.contains("in flight"));
    }

    #[test]
    fn test_only_playing_completes() {
        for from in ALL {
            assert_eq!(from.can_transition_to(Completed), from == Playing);
        }
    }

    #[test]
    fn test_nothing_returns_to_idle() {
        for from in ALL {
            assert!(!from.can_transition_to(Idle));
        }
    }

    // ==================== Terminal States ====================

    #[test]
    fn test_terminal_states_are_closed() {
        for from in [Stopped, Completed, Failed] {
            assert!(from.is_terminal());
            for to in ALL {
                assert!(!from.can_transition_to(to), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn test_error_display() {
        let err = Completed.try_transition(Playing).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("completed"));
        assert!(msg.contains("playing"));
        assert!(msg.contains("reset"));
    }

    #[test]
    fn test_full_playback_path() {
        let state = Idle;
        let state = state.try_transition(Loading).unwrap();
        let state = state.try_transition(Playing).unwrap();
        let state = state.try_transition(Waiting).unwrap();
        let state = state.try_transition(Playing).unwrap();
        let state = state.try_transition(Paused).unwrap();
        let state = state.try_transition(Playing).unwrap();
        let state = state.try_transition(Completed).unwrap();
        assert_eq!(state, Completed);
    }

    #[test]
    fn test_serde_names() {
        assert_eq!(serde_json::to_string(&Waiting).unwrap(), "\"waiting\"");
    }
}
