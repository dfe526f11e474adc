//! Engine configuration
//!
//! Every section and field has a default, so an empty file is a valid
//! configuration.

use serde::{Deserialize, Serialize};
use sp_core::{ErrorCategory, RecoveryAction};
use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};

/// Playback speed multipliers the engine accepts
pub const PLAYBACK_SPEED_RANGE: RangeInclusive<f64> = 0.01..=100.0;

/// Whether `speed` lies in [`PLAYBACK_SPEED_RANGE`]; NaN never does
pub fn is_valid_playback_speed(speed: f64) -> bool {
    PLAYBACK_SPEED_RANGE.contains(&speed)
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub playback: PlaybackConfig,

    #[serde(default)]
    pub errors: ErrorPolicyConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub commands: CommandsConfig,
}

impl EngineConfig {
    /// Check values that deserialize fine but make no sense
    pub fn validate(&self) -> ConfigResult<()> {
        let speed = self.playback.playback_speed;
        if !is_valid_playback_speed(speed) {
            return Err(ConfigError::InvalidValue {
                key: "playback.playback_speed".to_string(),
                reason: format!(
                    "must be between {} and {}, got {}",
                    PLAYBACK_SPEED_RANGE.start(),
                    PLAYBACK_SPEED_RANGE.end(),
                    speed
                ),
            });
        }

        if self.playback.autosave_key.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "playback.autosave_key".to_string(),
                reason: "must not be empty".to_string(),
            });
        }

        self.commands
            .defaults
            .validate("commands.defaults")?;
        for (command_type, policy) in &self.commands.types {
            policy.validate(&format!("commands.types.{}", command_type))?;
        }

        Ok(())
    }
}

/// Pacing and autosave
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Delay between lines at speed 1.0
    #[serde(default)]
    pub line_delay_ms: u64,

    /// Multiplier applied to the line delay (2.0 halves it)
    #[serde(default = "default_playback_speed")]
    pub playback_speed: f64,

    /// Autosave cadence; autosave is off when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autosave_interval_secs: Option<u64>,

    /// Storage key autosaves are written under
    #[serde(default = "default_autosave_key")]
    pub autosave_key: String,
}

impl PlaybackConfig {
    pub fn line_delay(&self) -> Duration {
        Duration::from_millis(self.line_delay_ms)
    }

    pub fn autosave_interval(&self) -> Option<Duration> {
        self.autosave_interval_secs.map(Duration::from_secs)
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            line_delay_ms: 0,
            playback_speed: default_playback_speed(),
            autosave_interval_secs: None,
            autosave_key: default_autosave_key(),
        }
    }
}

fn default_playback_speed() -> f64 {
    1.0
}

fn default_autosave_key() -> String {
    "autosave".to_string()
}

/// What happens when things go wrong
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPolicyConfig {
    /// Continue past a line whose error could not be recovered
    #[serde(default)]
    pub continue_on_error: bool,

    /// Fail the playback when preprocessing reports errors
    #[serde(default = "default_true")]
    pub raise_on_preprocess_errors: bool,

    /// Run the recovery manager after retries are exhausted
    #[serde(default = "default_true")]
    pub recovery_enabled: bool,

    /// How many times a `retry` recovery may re-execute the same line
    #[serde(default = "default_max_recovery_retries")]
    pub max_recovery_retries: u32,
}

impl Default for ErrorPolicyConfig {
    fn default() -> Self {
        Self {
            continue_on_error: false,
            raise_on_preprocess_errors: true,
            recovery_enabled: true,
            max_recovery_retries: default_max_recovery_retries(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_recovery_retries() -> u32 {
    1
}

/// Health check thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Average execution time above which a command type is reported as slow
    #[serde(default = "default_slow_command_threshold_ms")]
    pub slow_command_threshold_ms: u64,
}

impl PerformanceConfig {
    pub fn slow_command_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_command_threshold_ms)
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            slow_command_threshold_ms: default_slow_command_threshold_ms(),
        }
    }
}

fn default_slow_command_threshold_ms() -> u64 {
    1000
}

/// Per-command-type policies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandsConfig {
    /// Policy used for command types without an entry in `types`
    #[serde(default)]
    pub defaults: CommandPolicy,

    /// Policies keyed by command type
    #[serde(default)]
    pub types: HashMap<String, CommandPolicy>,
}

/// Declarative policy for one command type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPolicy {
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default)]
    pub max_retries: u32,

    #[serde(default)]
    pub backoff: BackoffPolicy,

    /// Categories of critical errors that are worth retrying.
    /// Recoverable errors are always retried.
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<ErrorCategory>,

    /// Category assumed for errors the classifier cannot place
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category_hint: Option<ErrorCategory>,

    /// Recovery action once retries are exhausted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<RecoveryAction>,
}

impl CommandPolicy {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    fn validate(&self, key: &str) -> ConfigResult<()> {
        if self.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                key: format!("{}.timeout_ms", key),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
            max_retries: 0,
            backoff: BackoffPolicy::default(),
            retry_on: default_retry_on(),
            category_hint: None,
            on_error: None,
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_retry_on() -> Vec<ErrorCategory> {
    vec![
        ErrorCategory::Timeout,
        ErrorCategory::Network,
        ErrorCategory::ResourceLoading,
    ]
}

/// Delay between retry attempts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackoffPolicy {
    /// Retry immediately
    #[default]
    None,
    /// Same delay before every retry
    Fixed { delay_ms: u64 },
    /// `base_ms * attempt`
    Linear { base_ms: u64 },
    /// `base_ms * 2^(attempt - 1)`, capped at `max_ms`
    Exponential {
        base_ms: u64,
        max_ms: u64,
        #[serde(default)]
        jitter: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::from_yaml_str;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.playback.playback_speed, 1.0);
        assert_eq!(config.playback.autosave_key, "autosave");
        assert!(config.playback.autosave_interval().is_none());
        assert_eq!(config.commands.defaults.timeout(), Duration::from_secs(30));
        assert_eq!(config.commands.defaults.max_retries, 0);
        assert!(config.errors.recovery_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_playback_speed_bounds() {
        let mut config = EngineConfig::default();
        for speed in [0.0, -1.0, 1e-300, 1e300, f64::NAN, f64::INFINITY] {
            config.playback.playback_speed = speed;
            assert!(config.validate().is_err(), "speed {} accepted", speed);
        }
        for speed in [0.01, 0.5, 4.0, 100.0] {
            config.playback.playback_speed = speed;
            assert!(config.validate().is_ok(), "speed {} rejected", speed);
        }
    }

    #[test]
    fn test_command_policy_full() {
        let config = from_yaml_str(
            r#"
commands:
  defaults:
    timeout_ms: 5000
  types:
    fetch:
      timeout_ms: 2000
      max_retries: 3
      backoff: { kind: exponential, base_ms: 100, max_ms: 2000, jitter: true }
      retry_on: [network, timeout]
      category_hint: network
      on_error: skip
"#,
        )
        .unwrap();

        assert_eq!(config.commands.defaults.timeout_ms, 5000);
        let fetch = &config.commands.types["fetch"];
        assert_eq!(fetch.max_retries, 3);
        assert_eq!(
            fetch.backoff,
            BackoffPolicy::Exponential {
                base_ms: 100,
                max_ms: 2000,
                jitter: true
            }
        );
        assert_eq!(
            fetch.retry_on,
            vec![ErrorCategory::Network, ErrorCategory::Timeout]
        );
        assert_eq!(fetch.category_hint, Some(ErrorCategory::Network));
        assert_eq!(fetch.on_error, Some(RecoveryAction::Skip));
    }

    #[test]
    fn test_rejects_non_positive_speed() {
        let result = from_yaml_str("playback:\n  playback_speed: 0\n");
        match result {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, "playback.playback_speed")
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_rejects_zero_timeout() {
        let result = from_yaml_str("commands:\n  types:\n    wait:\n      timeout_ms: 0\n");
        match result {
            Err(ConfigError::InvalidValue { key, .. }) => {
                assert_eq!(key, "commands.types.wait.timeout_ms")
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_backoff_kind_is_parse_error() {
        let result = from_yaml_str(
            "commands:\n  defaults:\n    backoff: { kind: random }\n",
        );
        assert!(matches!(result, Err(ConfigError::ParseYaml { .. })));
    }
}
