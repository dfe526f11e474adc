//! Command metadata registry
//!
//! Resolves the timeout, retry and recovery policy of a command type from
//! the `commands` section of the engine configuration. Lookups never fail:
//! unknown types get the configured defaults.

use rand::Rng;
use sp_config::{BackoffPolicy, CommandPolicy, CommandsConfig};
use sp_core::{ErrorCategory, ErrorSeverity, RecoveryAction, ScriptExecutionError};
use std::collections::HashMap;
use std::time::Duration;

/// Effective policy for one command type
#[derive(Debug, Clone, PartialEq)]
pub struct CommandMetadata {
    pub command_type: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff: BackoffPolicy,
    pub retry_on: Vec<ErrorCategory>,
    pub category_hint: Option<ErrorCategory>,
    pub on_error: Option<RecoveryAction>,
}

impl CommandMetadata {
    pub fn from_policy(command_type: impl Into<String>, policy: &CommandPolicy) -> Self {
        Self {
            command_type: command_type.into(),
            timeout: policy.timeout(),
            max_retries: policy.max_retries,
            backoff: policy.backoff.clone(),
            retry_on: policy.retry_on.clone(),
            category_hint: policy.category_hint,
            on_error: policy.on_error.clone(),
        }
    }

    /// Whether another attempt could succeed
    ///
    /// Fatal errors never are. Recoverable errors always are. Critical
    /// errors are when their category is listed in `retry_on`.
    pub fn is_retryable(&self, error: &ScriptExecutionError) -> bool {
        match error.severity {
            ErrorSeverity::Fatal => false,
            ErrorSeverity::Recoverable => true,
            ErrorSeverity::Critical => self.retry_on.contains(&error.category),
        }
    }

    /// Delay before retry number `attempt` (1-based)
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let millis = match &self.backoff {
            BackoffPolicy::None => 0,
            BackoffPolicy::Fixed { delay_ms } => *delay_ms,
            BackoffPolicy::Linear { base_ms } => base_ms.saturating_mul(u64::from(attempt)),
            BackoffPolicy::Exponential {
                base_ms,
                max_ms,
                jitter,
            } => {
                let factor = 1u64.checked_shl(attempt - 1).unwrap_or(u64::MAX);
                let delay = base_ms.saturating_mul(factor).min(*max_ms);
                if *jitter && delay > 1 {
                    // Somewhere in the upper half of the window
                    let half = delay / 2;
                    half + rand::thread_rng().gen_range(0..=delay - half)
                } else {
                    delay
                }
            }
        };
        Duration::from_millis(millis)
    }
}

/// Command policies by type
#[derive(Debug, Clone, Default)]
pub struct MetadataRegistry {
    defaults: CommandPolicy,
    types: HashMap<String, CommandMetadata>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &CommandsConfig) -> Self {
        let mut registry = Self {
            defaults: config.defaults.clone(),
            types: HashMap::new(),
        };
        for (command_type, policy) in &config.types {
            registry.register(command_type.clone(), policy);
        }
        registry
    }

    /// Add or replace the policy of one command type
    pub fn register(&mut self, command_type: impl Into<String>, policy: &CommandPolicy) {
        let command_type = command_type.into();
        self.types.insert(
            command_type.clone(),
            CommandMetadata::from_policy(command_type, policy),
        );
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, command_type: impl Into<String>, policy: CommandPolicy) -> Self {
        self.register(command_type, &policy);
        self
    }

    pub fn get(&self, command_type: &str) -> CommandMetadata {
        match self.types.get(command_type) {
            Some(metadata) => metadata.clone(),
            None => CommandMetadata::from_policy(command_type, &self.defaults),
        }
    }

    pub fn is_registered(&self, command_type: &str) -> bool {
        self.types.contains_key(command_type)
    }
}
