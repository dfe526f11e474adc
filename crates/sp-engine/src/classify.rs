//! Error classifier
//!
//! Maps the shape of a [`CommandError`] to a category and severity, decides
//! whether it is worth retrying, and attaches a suggested recovery.

use sp_core::{ErrorCategory, ErrorSeverity, RecoveryAction, ScriptExecutionError};

use crate::command::CommandError;
use crate::metadata::CommandMetadata;

/// Turn a command failure into a [`ScriptExecutionError`]
///
/// `metadata` supplies the retry policy and the category hint used when the
/// shape of the error says nothing useful.
pub fn classify(error: &CommandError, metadata: &CommandMetadata) -> ScriptExecutionError {
    let hinted = metadata.category_hint.unwrap_or(ErrorCategory::Unknown);

    let mut classified = match error {
        CommandError::Cancelled | CommandError::TimedOut { .. } => ScriptExecutionError::new(
            ErrorCategory::Timeout,
            ErrorSeverity::Recoverable,
            error.to_string(),
        ),
        CommandError::InvalidArgument(_) => ScriptExecutionError::new(
            ErrorCategory::Validation,
            ErrorSeverity::Critical,
            error.to_string(),
        ),
        CommandError::InvalidState(_) => ScriptExecutionError::new(
            ErrorCategory::StateManagement,
            ErrorSeverity::Critical,
            error.to_string(),
        ),
        CommandError::NotFound(_) => ScriptExecutionError::new(
            ErrorCategory::ResourceLoading,
            ErrorSeverity::Critical,
            error.to_string(),
        ),
        CommandError::Unimplemented(_) => ScriptExecutionError::new(
            ErrorCategory::Configuration,
            ErrorSeverity::Fatal,
            error.to_string(),
        ),
        CommandError::OutOfResources(_) => ScriptExecutionError::new(
            ErrorCategory::Unknown,
            ErrorSeverity::Fatal,
            error.to_string(),
        ),
        CommandError::Network(_) => ScriptExecutionError::new(
            ErrorCategory::Network,
            ErrorSeverity::Recoverable,
            error.to_string(),
        ),
        CommandError::Security(_) => ScriptExecutionError::new(
            ErrorCategory::Security,
            ErrorSeverity::Fatal,
            error.to_string(),
        ),
        CommandError::Configuration(_) => ScriptExecutionError::new(
            ErrorCategory::Configuration,
            ErrorSeverity::Critical,
            error.to_string(),
        ),
        CommandError::Reported(reported) => {
            let mut reported = (**reported).clone();
            if reported.category == ErrorCategory::Unknown {
                reported.category = hinted;
            }
            reported
        }
        CommandError::Other(_) => {
            ScriptExecutionError::new(hinted, ErrorSeverity::Critical, error.to_string())
        }
    };

    if classified.command_type.is_none() {
        classified.command_type = Some(metadata.command_type.clone());
    }
    classified.retryable = metadata.is_retryable(&classified);
    if classified.recovery_action.is_none() {
        classified.recovery_action = default_recovery(classified.category, classified.severity);
    }
    if classified.suggestion.is_empty() {
        classified.suggestion = suggestion(classified.category).to_string();
    }

    classified
}

/// Recovery the classifier proposes when the command type declares none
fn default_recovery(category: ErrorCategory, severity: ErrorSeverity) -> Option<RecoveryAction> {
    if severity == ErrorSeverity::Fatal {
        return None;
    }
    match category {
        ErrorCategory::Timeout | ErrorCategory::ResourceLoading => Some(RecoveryAction::Skip),
        _ => None,
    }
}

fn suggestion(category: ErrorCategory) -> &'static str {
    match category {
        ErrorCategory::Timeout => {
            "raise the timeout for this command type or check what it waits on"
        }
        ErrorCategory::Validation => "check the arguments on this line",
        ErrorCategory::StateManagement => "check that the command runs in the state it expects",
        ErrorCategory::Security => "check the permissions the command needs",
        ErrorCategory::ResourceLoading => "check that the referenced resource exists",
        ErrorCategory::Network => "check connectivity; the command can be retried",
        ErrorCategory::Configuration => "check the engine configuration for this command type",
        ErrorCategory::Unknown => "see the log for details",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_config::CommandPolicy;
    use std::time::Duration;

    fn metadata() -> CommandMetadata {
        CommandMetadata::from_policy("fetch", &CommandPolicy::default())
    }

    #[test]
    fn test_decision_table() {
        let cases = [
            (
                CommandError::TimedOut {
                    elapsed: Duration::from_secs(1),
                },
                ErrorCategory::Timeout,
                ErrorSeverity::Recoverable,
            ),
            (CommandError::Cancelled, ErrorCategory::Timeout, ErrorSeverity::Recoverable),
            (
                CommandError::InvalidArgument("x".into()),
                ErrorCategory::Validation,
                ErrorSeverity::Critical,
            ),
            (
                CommandError::InvalidState("x".into()),
                ErrorCategory::StateManagement,
                ErrorSeverity::Critical,
            ),
            (
                CommandError::NotFound("x".into()),
                ErrorCategory::ResourceLoading,
                ErrorSeverity::Critical,
            ),
            (
                CommandError::Unimplemented("x".into()),
                ErrorCategory::Configuration,
                ErrorSeverity::Fatal,
            ),
            (
                CommandError::OutOfResources("x".into()),
                ErrorCategory::Unknown,
                ErrorSeverity::Fatal,
            ),
            (
                CommandError::Network("x".into()),
                ErrorCategory::Network,
                ErrorSeverity::Recoverable,
            ),
            (
                CommandError::Security("x".into()),
                ErrorCategory::Security,
                ErrorSeverity::Fatal,
            ),
            (
                CommandError::Configuration("x".into()),
                ErrorCategory::Configuration,
                ErrorSeverity::Critical,
            ),
            (
                CommandError::Other(anyhow::anyhow!("boom")),
                ErrorCategory::Unknown,
                ErrorSeverity::Critical,
            ),
        ];

        for (error, category, severity) in cases {
            let classified = classify(&error, &metadata());
            assert_eq!(classified.category, category, "{:?}", error);
            assert_eq!(classified.severity, severity, "{:?}", error);
            assert_eq!(classified.command_type.as_deref(), Some("fetch"));
            assert!(!classified.suggestion.is_empty());
        }
    }

    #[test]
    fn test_retryable_flags() {
        let meta = metadata();
        assert!(classify(&CommandError::Network("x".into()), &meta).retryable);
        assert!(!classify(&CommandError::InvalidArgument("x".into()), &meta).retryable);
        assert!(!classify(&CommandError::Security("x".into()), &meta).retryable);
        // Critical, but resource loading is in the default retry_on list
        assert!(classify(&CommandError::NotFound("x".into()), &meta).retryable);
    }

    #[test]
    fn test_default_recovery() {
        let meta = metadata();
        let timeout = classify(&CommandError::Cancelled, &meta);
        assert_eq!(timeout.recovery_action, Some(RecoveryAction::Skip));

        let missing = classify(&CommandError::NotFound("bg.png".into()), &meta);
        assert_eq!(missing.recovery_action, Some(RecoveryAction::Skip));

        let invalid = classify(&CommandError::InvalidArgument("x".into()), &meta);
        assert_eq!(invalid.recovery_action, None);
    }

    #[test]
    fn test_category_hint_applies_to_unknown() {
        let meta = CommandMetadata::from_policy(
            "fetch",
            &CommandPolicy {
                category_hint: Some(ErrorCategory::Network),
                ..CommandPolicy::default()
            },
        );

        let other = classify(&CommandError::Other(anyhow::anyhow!("socket closed")), &meta);
        assert_eq!(other.category, ErrorCategory::Network);
        assert!(other.retryable);

        // A known shape keeps its own category
        let invalid = classify(&CommandError::InvalidArgument("x".into()), &meta);
        assert_eq!(invalid.category, ErrorCategory::Validation);
    }

    #[test]
    fn test_reported_error_keeps_its_classification() {
        let reported = ScriptExecutionError::new(
            ErrorCategory::Security,
            ErrorSeverity::Critical,
            "locked door",
        )
        .for_command("open")
        .with_recovery(RecoveryAction::Stop);

        let classified = classify(&CommandError::from(reported), &metadata());
        assert_eq!(classified.category, ErrorCategory::Security);
        assert_eq!(classified.command_type.as_deref(), Some("open"));
        assert_eq!(classified.recovery_action, Some(RecoveryAction::Stop));
        assert_eq!(classified.message, "locked door");
    }
}
