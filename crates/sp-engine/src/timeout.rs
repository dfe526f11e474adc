//! Timeout manager
//!
//! Runs one command attempt under the timeout of its type, races it against
//! the playback's cancellation, and keeps per-type execution statistics.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::command::CommandError;
use crate::metadata::MetadataRegistry;

/// Execution statistics of one command type
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CommandStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub timeouts: u64,
    pub cancellations: u64,
    pub total_elapsed: Duration,
    pub max_elapsed: Duration,
}

impl CommandStats {
    pub fn average_elapsed(&self) -> Duration {
        if self.executions == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total_elapsed.as_nanos() / u128::from(self.executions);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    /// Failures (timeouts included) over executions
    pub fn failure_rate(&self) -> f64 {
        if self.executions == 0 {
            return 0.0;
        }
        self.failures as f64 / self.executions as f64
    }

    fn record(&mut self, elapsed: Duration, outcome: &Result<(), &CommandError>) {
        self.executions += 1;
        self.total_elapsed += elapsed;
        self.max_elapsed = self.max_elapsed.max(elapsed);
        match outcome {
            Ok(()) => self.successes += 1,
            Err(CommandError::Cancelled) => self.cancellations += 1,
            Err(CommandError::TimedOut { .. }) => {
                self.timeouts += 1;
                self.failures += 1;
            }
            Err(_) => self.failures += 1,
        }
    }
}

/// Command types that look unhealthy
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HealthReport {
    /// Types whose average execution time exceeds the threshold
    pub slow: Vec<(String, Duration)>,
    /// Types that fail more often than they succeed
    pub failing: Vec<(String, f64)>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.slow.is_empty() && self.failing.is_empty()
    }
}

pub struct TimeoutManager {
    metadata: Arc<MetadataRegistry>,
    stats: DashMap<String, CommandStats>,
}

impl TimeoutManager {
    pub fn new(metadata: Arc<MetadataRegistry>) -> Self {
        Self {
            metadata,
            stats: DashMap::new(),
        }
    }

    /// Run `operation` under the timeout configured for `command_type`
    ///
    /// The operation receives a child of `parent`. That token is cancelled
    /// when the timeout expires or when `parent` is cancelled, so the
    /// command itself observes the cancellation.
    pub async fn execute_with_timeout<T, F, Fut>(
        &self,
        command_type: &str,
        parent: &CancellationToken,
        operation: F,
    ) -> Result<T, CommandError>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<T, CommandError>>,
    {
        let timeout = self.metadata.get(command_type).timeout;
        let token = parent.child_token();
        let started = Instant::now();
        let operation = operation(token.clone());

        let result = tokio::select! {
            biased;
            _ = parent.cancelled() => Err(CommandError::Cancelled),
            outcome = tokio::time::timeout(timeout, operation) => match outcome {
                Ok(result) => result,
                Err(_) => {
                    token.cancel();
                    let elapsed = started.elapsed();
                    warn!(command_type, ?elapsed, "Command timed out");
                    Err(CommandError::TimedOut { elapsed })
                }
            },
        };

        let elapsed = started.elapsed();
        debug!(command_type, ?elapsed, success = result.is_ok(), "Command attempt finished");
        self.stats
            .entry(command_type.to_string())
            .or_default()
            .record(elapsed, &result.as_ref().map(|_| ()));

        result
    }

    pub fn stats(&self, command_type: &str) -> Option<CommandStats> {
        self.stats.get(command_type).map(|s| s.clone())
    }

    pub fn all_stats(&self) -> HashMap<String, CommandStats> {
        self.stats
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn reset_stats(&self) {
        self.stats.clear();
    }

    /// Command types that are slower than `slow_threshold` on average or
    /// fail more than half the time
    pub fn health_report(&self, slow_threshold: Duration) -> HealthReport {
        let mut report = HealthReport::default();
        for entry in self.stats.iter() {
            let stats = entry.value();
            let average = stats.average_elapsed();
            if average > slow_threshold {
                report.slow.push((entry.key().clone(), average));
            }
            let failure_rate = stats.failure_rate();
            if failure_rate > 0.5 {
                report.failing.push((entry.key().clone(), failure_rate));
            }
        }
        report.slow.sort_by(|a, b| a.0.cmp(&b.0));
        report.failing.sort_by(|a, b| a.0.cmp(&b.0));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sp_config::CommandPolicy;

    fn manager(timeout_ms: u64) -> TimeoutManager {
        let registry = MetadataRegistry::new().with(
            "slow",
            CommandPolicy {
                timeout_ms,
                ..CommandPolicy::default()
            },
        );
        TimeoutManager::new(Arc::new(registry))
    }

    #[test]
    fn test_average_elapsed_beyond_u32_executions() {
        let executions = u64::from(u32::MAX) + 2;
        let stats = CommandStats {
            executions,
            total_elapsed: Duration::from_millis(executions * 3),
            ..CommandStats::default()
        };
        assert_eq!(stats.average_elapsed(), Duration::from_millis(3));
    }

    #[tokio::test]
    async fn test_success_is_recorded() {
        let manager = manager(1000);
        let parent = CancellationToken::new();

        let value = manager
            .execute_with_timeout("slow", &parent, |_| async { Ok::<_, CommandError>(7) })
            .await
            .unwrap();

        assert_eq!(value, 7);
        let stats = manager.stats("slow").unwrap();
        assert_eq!(stats.executions, 1);
        assert_eq!(stats.successes, 1);
    }

    #[tokio::test]
    async fn test_timeout_cancels_operation_token() {
        let manager = manager(20);
        let parent = CancellationToken::new();
        let captured = Arc::new(std::sync::Mutex::new(None));

        let slot = captured.clone();
        let result = manager
            .execute_with_timeout("slow", &parent, move |token| {
                *slot.lock().unwrap() = Some(token.clone());
                async move {
                    token.cancelled().await;
                    Ok::<_, CommandError>(())
                }
            })
            .await;

        assert!(matches!(result, Err(CommandError::TimedOut { .. })));
        let token = captured.lock().unwrap().take().unwrap();
        assert!(token.is_cancelled());
        assert!(!parent.is_cancelled());
        let stats = manager.stats("slow").unwrap();
        assert_eq!(stats.timeouts, 1);
        assert_eq!(stats.failures, 1);
    }

    #[tokio::test]
    async fn test_parent_cancellation_propagates() {
        let manager = manager(10_000);
        let parent = CancellationToken::new();
        let (tx, rx) = tokio::sync::oneshot::channel();

        let canceller = {
            let parent = parent.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                parent.cancel();
            })
        };

        let result = manager
            .execute_with_timeout("slow", &parent, move |token| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
                let _ = tx.send(token.is_cancelled());
                Ok::<_, CommandError>(())
            })
            .await;

        canceller.await.unwrap();
        assert!(matches!(result, Err(CommandError::Cancelled)));
        // The operation was dropped before it could report
        assert!(rx.await.is_err());
        assert_eq!(manager.stats("slow").unwrap().cancellations, 1);
    }

    #[tokio::test]
    async fn test_health_report() {
        let manager = manager(1000);
        let parent = CancellationToken::new();

        for _ in 0..3 {
            let _ = manager
                .execute_with_timeout("flaky", &parent, |_| async {
                    Err::<(), _>(CommandError::Network("unreachable".into()))
                })
                .await;
        }
        manager
            .execute_with_timeout("sleepy", &parent, |_| async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok::<_, CommandError>(())
            })
            .await
            .unwrap();

        let report = manager.health_report(Duration::from_millis(10));
        assert!(!report.is_healthy());
        assert_eq!(report.failing.len(), 1);
        assert_eq!(report.failing[0].0, "flaky");
        assert!(report.slow.iter().any(|(t, _)| t == "sleepy"));

        manager.reset_stats();
        assert!(manager.all_stats().is_empty());
    }
}
