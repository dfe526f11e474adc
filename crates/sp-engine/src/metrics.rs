//! Metrics collaborators
//!
//! The engine reports one sample per command attempt and, when a memory
//! probe is configured, a memory reading at autosave time and when a
//! playback ends.

use serde::Serialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionSample {
    pub script_name: String,
    pub line_index: usize,
    pub command_type: String,
    pub elapsed: Duration,
    pub success: bool,
    /// 1 for the first attempt
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemorySample {
    pub script_name: String,
    pub bytes: u64,
    pub lines_executed: u64,
}

pub trait MetricsSink: Send + Sync {
    fn record_execution(&self, sample: ExecutionSample);
    fn record_memory(&self, sample: MemorySample);
}

/// Supplies the current memory usage of whatever the host wants measured
pub trait MemoryProbe: Send + Sync {
    fn current_usage(&self) -> Option<u64>;
}

/// Sink that writes samples to the debug log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record_execution(&self, sample: ExecutionSample) {
        debug!(
            script = %sample.script_name,
            line = sample.line_index,
            command_type = %sample.command_type,
            elapsed_ms = sample.elapsed.as_millis() as u64,
            success = sample.success,
            attempt = sample.attempt,
            "Command execution"
        );
    }

    fn record_memory(&self, sample: MemorySample) {
        debug!(
            script = %sample.script_name,
            bytes = sample.bytes,
            lines_executed = sample.lines_executed,
            "Memory usage"
        );
    }
}
