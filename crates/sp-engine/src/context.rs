//! Execution context
//!
//! Everything the engine knows about the playback in progress: which script,
//! where the cursor is, the label table, the call stack, breakpoints,
//! variables and counters. The engine keeps one instance behind a
//! `std::sync::RwLock` and never holds the lock across an `.await`.

use chrono::Utc;
use serde_json::Value;
use sp_core::{ExecutionSnapshot, Frame};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::script::{Line, Script};

/// Mutable state of one playback
#[derive(Debug, Default)]
pub struct ExecutionContext {
    script: Option<Arc<Script>>,
    cursor: usize,
    labels: HashMap<String, usize>,
    call_stack: Vec<Frame>,
    breakpoints: BTreeSet<usize>,
    variables: HashMap<String, Value>,
    lines_executed: u64,
    commands_executed: u64,
    step_mode: bool,
    started_at: Option<Instant>,
    /// Breakpoint that already paused playback and must let its line run once
    released_breakpoint: Option<usize>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepare for a fresh playback of `script`
    ///
    /// Breakpoints survive; everything else starts over.
    pub fn reset_for(&mut self, script: Arc<Script>) {
        self.script = Some(script);
        self.cursor = 0;
        self.labels.clear();
        self.call_stack.clear();
        self.variables.clear();
        self.lines_executed = 0;
        self.commands_executed = 0;
        self.step_mode = false;
        self.started_at = Some(Instant::now());
        self.released_breakpoint = None;
    }

    /// Hand playback over to another script, keeping variables and counters
    pub fn switch_script(&mut self, script: Arc<Script>, labels: HashMap<String, usize>) {
        self.script = Some(script);
        self.cursor = 0;
        self.labels = labels;
        self.call_stack.clear();
        self.released_breakpoint = None;
    }

    /// Forget everything, breakpoints included
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn script(&self) -> Option<&Arc<Script>> {
        self.script.as_ref()
    }

    pub fn script_name(&self) -> Option<&str> {
        self.script.as_deref().map(Script::name)
    }

    pub fn line_count(&self) -> usize {
        self.script.as_ref().map_or(0, |s| s.len())
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move the cursor; callers validate the index
    pub fn set_cursor(&mut self, index: usize) {
        self.cursor = index;
    }

    pub fn advance(&mut self) {
        self.cursor += 1;
    }

    pub fn current_line(&self) -> Option<&Line> {
        self.script.as_ref()?.line(self.cursor)
    }

    /// True while the cursor points at a line of the loaded script
    pub fn can_continue(&self) -> bool {
        self.cursor < self.line_count()
    }

    /// Fraction of the script behind the cursor, in `0.0..=1.0`
    pub fn progress(&self) -> f64 {
        let len = self.line_count();
        if len == 0 {
            return 0.0;
        }
        self.cursor.min(len) as f64 / len as f64
    }

    pub fn set_labels(&mut self, labels: HashMap<String, usize>) {
        self.labels = labels;
    }

    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.labels.get(name).copied()
    }

    // --- Call stack ---

    pub fn push_frame(&mut self, frame: Frame) {
        self.call_stack.push(frame);
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.call_stack.pop()
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn call_stack(&self) -> &[Frame] {
        &self.call_stack
    }

    // --- Breakpoints ---

    pub fn add_breakpoint(&mut self, index: usize) -> bool {
        self.breakpoints.insert(index)
    }

    pub fn remove_breakpoint(&mut self, index: usize) -> bool {
        if self.released_breakpoint == Some(index) {
            self.released_breakpoint = None;
        }
        self.breakpoints.remove(&index)
    }

    pub fn clear_breakpoints(&mut self) {
        self.breakpoints.clear();
        self.released_breakpoint = None;
    }

    pub fn breakpoints(&self) -> Vec<usize> {
        self.breakpoints.iter().copied().collect()
    }

    /// Check the breakpoint on the cursor line
    ///
    /// Returns the index when playback should pause before this line. A
    /// breakpoint that already paused lets its line through on the next
    /// check.
    pub fn take_breakpoint_hit(&mut self) -> Option<usize> {
        let index = self.cursor;
        if !self.breakpoints.contains(&index) {
            return None;
        }
        if self.released_breakpoint == Some(index) {
            self.released_breakpoint = None;
            return None;
        }
        self.released_breakpoint = Some(index);
        Some(index)
    }

    /// Called once the line at `index` ran
    pub fn line_finished(&mut self, index: usize) {
        if self.released_breakpoint == Some(index) {
            self.released_breakpoint = None;
        }
    }

    // --- Variables ---

    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }

    pub fn variables(&self) -> &HashMap<String, Value> {
        &self.variables
    }

    /// Returns the previous value
    pub fn set_variable(&mut self, name: impl Into<String>, value: Value) -> Option<Value> {
        self.variables.insert(name.into(), value)
    }

    pub fn remove_variable(&mut self, name: &str) -> Option<Value> {
        self.variables.remove(name)
    }

    /// Returns the names that were removed, sorted
    pub fn clear_variables(&mut self) -> Vec<String> {
        let mut names: Vec<String> = self.variables.drain().map(|(name, _)| name).collect();
        names.sort();
        names
    }

    // --- Counters ---

    pub fn record_line(&mut self) {
        self.lines_executed += 1;
    }

    pub fn record_command(&mut self) {
        self.commands_executed += 1;
    }

    pub fn lines_executed(&self) -> u64 {
        self.lines_executed
    }

    pub fn commands_executed(&self) -> u64 {
        self.commands_executed
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.map(|t| t.elapsed()).unwrap_or_default()
    }

    pub fn is_step_mode(&self) -> bool {
        self.step_mode
    }

    pub fn set_step_mode(&mut self, step_mode: bool) {
        self.step_mode = step_mode;
    }

    // --- Snapshots ---

    /// Deep copy of the restorable state, None when no script is loaded
    pub fn snapshot(&self) -> Option<ExecutionSnapshot> {
        let script = self.script.as_ref()?;
        Some(ExecutionSnapshot {
            script_name: script.name().to_string(),
            cursor: self.cursor,
            call_stack: self.call_stack.clone(),
            variables: self
                .variables
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            breakpoints: self.breakpoints(),
            lines_executed: self.lines_executed,
            commands_executed: self.commands_executed,
            saved_at: Utc::now(),
        })
    }

    /// Apply a snapshot taken from the same script
    ///
    /// The script and label table stay as they are.
    pub fn restore(&mut self, snapshot: &ExecutionSnapshot) {
        self.cursor = snapshot.cursor;
        self.call_stack = snapshot.call_stack.clone();
        self.variables = snapshot
            .variables
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.breakpoints = snapshot.breakpoints.iter().copied().collect();
        self.lines_executed = snapshot.lines_executed;
        self.commands_executed = snapshot.commands_executed;
        self.released_breakpoint = None;
    }
}
