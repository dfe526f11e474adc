//! The playback loop
//!
//! Suspension points, all cancellable through the run token: the paused
//! wait, command execution, retry backoff, the inter-line delay and the
//! autosave write. Locks on the execution context are never held across
//! any of them.

use sp_core::{
    Context, EngineEvent, ErrorCategory, ErrorSeverity, ExecutionOutcome, ExecutionResult,
    ExecutionSnapshot, FlowAction, PlaybackState, ScriptExecutionError,
};
use sp_storage::save_as;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use super::{EngineResult, Inner};
use crate::classify::classify;
use crate::command::{self, Command, CommandContext, CommandError};
use crate::flow::{FlowControlResolver, FlowOutcome};
use crate::loader::LoaderError;
use crate::metadata::CommandMetadata;
use crate::metrics::{ExecutionSample, MemorySample};
use crate::preprocess::preprocess;
use crate::recovery::RecoveryOutcome;
use crate::script::{CommandLine, Line, Script, TextKind, TextLine};

/// Metadata key for narrative lines handed to the text presenter
const TEXT_COMMAND_TYPE: &str = "text";

/// Metadata key for command lines without a command
const UNRESOLVED_COMMAND_TYPE: &str = "unresolved";

/// Where a playback begins
pub(super) enum Start {
    Beginning,
    Line(usize),
    Snapshot(Box<ExecutionSnapshot>),
}

/// How the line loop ended
#[derive(Debug)]
pub(super) enum Finish {
    Completed,
    Stopped(String),
    Failed(Box<ScriptExecutionError>, usize),
    /// Stopped by a recovery action, keeping the error that caused it
    Halted(Box<ScriptExecutionError>, usize),
    Cancelled,
}

pub(super) enum LineStep {
    Next,
    Finished(Finish),
}

enum LineError {
    /// The run token fired while the line was executing
    Interrupted,
    Failed(Box<ScriptExecutionError>, CommandMetadata),
}

enum Handled {
    Flow(FlowAction),
    Done(LineStep),
}

impl Inner {
    #[instrument(skip_all, fields(script = %script.name()))]
    pub(super) async fn run(
        &self,
        script: Arc<Script>,
        start: Start,
        caller: Option<CancellationToken>,
    ) -> EngineResult<ExecutionResult> {
        if self.shutdown.is_cancelled() {
            return Err(super::EngineError::ShutDown);
        }
        if self.state.current().is_active() {
            info!(script = %script.name(), "Stopping active playback before starting a new one");
            self.stop();
        }

        let _gate = self.play_gate.lock().await;
        if self.shutdown.is_cancelled() {
            return Err(super::EngineError::ShutDown);
        }

        let token = match caller {
            Some(caller) => caller.child_token(),
            None => CancellationToken::new(),
        };
        *self.run_token.lock().unwrap() = Some(token.clone());
        let run = Context::new();
        *self.run_context.write().unwrap() = run.clone();
        self.clear_run_flags();

        self.state.force_reset(&run);
        self.state.transition(PlaybackState::Loading, &run)?;

        let name = script.name().to_string();
        info!(script = %name, lines = script.len(), run = %run.id, "Loading script");
        self.context.write().unwrap().reset_for(script.clone());

        let report = preprocess(&script);
        for e in &report.errors {
            warn!(script = %name, line = e.line(), "{}", e);
        }
        if self.config.errors.raise_on_preprocess_errors {
            if let Some(error) = report.to_error(&name) {
                self.state
                    .transition_if(PlaybackState::Loading, PlaybackState::Failed, &run);
                let line = error.line_index.unwrap_or(0);
                return Ok(self.finish(Finish::Failed(Box::new(error), line)));
            }
        }

        {
            let mut ctx = self.context.write().unwrap();
            ctx.set_labels(report.labels);
            match start {
                Start::Beginning => {}
                Start::Line(index) => ctx.set_cursor(index),
                Start::Snapshot(snapshot) => ctx.restore(&snapshot),
            }
        }

        if let Some(preloader) = self.preloader.clone() {
            tokio::select! {
                result = preloader.preload(&script) => {
                    if let Err(e) = result {
                        warn!(script = %name, error = %e, "Resource preload failed, continuing");
                    }
                }
                _ = token.cancelled() => {}
            }
        }
        if token.is_cancelled() {
            return Ok(self.finish(Finish::Cancelled));
        }

        self.bus
            .publish(EngineEvent::ScriptStarted { script: name.clone() }, &run);
        let checkpoint = self.context.read().unwrap().snapshot();
        if let Some(snapshot) = checkpoint {
            self.recovery.set_checkpoint(snapshot);
        }

        let finish = if self
            .state
            .transition_if(PlaybackState::Loading, PlaybackState::Playing, &run)
        {
            info!(script = %name, "Playback started");
            self.run_loop(&token).await
        } else {
            Finish::Cancelled
        };

        Ok(self.finish(finish))
    }

    async fn run_loop(&self, token: &CancellationToken) -> Finish {
        let mut last_autosave = Instant::now();

        loop {
            if self.state.current() == PlaybackState::Paused
                && !self.state.wait_while_paused(token).await
            {
                return Finish::Cancelled;
            }
            if let Some(finish) = self.take_deferred() {
                return finish;
            }
            if token.is_cancelled() {
                return Finish::Cancelled;
            }
            match self.state.current() {
                PlaybackState::Playing | PlaybackState::Waiting => {}
                PlaybackState::Paused => continue,
                PlaybackState::Completed => return Finish::Completed,
                state => {
                    debug!(%state, "Leaving playback loop");
                    return Finish::Cancelled;
                }
            }

            let step = {
                let _exec = self.exec_lock.lock().await;
                let deferred = self.deferred.lock().unwrap().is_some();
                if deferred || self.state.current() != PlaybackState::Playing {
                    continue;
                }

                let hit = self.context.write().unwrap().take_breakpoint_hit();
                if let Some(index) = hit {
                    info!(index, "Breakpoint hit");
                    let run = self.run_context();
                    self.bus.publish(EngineEvent::BreakpointHit { index }, &run);
                    self.state
                        .transition_if(PlaybackState::Playing, PlaybackState::Paused, &run);
                    continue;
                }

                self.execute_line(token).await
            };
            if let LineStep::Finished(finish) = step {
                return finish;
            }

            let delay = self.line_delay();
            if !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = token.cancelled() => return Finish::Cancelled,
                }
            }

            self.autosave_if_due(&mut last_autosave, token).await;
        }
    }

    /// Execute the line under the cursor and apply its flow action
    pub(super) async fn execute_line(&self, token: &CancellationToken) -> LineStep {
        let run = self.run_context();
        let (index, line, script_name) = {
            let mut ctx = self.context.write().unwrap();
            while !ctx.can_continue() {
                match ctx.pop_frame() {
                    Some(frame) => {
                        debug!(
                            return_to = frame.return_line_index,
                            "Implicit return at end of script"
                        );
                        ctx.set_cursor(frame.return_line_index);
                    }
                    None => return LineStep::Finished(Finish::Completed),
                }
            }
            let index = ctx.cursor();
            let Some(line) = ctx.current_line().cloned() else {
                return LineStep::Finished(Finish::Completed);
            };
            let script_name = ctx.script_name().unwrap_or_default().to_string();
            (index, line, script_name)
        };

        let source = line.source().to_string();
        trace!(index, line = %source, "Executing line");
        self.bus.publish(
            EngineEvent::LineExecuting {
                index,
                line: source.clone(),
            },
            &run,
        );

        let outcome = match &line {
            Line::Command(command_line) => {
                self.execute_command(command_line, index, &script_name, token, &run)
                    .await
            }
            Line::Text(text) => self.execute_text(text, index, &script_name, token).await,
        };

        let (flow, recovered) = match outcome {
            Ok(flow) => (flow, false),
            Err(LineError::Interrupted) => return LineStep::Finished(Finish::Cancelled),
            Err(LineError::Failed(error, metadata)) => {
                match self.handle_failure(*error, &metadata, index, &run) {
                    Handled::Flow(flow) => (flow, true),
                    Handled::Done(step) => {
                        self.publish_progress();
                        self.apply_requested_pause(index, &run);
                        return step;
                    }
                }
            }
        };

        {
            let mut ctx = self.context.write().unwrap();
            ctx.record_line();
            ctx.line_finished(index);
        }
        self.line_attempts.lock().unwrap().remove(&index);
        self.bus
            .publish(EngineEvent::LineExecuted { index, line: source }, &run);

        let step = match self.apply_flow(&flow, index, &script_name).await {
            Ok(step) => {
                if recovered {
                    self.recovery.record_success();
                }
                step
            }
            Err(error) => self.unrecoverable(error, index, &run),
        };
        self.publish_progress();
        self.apply_requested_pause(index, &run);
        step
    }

    /// A pause asked for while a command was in flight takes effect once
    /// its line is complete
    fn apply_requested_pause(&self, index: usize, run: &Context) {
        if self.pause_requested.swap(false, Ordering::SeqCst)
            && self
                .state
                .transition_if(PlaybackState::Playing, PlaybackState::Paused, run)
        {
            info!(index, "Applied pause requested during command");
        }
    }

    async fn execute_command(
        &self,
        line: &CommandLine,
        index: usize,
        script_name: &str,
        token: &CancellationToken,
        run: &Context,
    ) -> Result<FlowAction, LineError> {
        let Some(command) = line.command().cloned() else {
            let metadata = self.metadata.get(UNRESOLVED_COMMAND_TYPE);
            let error = ScriptExecutionError::configuration(format!(
                "no command registered for '{}'",
                line.text()
            ))
            .at_line(index)
            .in_script(script_name)
            .with_suggestion("register the command keyword with the script parser");
            return Err(LineError::Failed(Box::new(error), metadata));
        };

        let metadata = self.metadata.get(command.command_type());
        let waiting = self
            .state
            .transition_if(PlaybackState::Playing, PlaybackState::Waiting, run);

        let result = self
            .dispatch_with_retries(command.as_ref(), &metadata, index, script_name, token, run)
            .await;

        if waiting {
            self.state
                .transition_if(PlaybackState::Waiting, PlaybackState::Playing, run);
        }

        result
    }

    async fn dispatch_with_retries(
        &self,
        command: &dyn Command,
        metadata: &CommandMetadata,
        index: usize,
        script_name: &str,
        token: &CancellationToken,
        run: &Context,
    ) -> Result<FlowAction, LineError> {
        let ctx = CommandContext::new(
            self.context.clone(),
            self.bus.clone(),
            run.clone(),
            index,
            script_name,
        );
        let command_type = metadata.command_type.as_str();
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.bus.publish(
                EngineEvent::CommandExecuting {
                    index,
                    command_type: command_type.to_string(),
                },
                run,
            );

            let started = Instant::now();
            let result = self
                .timeouts
                .execute_with_timeout(command_type, token, |cancel| {
                    command::dispatch(command, &ctx, cancel)
                })
                .await;
            let elapsed = started.elapsed();

            self.bus.publish(
                EngineEvent::CommandExecuted {
                    index,
                    command_type: command_type.to_string(),
                    success: result.is_ok(),
                },
                run,
            );
            if let Some(metrics) = &self.metrics {
                metrics.record_execution(ExecutionSample {
                    script_name: script_name.to_string(),
                    line_index: index,
                    command_type: command_type.to_string(),
                    elapsed,
                    success: result.is_ok(),
                    attempt,
                });
            }

            let failure = match result {
                Err(_) if token.is_cancelled() => {
                    debug!(index, command_type, "Command interrupted");
                    return Err(LineError::Interrupted);
                }
                Ok(result) => {
                    self.context.write().unwrap().record_command();
                    return Ok(result.flow);
                }
                Err(e) => {
                    self.context.write().unwrap().record_command();
                    e
                }
            };

            let error = classify(&failure, metadata)
                .at_line(index)
                .in_script(script_name)
                .with_attempts(attempt);

            if error.retryable && attempt <= metadata.max_retries {
                let delay = metadata.backoff_delay(attempt);
                warn!(
                    index,
                    command_type,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error.message,
                    "Command failed, retrying"
                );
                self.bus.publish(
                    EngineEvent::CommandRetrying {
                        index,
                        command_type: command_type.to_string(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    },
                    run,
                );
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return Err(LineError::Interrupted),
                    _ = tokio::time::sleep(delay) => {}
                }
                continue;
            }

            return Err(LineError::Failed(Box::new(error), metadata.clone()));
        }
    }

    async fn execute_text(
        &self,
        line: &TextLine,
        index: usize,
        script_name: &str,
        token: &CancellationToken,
    ) -> Result<FlowAction, LineError> {
        let TextKind::Narrative(text) = line.kind() else {
            return Ok(FlowAction::Continue);
        };
        let Some(presenter) = self.presenter.clone() else {
            trace!(index, "No text presenter, skipping narrative line");
            return Ok(FlowAction::Continue);
        };

        let result = tokio::select! {
            result = presenter.present(text, token.child_token()) => result,
            _ = token.cancelled() => Err(CommandError::Cancelled),
        };

        match result {
            Ok(()) => Ok(FlowAction::Continue),
            Err(_) if token.is_cancelled() => Err(LineError::Interrupted),
            Err(e) => {
                let metadata = self.metadata.get(TEXT_COMMAND_TYPE);
                let error = classify(&e, &metadata)
                    .at_line(index)
                    .in_script(script_name);
                Err(LineError::Failed(Box::new(error), metadata))
            }
        }
    }

    fn handle_failure(
        &self,
        error: ScriptExecutionError,
        metadata: &CommandMetadata,
        index: usize,
        run: &Context,
    ) -> Handled {
        warn!(
            index,
            command_type = %metadata.command_type,
            category = %error.category,
            severity = %error.severity,
            attempts = error.retry_attempts,
            "Line failed: {}",
            error.message
        );

        if self.config.errors.recovery_enabled {
            let attempts = self
                .line_attempts
                .lock()
                .unwrap()
                .get(&index)
                .copied()
                .unwrap_or(0);
            let max = self.config.errors.max_recovery_retries;

            match self.recovery.recover(&error, metadata, attempts, max) {
                RecoveryOutcome::Continue(flow) => return Handled::Flow(flow),
                RecoveryOutcome::RetryLine => {
                    self.bump_line_attempts(index);
                    self.recovery.record_success();
                    return Handled::Done(LineStep::Next);
                }
                RecoveryOutcome::Rollback(snapshot) => {
                    self.bump_line_attempts(index);
                    self.context.write().unwrap().restore(&snapshot);
                    self.recovery.record_success();
                    info!(from = index, to = snapshot.cursor, "Rolled back to checkpoint");
                    return Handled::Done(LineStep::Next);
                }
                RecoveryOutcome::Stop => {
                    self.line_attempts.lock().unwrap().remove(&index);
                    self.recovery.record_success();
                    return Handled::Done(LineStep::Finished(Finish::Halted(
                        Box::new(error),
                        index,
                    )));
                }
                RecoveryOutcome::Unrecoverable => {}
            }
        }

        Handled::Done(self.unrecoverable(error, index, run))
    }

    fn bump_line_attempts(&self, index: usize) {
        *self.line_attempts.lock().unwrap().entry(index).or_insert(0) += 1;
    }

    fn unrecoverable(&self, error: ScriptExecutionError, index: usize, run: &Context) -> LineStep {
        self.line_attempts.lock().unwrap().remove(&index);
        if !self.config.errors.continue_on_error {
            return LineStep::Finished(Finish::Failed(Box::new(error), index));
        }

        error!(
            index,
            category = %error.category,
            "Unrecoverable error, continuing with the next line: {}",
            error.message
        );
        self.bus
            .publish(EngineEvent::LineFailed { index, error }, run);
        {
            let mut ctx = self.context.write().unwrap();
            ctx.line_finished(index);
            ctx.set_cursor(index + 1);
        }
        LineStep::Next
    }

    /// Apply the flow action of the line at `index`
    ///
    /// An action that cannot be applied leaves the cursor on the line and
    /// returns the error for the caller to handle.
    async fn apply_flow(
        &self,
        flow: &FlowAction,
        index: usize,
        script_name: &str,
    ) -> Result<LineStep, ScriptExecutionError> {
        let resolved = FlowControlResolver::resolve(&mut self.context.write().unwrap(), flow)
            .map_err(|e| e.at_line(index).in_script(script_name))?;

        let step = match resolved {
            FlowOutcome::Advance => {
                self.context.write().unwrap().advance();
                LineStep::Next
            }
            FlowOutcome::Jumped(target) => {
                debug!(from = index, to = target, "Jumped");
                LineStep::Next
            }
            FlowOutcome::Returned(target) => {
                debug!(from = index, to = target, "Returned from subroutine");
                LineStep::Next
            }
            FlowOutcome::Stop(reason) => LineStep::Finished(Finish::Stopped(reason)),
            FlowOutcome::Completed => LineStep::Finished(Finish::Completed),
            FlowOutcome::CallScript(name) => {
                let run = self.run_context();
                self.switch_script(&name, &run).await.map_err(|error| {
                    if error.line_index.is_none() {
                        error.at_line(index).in_script(script_name)
                    } else {
                        error
                    }
                })?;
                LineStep::Next
            }
        };
        Ok(step)
    }

    /// Continue playback in another script at its first line
    async fn switch_script(&self, name: &str, run: &Context) -> Result<(), ScriptExecutionError> {
        let Some(loader) = self.loader.clone() else {
            return Err(ScriptExecutionError::configuration(format!(
                "cannot call script {}: no script loader configured",
                name
            ))
            .with_suggestion("configure a script loader on the engine"));
        };

        let script = loader.load_script(name).await.map_err(loader_error)?;
        let report = preprocess(&script);
        for e in &report.errors {
            warn!(script = %name, line = e.line(), "{}", e);
        }
        if self.config.errors.raise_on_preprocess_errors {
            if let Some(error) = report.to_error(name) {
                return Err(error);
            }
        }

        let checkpoint = {
            let mut ctx = self.context.write().unwrap();
            ctx.switch_script(Arc::new(script), report.labels);
            ctx.snapshot()
        };
        if let Some(snapshot) = checkpoint {
            self.recovery.set_checkpoint(snapshot);
        }
        self.line_attempts.lock().unwrap().clear();

        let child = run.child();
        *self.run_context.write().unwrap() = child.clone();
        info!(script = %name, parent = %run.id, "Switched script");
        self.bus.publish(
            EngineEvent::ScriptStarted {
                script: name.to_string(),
            },
            &child,
        );
        Ok(())
    }

    fn line_delay(&self) -> Duration {
        scaled_delay(self.config.playback.line_delay(), self.playback_speed())
    }

    async fn autosave_if_due(&self, last: &mut Instant, token: &CancellationToken) {
        let Some(interval) = self.config.playback.autosave_interval() else {
            return;
        };
        let Some(persistence) = self.persistence.clone() else {
            return;
        };
        if last.elapsed() < interval {
            return;
        }
        *last = Instant::now();

        let snapshot = self.context.read().unwrap().snapshot();
        let Some(snapshot) = snapshot else {
            return;
        };
        self.recovery.set_checkpoint(snapshot.clone());

        let key = self.config.playback.autosave_key.as_str();
        tokio::select! {
            result = save_as(persistence.as_ref(), key, &snapshot) => match result {
                Ok(()) => debug!(key, cursor = snapshot.cursor, "Autosaved execution state"),
                Err(e) => warn!(key, error = %e, "Autosave failed"),
            },
            _ = token.cancelled() => debug!(key, "Autosave interrupted"),
        }

        self.record_memory();
    }

    fn record_memory(&self) {
        let (Some(metrics), Some(probe)) = (&self.metrics, &self.memory_probe) else {
            return;
        };
        let Some(bytes) = probe.current_usage() else {
            return;
        };
        let (script_name, lines_executed) = {
            let ctx = self.context.read().unwrap();
            (
                ctx.script_name().unwrap_or_default().to_string(),
                ctx.lines_executed(),
            )
        };
        metrics.record_memory(MemorySample {
            script_name,
            bytes,
            lines_executed,
        });
    }

    /// Commit the terminal state and publish the run's final event
    fn finish(&self, finish: Finish) -> ExecutionResult {
        let run = self.run_context();

        let (outcome, error, line_index) = match finish {
            Finish::Completed => {
                // A pause applied on the last line must not block completion
                self.state
                    .transition_if(PlaybackState::Paused, PlaybackState::Playing, &run);
                self.state
                    .transition_if_allowed(PlaybackState::Completed, &run);
                (ExecutionOutcome::Success, None, None)
            }
            Finish::Stopped(reason) => {
                info!(reason = %reason, "Playback stopped");
                self.state.transition_if_allowed(PlaybackState::Stopped, &run);
                (ExecutionOutcome::Stopped, None, None)
            }
            Finish::Failed(error, index) => {
                error!(
                    line = index,
                    category = %error.category,
                    severity = %error.severity,
                    "Playback failed: {}",
                    error.message
                );
                self.state.transition_if_allowed(PlaybackState::Stopped, &run);
                (ExecutionOutcome::Failure, Some(*error), Some(index))
            }
            Finish::Halted(error, index) => {
                warn!(
                    line = index,
                    category = %error.category,
                    "Playback stopped by recovery: {}",
                    error.message
                );
                self.state.transition_if_allowed(PlaybackState::Stopped, &run);
                (ExecutionOutcome::Stopped, Some(*error), Some(index))
            }
            Finish::Cancelled => {
                self.state.transition_if_allowed(PlaybackState::Stopped, &run);
                if self.stop_requested.load(Ordering::SeqCst) {
                    (ExecutionOutcome::Stopped, None, None)
                } else {
                    info!("Playback cancelled");
                    (ExecutionOutcome::Cancelled, None, None)
                }
            }
        };

        let result = {
            let ctx = self.context.read().unwrap();
            ExecutionResult {
                outcome,
                script_name: ctx.script_name().unwrap_or_default().to_string(),
                lines_executed: ctx.lines_executed(),
                commands_executed: ctx.commands_executed(),
                elapsed: ctx.elapsed(),
                error,
                line_index,
            }
        };

        match &result.error {
            Some(error) => self.bus.publish(
                EngineEvent::ScriptFailed {
                    script: result.script_name.clone(),
                    error: error.clone(),
                },
                &run,
            ),
            None => self.bus.publish(
                EngineEvent::ScriptCompleted {
                    script: result.script_name.clone(),
                    result: result.clone(),
                },
                &run,
            ),
        }

        info!(
            script = %result.script_name,
            outcome = result.outcome.as_str(),
            lines = result.lines_executed,
            commands = result.commands_executed,
            elapsed_ms = result.elapsed.as_millis() as u64,
            "Playback finished"
        );

        self.record_memory();
        self.run_token.lock().unwrap().take();
        result
    }
}

/// `base` divided by `speed`, saturating instead of overflowing
fn scaled_delay(base: Duration, speed: f64) -> Duration {
    if base.is_zero() {
        return base;
    }
    Duration::try_from_secs_f64(base.as_secs_f64() / speed).unwrap_or(Duration::MAX)
}

fn loader_error(error: LoaderError) -> ScriptExecutionError {
    let category = match &error {
        LoaderError::NotFound { .. } | LoaderError::Io { .. } => ErrorCategory::ResourceLoading,
        LoaderError::Parse { .. } => ErrorCategory::Validation,
    };
    ScriptExecutionError::new(category, ErrorSeverity::Critical, error.to_string())
        .with_suggestion("check that the called script exists and parses")
}
