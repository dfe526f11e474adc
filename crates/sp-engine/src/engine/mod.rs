//! Script engine
//!
//! [`ScriptEngine`] owns one execution context and drives it through the
//! playback loop in [`playback`]. The handle is cheap to clone; every clone
//! controls the same playback, so a caller can `tokio::spawn` a `play` call
//! and pause, step or stop it from elsewhere.
//!
//! Only one playback runs at a time. Starting a new one stops the active
//! run and waits for it to wind down first.

mod error;
mod playback;

pub use error::{EngineError, EngineResult};

use serde_json::Value;
use sp_config::{is_valid_playback_speed, EngineConfig, PLAYBACK_SPEED_RANGE};
use sp_core::{
    Context, EngineEvent, Event, EventKind, ExecutionResult, ExecutionSnapshot, PlaybackState,
};
use sp_event_bus::{EventBus, SharedEventBus};
use sp_storage::{load_as, save_as, SharedPersistence};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use ulid::Ulid;

use crate::command;
use crate::context::ExecutionContext;
use crate::loader::{ResourcePreloader, ScriptLoader, TextPresenter};
use crate::metadata::MetadataRegistry;
use crate::metrics::{MemoryProbe, MetricsSink};
use crate::recovery::RecoveryManager;
use crate::script::{Line, Script};
use crate::state::PlaybackStateManager;
use crate::timeout::{CommandStats, HealthReport, TimeoutManager};

use playback::{Finish, Start};

/// Builder for [`ScriptEngine`]
///
/// Every collaborator is optional. Without a loader `play_named` and
/// `@call` fail; without persistence no autosave happens.
pub struct EngineBuilder {
    config: EngineConfig,
    metadata: Option<Arc<MetadataRegistry>>,
    bus: Option<SharedEventBus>,
    loader: Option<Arc<dyn ScriptLoader>>,
    persistence: Option<SharedPersistence>,
    preloader: Option<Arc<dyn ResourcePreloader>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
    presenter: Option<Arc<dyn TextPresenter>>,
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            metadata: None,
            bus: None,
            loader: None,
            persistence: None,
            preloader: None,
            metrics: None,
            memory_probe: None,
            presenter: None,
        }
    }

    /// Use this registry instead of one built from `config.commands`
    pub fn with_metadata(mut self, metadata: Arc<MetadataRegistry>) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_event_bus(mut self, bus: SharedEventBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn with_loader(mut self, loader: Arc<dyn ScriptLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    pub fn with_persistence(mut self, persistence: SharedPersistence) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_preloader(mut self, preloader: Arc<dyn ResourcePreloader>) -> Self {
        self.preloader = Some(preloader);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.memory_probe = Some(probe);
        self
    }

    pub fn with_text_presenter(mut self, presenter: Arc<dyn TextPresenter>) -> Self {
        self.presenter = Some(presenter);
        self
    }

    pub fn build(self) -> ScriptEngine {
        let metadata = self
            .metadata
            .unwrap_or_else(|| Arc::new(MetadataRegistry::from_config(&self.config.commands)));
        let bus = self.bus.unwrap_or_else(|| Arc::new(EventBus::new()));
        let speed = self.config.playback.playback_speed;

        ScriptEngine {
            inner: Arc::new(Inner {
                state: PlaybackStateManager::new(bus.clone()),
                context: Arc::new(RwLock::new(ExecutionContext::new())),
                timeouts: TimeoutManager::new(metadata.clone()),
                recovery: RecoveryManager::new(),
                metadata,
                bus,
                loader: self.loader,
                persistence: self.persistence,
                preloader: self.preloader,
                metrics: self.metrics,
                memory_probe: self.memory_probe,
                presenter: self.presenter,
                play_gate: tokio::sync::Mutex::new(()),
                exec_lock: tokio::sync::Mutex::new(()),
                run_token: Mutex::new(None),
                run_context: RwLock::new(Context::new()),
                shutdown: CancellationToken::new(),
                speed_bits: AtomicU64::new(speed.to_bits()),
                pause_requested: AtomicBool::new(false),
                stop_requested: AtomicBool::new(false),
                deferred: Mutex::new(None),
                line_attempts: Mutex::new(HashMap::new()),
                config: self.config,
            }),
        }
    }
}

struct Inner {
    config: EngineConfig,
    metadata: Arc<MetadataRegistry>,
    bus: SharedEventBus,
    state: PlaybackStateManager,
    context: Arc<RwLock<ExecutionContext>>,
    timeouts: TimeoutManager,
    recovery: RecoveryManager,

    loader: Option<Arc<dyn ScriptLoader>>,
    persistence: Option<SharedPersistence>,
    preloader: Option<Arc<dyn ResourcePreloader>>,
    metrics: Option<Arc<dyn MetricsSink>>,
    memory_probe: Option<Arc<dyn MemoryProbe>>,
    presenter: Option<Arc<dyn TextPresenter>>,

    /// Held for the whole lifetime of a playback
    play_gate: tokio::sync::Mutex<()>,
    /// Held while one line executes; serializes stepping with the loop
    exec_lock: tokio::sync::Mutex<()>,
    run_token: Mutex<Option<CancellationToken>>,
    run_context: RwLock<Context>,
    shutdown: CancellationToken,

    speed_bits: AtomicU64,
    /// Pause asked for while a command was in flight
    pause_requested: AtomicBool,
    stop_requested: AtomicBool,
    /// Terminal outcome produced by a step, picked up by the loop
    deferred: Mutex<Option<Finish>>,
    /// Recovery retries and rollbacks spent per line
    line_attempts: Mutex<HashMap<usize, u32>>,
}

/// Handle to a playback engine
#[derive(Clone)]
pub struct ScriptEngine {
    inner: Arc<Inner>,
}

impl ScriptEngine {
    /// Engine with the given configuration and no collaborators
    pub fn new(config: EngineConfig) -> Self {
        EngineBuilder::new(config).build()
    }

    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder::new(config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // --- Playback ---

    /// Play `script` from the first line until it ends
    pub async fn play(&self, script: impl Into<Arc<Script>>) -> EngineResult<ExecutionResult> {
        self.inner.run(script.into(), Start::Beginning, None).await
    }

    /// Like [`play`](Self::play), cancelled when `cancel` fires
    pub async fn play_with_cancel(
        &self,
        script: impl Into<Arc<Script>>,
        cancel: CancellationToken,
    ) -> EngineResult<ExecutionResult> {
        self.inner
            .run(script.into(), Start::Beginning, Some(cancel))
            .await
    }

    /// Load `name` through the configured loader and play it
    pub async fn play_named(&self, name: &str) -> EngineResult<ExecutionResult> {
        let loader = self.inner.loader.clone().ok_or(EngineError::NoLoader)?;
        let script = loader.load_script(name).await?;
        self.play(script).await
    }

    pub async fn play_from_line(
        &self,
        script: impl Into<Arc<Script>>,
        index: usize,
    ) -> EngineResult<ExecutionResult> {
        let script = script.into();
        if index >= script.len() {
            return Err(EngineError::LineOutOfRange {
                index,
                len: script.len(),
            });
        }
        self.inner.run(script, Start::Line(index), None).await
    }

    /// Play `script` starting from a snapshot taken from it
    pub async fn play_from_state(
        &self,
        script: impl Into<Arc<Script>>,
        snapshot: ExecutionSnapshot,
    ) -> EngineResult<ExecutionResult> {
        let script = script.into();
        if snapshot.script_name != script.name() {
            return Err(EngineError::SnapshotMismatch {
                expected: script.name().to_string(),
                found: snapshot.script_name,
            });
        }
        if snapshot.cursor > script.len() {
            return Err(EngineError::LineOutOfRange {
                index: snapshot.cursor,
                len: script.len(),
            });
        }
        self.inner
            .run(script, Start::Snapshot(Box::new(snapshot)), None)
            .await
    }

    /// Pause the playback
    ///
    /// While a command is in flight the pause is applied once its line
    /// completes.
    pub fn pause(&self) -> EngineResult<()> {
        let inner = &self.inner;
        let run = inner.run_context();
        loop {
            match inner.state.current() {
                PlaybackState::Paused => return Ok(()),
                PlaybackState::Playing => {
                    if inner
                        .state
                        .transition_if(PlaybackState::Playing, PlaybackState::Paused, &run)
                    {
                        inner.pause_requested.store(false, Ordering::SeqCst);
                        info!("Playback paused");
                        return Ok(());
                    }
                }
                PlaybackState::Waiting => {
                    inner.pause_requested.store(true, Ordering::SeqCst);
                    if inner.state.current() == PlaybackState::Waiting {
                        debug!("Pause requested while a command is in flight");
                        return Ok(());
                    }
                }
                state => {
                    return Err(EngineError::InvalidState {
                        operation: "pause",
                        state,
                    })
                }
            }
        }
    }

    pub fn resume(&self) -> EngineResult<()> {
        let inner = &self.inner;
        inner.pause_requested.store(false, Ordering::SeqCst);
        match inner.state.current() {
            PlaybackState::Paused => {
                inner
                    .state
                    .transition(PlaybackState::Playing, &inner.run_context())?;
                info!("Playback resumed");
                Ok(())
            }
            PlaybackState::Playing | PlaybackState::Waiting => Ok(()),
            state => Err(EngineError::InvalidState {
                operation: "resume",
                state,
            }),
        }
    }

    /// Stop the active playback, if any
    ///
    /// The run ends with a `Stopped` result once its current suspension
    /// point observes the cancellation.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Stop and return to Idle with an empty execution context
    pub async fn reset(&self) {
        let inner = &self.inner;
        inner.stop();
        let _gate = inner.play_gate.lock().await;

        inner.state.force_reset(&inner.run_context());
        inner.context.write().unwrap().clear();
        inner.recovery.clear_checkpoint();
        inner.clear_run_flags();
        info!("Engine reset");
    }

    /// Stop for good and close the event bus
    ///
    /// Waits for the active playback to publish its final events.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.shutdown.cancel();
        inner.stop();
        let _gate = inner.play_gate.lock().await;
        inner.bus.close();
        info!("Engine shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    // --- Stepping and seeking ---

    /// Execute exactly one line, ignoring breakpoints
    ///
    /// Only valid while Playing or Paused; the state is the same afterwards
    /// unless the line ended the playback.
    pub async fn step_forward(&self) -> EngineResult<()> {
        let inner = &self.inner;
        inner.ensure_steppable("step forward")?;
        let _exec = inner.exec_lock.lock().await;
        inner.ensure_steppable("step forward")?;

        let token = inner
            .run_token
            .lock()
            .unwrap()
            .clone()
            .ok_or(EngineError::NoScript)?;

        inner.context.write().unwrap().set_step_mode(true);
        let step = inner.execute_line(&token).await;
        inner.context.write().unwrap().set_step_mode(false);

        if let playback::LineStep::Finished(finish) = step {
            inner.defer(finish);
        }
        Ok(())
    }

    /// Move the cursor back one line without executing anything
    ///
    /// Returns the new cursor.
    pub async fn step_backward(&self) -> EngineResult<usize> {
        let inner = &self.inner;
        inner.ensure_steppable("step backward")?;
        let _exec = inner.exec_lock.lock().await;

        let cursor = {
            let mut ctx = inner.context.write().unwrap();
            let cursor = ctx.cursor().saturating_sub(1);
            ctx.set_cursor(cursor);
            cursor
        };
        inner.publish_progress();
        Ok(cursor)
    }

    pub async fn skip_to_line(&self, index: usize) -> EngineResult<()> {
        let inner = &self.inner;
        let _exec = inner.exec_lock.lock().await;
        {
            let mut ctx = inner.context.write().unwrap();
            if ctx.script().is_none() {
                return Err(EngineError::NoScript);
            }
            let len = ctx.line_count();
            if index >= len {
                return Err(EngineError::LineOutOfRange { index, len });
            }
            ctx.set_cursor(index);
        }
        debug!(index, "Skipped to line");
        inner.publish_progress();
        Ok(())
    }

    pub async fn skip_to_label(&self, label: &str) -> EngineResult<()> {
        let index = {
            let ctx = self.inner.context.read().unwrap();
            if ctx.script().is_none() {
                return Err(EngineError::NoScript);
            }
            ctx.label_index(label)
                .ok_or_else(|| EngineError::LabelNotFound(label.to_string()))?
        };
        self.skip_to_line(index).await
    }

    /// Scale the inter-line delay; 2.0 halves it
    ///
    /// Accepts multipliers in [`PLAYBACK_SPEED_RANGE`].
    pub fn set_playback_speed(&self, speed: f64) -> EngineResult<()> {
        if !is_valid_playback_speed(speed) {
            return Err(EngineError::InvalidValue {
                name: "playback_speed",
                reason: format!(
                    "must be between {} and {}, got {}",
                    PLAYBACK_SPEED_RANGE.start(),
                    PLAYBACK_SPEED_RANGE.end(),
                    speed
                ),
            });
        }
        self.inner.speed_bits.store(speed.to_bits(), Ordering::SeqCst);
        debug!(speed, "Playback speed changed");
        Ok(())
    }

    pub fn playback_speed(&self) -> f64 {
        self.inner.playback_speed()
    }

    // --- Breakpoints ---

    /// Returns false when the breakpoint already existed
    pub fn add_breakpoint(&self, index: usize) -> bool {
        self.inner.context.write().unwrap().add_breakpoint(index)
    }

    pub fn remove_breakpoint(&self, index: usize) -> bool {
        self.inner.context.write().unwrap().remove_breakpoint(index)
    }

    pub fn clear_breakpoints(&self) {
        self.inner.context.write().unwrap().clear_breakpoints();
    }

    pub fn breakpoints(&self) -> Vec<usize> {
        self.inner.context.read().unwrap().breakpoints()
    }

    // --- Variables ---

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.inner.context.read().unwrap().variable(name).cloned()
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        let inner = &self.inner;
        command::set_variable(
            &inner.context,
            &inner.bus,
            &inner.run_context(),
            name.into(),
            value,
        );
    }

    pub fn clear_variables(&self) {
        let inner = &self.inner;
        command::clear_variables(&inner.context, &inner.bus, &inner.run_context());
    }

    // --- Saved state ---

    /// Persist a snapshot of the current playback, returning its key
    ///
    /// The snapshot also becomes the rollback checkpoint.
    pub async fn save_execution_state(&self) -> EngineResult<String> {
        let inner = &self.inner;
        let persistence = inner.persistence.clone().ok_or(EngineError::NoPersistence)?;
        let snapshot = inner
            .context
            .read()
            .unwrap()
            .snapshot()
            .ok_or(EngineError::NoScript)?;

        let key = format!("save.{}", Ulid::new());
        save_as(persistence.as_ref(), &key, &snapshot).await?;
        inner.recovery.set_checkpoint(snapshot);

        info!(key = %key, "Execution state saved");
        Ok(key)
    }

    /// Read a saved snapshot without applying it
    pub async fn load_snapshot(&self, key: &str) -> EngineResult<ExecutionSnapshot> {
        let persistence = self
            .inner
            .persistence
            .clone()
            .ok_or(EngineError::NoPersistence)?;
        load_as(persistence.as_ref(), key)
            .await?
            .ok_or_else(|| EngineError::SnapshotNotFound(key.to_string()))
    }

    /// Apply a saved snapshot to the paused playback of the same script
    pub async fn load_execution_state(&self, key: &str) -> EngineResult<()> {
        let inner = &self.inner;
        let state = inner.state.current();
        if state != PlaybackState::Paused {
            return Err(EngineError::InvalidState {
                operation: "load execution state",
                state,
            });
        }

        let snapshot = self.load_snapshot(key).await?;
        let _exec = inner.exec_lock.lock().await;
        {
            let mut ctx = inner.context.write().unwrap();
            let name = ctx.script_name().ok_or(EngineError::NoScript)?;
            if name != snapshot.script_name {
                return Err(EngineError::SnapshotMismatch {
                    expected: name.to_string(),
                    found: snapshot.script_name,
                });
            }
            let len = ctx.line_count();
            if snapshot.cursor > len {
                return Err(EngineError::LineOutOfRange {
                    index: snapshot.cursor,
                    len,
                });
            }
            ctx.restore(&snapshot);
        }
        inner.recovery.set_checkpoint(snapshot);
        inner.line_attempts.lock().unwrap().clear();

        info!(key = %key, "Execution state loaded");
        inner.publish_progress();
        Ok(())
    }

    // --- Accessors ---

    pub fn state(&self) -> PlaybackState {
        self.inner.state.current()
    }

    /// Receiver that observes every committed state
    pub fn state_receiver(&self) -> watch::Receiver<PlaybackState> {
        self.inner.state.subscribe()
    }

    /// Index of the next line to execute
    pub fn cursor(&self) -> usize {
        self.inner.context.read().unwrap().cursor()
    }

    pub fn current_line(&self) -> Option<Line> {
        self.inner.context.read().unwrap().current_line().cloned()
    }

    pub fn script_name(&self) -> Option<String> {
        self.inner
            .context
            .read()
            .unwrap()
            .script_name()
            .map(str::to_string)
    }

    pub fn progress(&self) -> f64 {
        self.inner.context.read().unwrap().progress()
    }

    pub fn lines_executed(&self) -> u64 {
        self.inner.context.read().unwrap().lines_executed()
    }

    pub fn commands_executed(&self) -> u64 {
        self.inner.context.read().unwrap().commands_executed()
    }

    pub fn call_depth(&self) -> usize {
        self.inner.context.read().unwrap().call_depth()
    }

    pub fn snapshot(&self) -> Option<ExecutionSnapshot> {
        self.inner.context.read().unwrap().snapshot()
    }

    pub fn timeout_stats(&self) -> HashMap<String, CommandStats> {
        self.inner.timeouts.all_stats()
    }

    /// Command types that are slow or failing, judged by the configured threshold
    pub fn health_report(&self) -> HealthReport {
        self.inner
            .timeouts
            .health_report(self.inner.config.performance.slow_command_threshold())
    }

    pub fn recovery_success_rate(&self) -> Option<f64> {
        self.inner.recovery.success_rate()
    }

    pub fn metadata(&self) -> &Arc<MetadataRegistry> {
        &self.inner.metadata
    }

    // --- Events ---

    pub fn subscribe(&self, kind: EventKind) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe(kind)
    }

    pub fn subscribe_all(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe_all()
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.inner.bus
    }
}

impl Inner {
    fn run_context(&self) -> Context {
        self.run_context.read().unwrap().clone()
    }

    fn playback_speed(&self) -> f64 {
        f64::from_bits(self.speed_bits.load(Ordering::SeqCst))
    }

    fn stop(&self) {
        let state = self.state.current();
        if !state.is_active() {
            return;
        }
        self.stop_requested.store(true, Ordering::SeqCst);
        self.state
            .transition_if_allowed(PlaybackState::Stopped, &self.run_context());
        if let Some(token) = self.run_token.lock().unwrap().as_ref() {
            token.cancel();
        }
        info!(from = %state, "Playback stop requested");
    }

    fn clear_run_flags(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
        self.stop_requested.store(false, Ordering::SeqCst);
        self.deferred.lock().unwrap().take();
        self.line_attempts.lock().unwrap().clear();
    }

    fn ensure_steppable(&self, operation: &'static str) -> EngineResult<()> {
        match self.state.current() {
            PlaybackState::Playing | PlaybackState::Paused => Ok(()),
            state => Err(EngineError::InvalidState { operation, state }),
        }
    }

    /// Hand a terminal outcome to the loop and wake it if it is paused
    fn defer(&self, finish: Finish) {
        *self.deferred.lock().unwrap() = Some(finish);
        self.state.transition_if(
            PlaybackState::Paused,
            PlaybackState::Playing,
            &self.run_context(),
        );
    }

    fn take_deferred(&self) -> Option<Finish> {
        self.deferred.lock().unwrap().take()
    }

    fn publish_progress(&self) {
        let progress = self.context.read().unwrap().progress();
        self.bus
            .publish(EngineEvent::ProgressChanged { progress }, &self.run_context());
    }
}
