//! Shared fakes for engine integration tests
//!
//! Commands here record what happened to them so tests can assert on
//! attempt counts and ordering without timing assumptions.

#![allow(dead_code)]

use async_trait::async_trait;
use sp_config::{CommandPolicy, EngineConfig};
use sp_core::{CommandResult, Event, FlowAction, PlaybackState};
use sp_engine::{
    Command, CommandContext, CommandError, Line, ScriptEngine, StructuredCommand, TextPresenter,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio_util::sync::CancellationToken;

/// Upper bound for any wait in these tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Config without pacing so tests run at full speed
pub fn fast_config() -> EngineConfig {
    EngineConfig::default()
}

/// Config with a policy registered for one command type
pub fn config_with_policy(command_type: &str, policy: CommandPolicy) -> EngineConfig {
    let mut config = fast_config();
    config
        .commands
        .types
        .insert(command_type.to_string(), policy);
    config
}

pub fn text(line: &str) -> Line {
    Line::text(line)
}

pub fn cmd(command: impl Command + 'static) -> Line {
    let source = format!("@{}", command.command_type());
    Line::command(Arc::new(command), source)
}

/// Wait until the engine reports `state`
pub async fn wait_for_state(engine: &ScriptEngine, state: PlaybackState) {
    let mut rx = engine.state_receiver();
    tokio::time::timeout(TEST_TIMEOUT, async {
        loop {
            if *rx.borrow_and_update() == state {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for state {}", state));
}

/// Everything already delivered to `rx`
pub fn drain(rx: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// ============================================================================
// Fake commands
// ============================================================================

/// Succeeds and counts its executions
pub struct Counting {
    pub count: Arc<AtomicUsize>,
}

impl Counting {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        (
            Self {
                count: count.clone(),
            },
            count,
        )
    }
}

#[async_trait]
impl Command for Counting {
    fn command_type(&self) -> &str {
        "count"
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Fails with the error `make_error` builds, counting attempts
pub struct Failing {
    pub command_type: &'static str,
    pub attempts: Arc<AtomicUsize>,
    pub make_error: fn() -> CommandError,
}

impl Failing {
    pub fn network(command_type: &'static str) -> (Self, Arc<AtomicUsize>) {
        Self::with_error(command_type, || {
            CommandError::Network("connection refused".to_string())
        })
    }

    pub fn with_error(
        command_type: &'static str,
        make_error: fn() -> CommandError,
    ) -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                command_type,
                attempts: attempts.clone(),
                make_error,
            },
            attempts,
        )
    }
}

#[async_trait]
impl Command for Failing {
    fn command_type(&self) -> &str {
        self.command_type
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err((self.make_error)())
    }
}

/// Fails the first time it runs, succeeds afterwards
pub struct FailOnce {
    pub attempts: Arc<AtomicUsize>,
}

impl FailOnce {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let attempts = Arc::new(AtomicUsize::new(0));
        (
            Self {
                attempts: attempts.clone(),
            },
            attempts,
        )
    }
}

#[async_trait]
impl Command for FailOnce {
    fn command_type(&self) -> &str {
        "fail_once"
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(CommandError::Network("first attempt fails".to_string()));
        }
        Ok(())
    }
}

/// Signals `started`, then runs until cancelled
pub struct Blocking {
    pub started: Arc<Notify>,
}

impl Blocking {
    pub fn new() -> (Self, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        (
            Self {
                started: started.clone(),
            },
            started,
        )
    }
}

#[async_trait]
impl Command for Blocking {
    fn command_type(&self) -> &str {
        "block"
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        self.started.notify_one();
        cancel.cancelled().await;
        Err(CommandError::Cancelled)
    }
}

/// Signals `started`, then waits for `release`
pub struct Gated {
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl Gated {
    pub fn new() -> (Self, Arc<Notify>, Arc<Notify>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        (
            Self {
                started: started.clone(),
                release: release.clone(),
            },
            started,
            release,
        )
    }
}

#[async_trait]
impl Command for Gated {
    fn command_type(&self) -> &str {
        "gate"
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        self.started.notify_one();
        tokio::select! {
            _ = self.release.notified() => Ok(()),
            _ = cancel.cancelled() => Err(CommandError::Cancelled),
        }
    }
}

/// Jumps back to `label` until `count` reaches `limit`
pub struct LoopBack {
    pub label: &'static str,
    pub count: Arc<AtomicUsize>,
    pub limit: usize,
}

#[async_trait]
impl Command for LoopBack {
    fn command_type(&self) -> &str {
        "loop_back"
    }

    async fn execute(
        &self,
        ctx: &CommandContext,
        cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        self.execute_with_result(ctx, cancel).await.map(|_| ())
    }

    fn as_structured(&self) -> Option<&dyn StructuredCommand> {
        Some(self)
    }
}

#[async_trait]
impl StructuredCommand for LoopBack {
    async fn execute_with_result(
        &self,
        _ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        if self.count.load(Ordering::SeqCst) < self.limit {
            Ok(CommandResult::flow(FlowAction::JumpToLabel(
                self.label.to_string(),
            )))
        } else {
            Ok(CommandResult::ok())
        }
    }
}

/// Records every narrative line it is asked to show
#[derive(Default)]
pub struct RecordingPresenter {
    pub shown: Mutex<Vec<String>>,
}

#[async_trait]
impl TextPresenter for RecordingPresenter {
    async fn present(&self, text: &str, _cancel: CancellationToken) -> Result<(), CommandError> {
        self.shown.lock().unwrap().push(text.to_string());
        Ok(())
    }
}
