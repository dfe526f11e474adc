//! Command seam
//!
//! A command is what a command line dispatches to. Plain commands only report
//! success or failure; commands that also steer the cursor implement
//! [`StructuredCommand`] and expose it through [`Command::as_structured`].

use async_trait::async_trait;
use serde_json::Value;
use sp_core::{CommandResult, Context, EngineEvent, Frame, ScriptExecutionError};
use sp_event_bus::{EventBus, SharedEventBus};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::context::ExecutionContext;

/// Failure returned by a command
///
/// The shape decides how the error is classified; see [`crate::classify`].
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("command was cancelled")]
    Cancelled,

    #[error("command timed out after {elapsed:?}")]
    TimedOut { elapsed: Duration },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not implemented: {0}")]
    Unimplemented(String),

    #[error("out of resources: {0}")]
    OutOfResources(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("access denied: {0}")]
    Security(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    /// An already classified error, kept as is
    #[error("{0}")]
    Reported(Box<ScriptExecutionError>),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<ScriptExecutionError> for CommandError {
    fn from(error: ScriptExecutionError) -> Self {
        CommandError::Reported(Box::new(error))
    }
}

/// Something a command line can execute
#[async_trait]
pub trait Command: Send + Sync {
    /// Key into the command metadata registry
    fn command_type(&self) -> &str;

    /// Run the command
    ///
    /// `cancel` fires when the command timed out or the playback was
    /// stopped; long-running commands should return promptly once it does.
    async fn execute(&self, ctx: &CommandContext, cancel: CancellationToken)
        -> Result<(), CommandError>;

    /// Flow-control capability, if the command has one
    fn as_structured(&self) -> Option<&dyn StructuredCommand> {
        None
    }
}

/// A command that reports a full [`CommandResult`], including a flow action
#[async_trait]
pub trait StructuredCommand: Send + Sync {
    async fn execute_with_result(
        &self,
        ctx: &CommandContext,
        cancel: CancellationToken,
    ) -> Result<CommandResult, CommandError>;
}

/// Dispatch a command through its richest interface
///
/// A structured result with `success == false` comes back as an error so
/// the retry and recovery pipeline sees every failure the same way.
pub(crate) async fn dispatch(
    command: &dyn Command,
    ctx: &CommandContext,
    cancel: CancellationToken,
) -> Result<CommandResult, CommandError> {
    match command.as_structured() {
        Some(structured) => {
            let result = structured.execute_with_result(ctx, cancel).await?;
            if result.success {
                Ok(result)
            } else {
                Err(match result.error {
                    Some(error) => error.into(),
                    None => CommandError::Other(anyhow::anyhow!(
                        "{} reported failure without an error",
                        command.command_type()
                    )),
                })
            }
        }
        None => {
            command.execute(ctx, cancel).await?;
            Ok(CommandResult::ok())
        }
    }
}

/// What a command sees of the playback it runs in
#[derive(Clone)]
pub struct CommandContext {
    context: Arc<RwLock<ExecutionContext>>,
    bus: SharedEventBus,
    run: Context,
    line_index: usize,
    script_name: String,
}

impl CommandContext {
    pub fn new(
        context: Arc<RwLock<ExecutionContext>>,
        bus: SharedEventBus,
        run: Context,
        line_index: usize,
        script_name: impl Into<String>,
    ) -> Self {
        Self {
            context,
            bus,
            run,
            line_index,
            script_name: script_name.into(),
        }
    }

    /// A context backed by a fresh execution context and event bus
    pub fn detached(script_name: impl Into<String>, line_index: usize) -> Self {
        Self::new(
            Arc::new(RwLock::new(ExecutionContext::new())),
            Arc::new(EventBus::new()),
            Context::new(),
            line_index,
            script_name,
        )
    }

    pub fn line_index(&self) -> usize {
        self.line_index
    }

    pub fn script_name(&self) -> &str {
        &self.script_name
    }

    /// Context of the playback run
    pub fn run_context(&self) -> &Context {
        &self.run
    }

    pub fn event_bus(&self) -> &SharedEventBus {
        &self.bus
    }

    pub fn variable(&self, name: &str) -> Option<Value> {
        self.context.read().unwrap().variable(name).cloned()
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        set_variable(&self.context, &self.bus, &self.run, name.into(), value);
    }

    pub fn clear_variables(&self) {
        clear_variables(&self.context, &self.bus, &self.run);
    }

    pub fn label_index(&self, name: &str) -> Option<usize> {
        self.context.read().unwrap().label_index(name)
    }

    pub fn line_count(&self) -> usize {
        self.context.read().unwrap().line_count()
    }

    pub fn is_step_mode(&self) -> bool {
        self.context.read().unwrap().is_step_mode()
    }

    /// Push a frame that a later `Return` resumes at
    pub fn push_return_frame(&self, return_line_index: usize) {
        self.context
            .write()
            .unwrap()
            .push_frame(Frame::new(return_line_index));
    }
}

pub(crate) fn set_variable(
    context: &RwLock<ExecutionContext>,
    bus: &EventBus,
    run: &Context,
    name: String,
    value: Value,
) {
    context
        .write()
        .unwrap()
        .set_variable(name.clone(), value.clone());
    bus.publish(
        EngineEvent::VariableChanged {
            name,
            value: Some(value),
        },
        run,
    );
}

pub(crate) fn clear_variables(context: &RwLock<ExecutionContext>, bus: &EventBus, run: &Context) {
    let removed = context.write().unwrap().clear_variables();
    for name in removed {
        bus.publish(EngineEvent::VariableChanged { name, value: None }, run);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sp_core::{ErrorCategory, EventKind, FlowAction};

    struct Noop;

    #[async_trait]
    impl Command for Noop {
        fn command_type(&self) -> &str {
            "noop"
        }

        async fn execute(
            &self,
            _ctx: &CommandContext,
            _cancel: CancellationToken,
        ) -> Result<(), CommandError> {
            Ok(())
        }
    }

    struct Reporter(CommandResult);

    #[async_trait]
    impl Command for Reporter {
        fn command_type(&self) -> &str {
            "reporter"
        }

        async fn execute(
            &self,
            _ctx: &CommandContext,
            _cancel: CancellationToken,
        ) -> Result<(), CommandError> {
            Err(CommandError::Unimplemented("use the structured path".into()))
        }

        fn as_structured(&self) -> Option<&dyn StructuredCommand> {
            Some(self)
        }
    }

    #[async_trait]
    impl StructuredCommand for Reporter {
        async fn execute_with_result(
            &self,
            _ctx: &CommandContext,
            _cancel: CancellationToken,
        ) -> Result<CommandResult, CommandError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn test_dispatch_plain_command() {
        let ctx = CommandContext::detached("test", 0);
        let result = dispatch(&Noop, &ctx, CancellationToken::new()).await.unwrap();
        assert_eq!(result, CommandResult::ok());
    }

    #[tokio::test]
    async fn test_dispatch_prefers_structured() {
        let ctx = CommandContext::detached("test", 0);
        let command = Reporter(CommandResult::flow(FlowAction::JumpToLine(4)));
        let result = dispatch(&command, &ctx, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.flow, FlowAction::JumpToLine(4));
    }

    #[tokio::test]
    async fn test_dispatch_failed_result_becomes_error() {
        let ctx = CommandContext::detached("test", 0);
        let command = Reporter(CommandResult::failed(ScriptExecutionError::validation(
            "bad input",
        )));

        match dispatch(&command, &ctx, CancellationToken::new()).await {
            Err(CommandError::Reported(error)) => {
                assert_eq!(error.category, ErrorCategory::Validation)
            }
            other => panic!("expected reported error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_variables_publish_changes() {
        let ctx = CommandContext::detached("test", 2);
        let mut rx = ctx.event_bus().subscribe(EventKind::VariableChanged);

        ctx.set_variable("name", json!("Ada"));
        assert_eq!(ctx.variable("name"), Some(json!("Ada")));

        ctx.clear_variables();
        assert!(ctx.variable("name").is_none());

        let set = rx.recv().await.unwrap();
        assert_eq!(
            set.data,
            EngineEvent::VariableChanged {
                name: "name".into(),
                value: Some(json!("Ada"))
            }
        );
        let cleared = rx.recv().await.unwrap();
        assert_eq!(
            cleared.data,
            EngineEvent::VariableChanged {
                name: "name".into(),
                value: None
            }
        );
    }
}
