//! Built-in commands
//!
//! A small command set that makes the text format usable on its own:
//! variables, jumps, subroutines, stop, wait, log and script hand-off.

use async_trait::async_trait;
use serde_json::Value;
use sp_core::{CommandResult, FlowAction, JumpTarget};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::command::{Command, CommandContext, CommandError, StructuredCommand};

/// `@set name = value`
///
/// The value is parsed as JSON, falling back to a plain string.
#[derive(Debug, Clone, PartialEq)]
pub struct SetVariable {
    pub name: String,
    pub value: Value,
}

impl SetVariable {
    pub fn parse(args: &str) -> Result<Self, String> {
        let (name, value) = args
            .split_once('=')
            .ok_or_else(|| format!("expected 'name = value', got '{}'", args))?;
        let name = name.trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return Err(format!("invalid variable name '{}'", name));
        }
        let value = value.trim();
        let value =
            serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        Ok(Self {
            name: name.to_string(),
            value,
        })
    }
}

#[async_trait]
impl Command for SetVariable {
    fn command_type(&self) -> &str {
        "set"
    }

    async fn execute(
        &self,
        ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        ctx.set_variable(self.name.clone(), self.value.clone());
        Ok(())
    }
}

/// `@clear`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearVariables;

#[async_trait]
impl Command for ClearVariables {
    fn command_type(&self) -> &str {
        "clear"
    }

    async fn execute(
        &self,
        ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        ctx.clear_variables();
        Ok(())
    }
}

/// `@jump #label` or `@jump 12`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Jump {
    pub target: JumpTarget,
}

impl Jump {
    pub fn parse(args: &str) -> Result<Self, String> {
        parse_target(args).map(|target| Self { target })
    }
}

fn parse_target(args: &str) -> Result<JumpTarget, String> {
    let args = args.trim();
    if let Some(label) = args.strip_prefix(sp_core::LABEL_MARKER) {
        let label = label.trim();
        if label.is_empty() {
            return Err("label name is empty".to_string());
        }
        return Ok(JumpTarget::Label(label.to_string()));
    }
    args.parse::<usize>()
        .map(JumpTarget::Line)
        .map_err(|_| format!("expected '#label' or a line number, got '{}'", args))
}

#[async_trait]
impl Command for Jump {
    fn command_type(&self) -> &str {
        "jump"
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
impl StructuredCommand for Jump {
    async fn execute_with_result(
        &self,
        _ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        Ok(CommandResult::flow(self.target.clone().into()))
    }
}

/// `@gosub #label`: jump to a label and come back on `@return`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Gosub {
    pub label: String,
}

impl Gosub {
    pub fn parse(args: &str) -> Result<Self, String> {
        match parse_target(args)? {
            JumpTarget::Label(label) => Ok(Self { label }),
            JumpTarget::Line(_) => Err("gosub needs a '#label' target".to_string()),
        }
    }
}

#[async_trait]
impl Command for Gosub {
    fn command_type(&self) -> &str {
        "gosub"
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
impl StructuredCommand for Gosub {
    async fn execute_with_result(
        &self,
        ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        // Check first so a bad target leaves the call stack alone
        if ctx.label_index(&self.label).is_none() {
            return Err(CommandError::InvalidArgument(format!(
                "label not found: {}",
                self.label
            )));
        }
        ctx.push_return_frame(ctx.line_index() + 1);
        Ok(CommandResult::flow(FlowAction::JumpToLabel(self.label.clone())))
    }
}

/// `@return`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Return;

#[async_trait]
impl Command for Return {
    fn command_type(&self) -> &str {
        "return"
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
impl StructuredCommand for Return {
    async fn execute_with_result(
        &self,
        _ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        Ok(CommandResult::flow(FlowAction::Return))
    }
}

/// `@stop [reason]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stop {
    pub reason: String,
}

impl Stop {
    pub fn parse(args: &str) -> Self {
        let reason = args.trim();
        Self {
            reason: if reason.is_empty() {
                "stopped by script".to_string()
            } else {
                reason.to_string()
            },
        }
    }
}

#[async_trait]
impl Command for Stop {
    fn command_type(&self) -> &str {
        "stop"
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
impl StructuredCommand for Stop {
    async fn execute_with_result(
        &self,
        _ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        Ok(CommandResult::flow(FlowAction::Stop(self.reason.clone())))
    }
}

/// `@wait <ms>`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    pub duration: Duration,
}

impl Wait {
    pub fn parse(args: &str) -> Result<Self, String> {
        let millis: u64 = args
            .trim()
            .parse()
            .map_err(|_| format!("expected milliseconds, got '{}'", args.trim()))?;
        Ok(Self {
            duration: Duration::from_millis(millis),
        })
    }
}

#[async_trait]
impl Command for Wait {
    fn command_type(&self) -> &str {
        "wait"
    }

    async fn execute(
        &self,
        _ctx: &CommandContext,
        cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        tokio::select! {
            _ = tokio::time::sleep(self.duration) => Ok(()),
            _ = cancel.cancelled() => Err(CommandError::Cancelled),
        }
    }
}

/// `@log text`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub message: String,
}

#[async_trait]
impl Command for Log {
    fn command_type(&self) -> &str {
        "log"
    }

    async fn execute(
        &self,
        ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<(), CommandError> {
        info!(script = %ctx.script_name(), line = ctx.line_index(), "{}", self.message);
        Ok(())
    }
}

/// `@call <script>`: continue in another script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallScript {
    pub script: String,
}

impl CallScript {
    pub fn parse(args: &str) -> Result<Self, String> {
        let script = args.trim();
        if script.is_empty() || script.contains(char::is_whitespace) {
            return Err(format!("expected a script name, got '{}'", script));
        }
        Ok(Self {
            script: script.to_string(),
        })
    }
}

#[async_trait]
impl Command for CallScript {
    fn command_type(&self) -> &str {
        "call"
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
impl StructuredCommand for CallScript {
    async fn execute_with_result(
        &self,
        _ctx: &CommandContext,
        _cancel: CancellationToken,
    ) -> Result<CommandResult, CommandError> {
        Ok(CommandResult::flow(FlowAction::CallScript(self.script.clone())))
    }
}
