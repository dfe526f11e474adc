//! Flow control resolver
//!
//! Applies a command's [`FlowAction`] to the execution context. Invalid
//! targets leave the cursor where it was.

use sp_core::{FlowAction, ScriptExecutionError};
use tracing::trace;

use crate::context::ExecutionContext;

/// What the engine does after a flow action was applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowOutcome {
    /// No redirection; the engine advances the cursor by one
    Advance,
    /// The cursor was moved to this line
    Jumped(usize),
    /// A frame was popped and the cursor moved to its return line
    Returned(usize),
    Stop(String),
    /// Return with an empty call stack
    Completed,
    /// The engine must load and switch to this script
    CallScript(String),
}

pub struct FlowControlResolver;

impl FlowControlResolver {
    pub fn resolve(
        ctx: &mut ExecutionContext,
        action: &FlowAction,
    ) -> Result<FlowOutcome, ScriptExecutionError> {
        trace!(%action, cursor = ctx.cursor(), "Resolving flow action");

        match action {
            FlowAction::Continue => Ok(FlowOutcome::Advance),
            FlowAction::JumpToLine(index) => {
                let len = ctx.line_count();
                if *index >= len {
                    return Err(ScriptExecutionError::validation(format!(
                        "jump target line {} is out of range (script has {} lines)",
                        index, len
                    ))
                    .with_context("target", index.to_string()));
                }
                ctx.set_cursor(*index);
                Ok(FlowOutcome::Jumped(*index))
            }
            FlowAction::JumpToLabel(label) => match ctx.label_index(label) {
                Some(index) => {
                    ctx.set_cursor(index);
                    Ok(FlowOutcome::Jumped(index))
                }
                None => Err(ScriptExecutionError::validation(format!(
                    "label not found: {}",
                    label
                ))
                .with_context("label", label.clone())),
            },
            FlowAction::Stop(reason) => Ok(FlowOutcome::Stop(reason.clone())),
            FlowAction::Return => match ctx.pop_frame() {
                Some(frame) => {
                    ctx.set_cursor(frame.return_line_index);
                    Ok(FlowOutcome::Returned(frame.return_line_index))
                }
                None => {
                    ctx.set_cursor(ctx.line_count());
                    Ok(FlowOutcome::Completed)
                }
            },
            FlowAction::CallScript(name) => Ok(FlowOutcome::CallScript(name.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocess::preprocess;
    use crate::script::{Line, Script};
    use sp_core::{ErrorCategory, Frame};
    use std::sync::Arc;

    fn context() -> ExecutionContext {
        let script = Arc::new(Script::new(
            "flow",
            vec![
                Line::text("#top"),
                Line::text("one"),
                Line::text("two"),
                Line::text("#bottom"),
            ],
        ));
        let mut ctx = ExecutionContext::new();
        ctx.reset_for(script.clone());
        ctx.set_labels(preprocess(&script).labels);
        ctx.set_cursor(1);
        ctx
    }

    #[test]
    fn test_continue_does_not_move() {
        let mut ctx = context();
        let outcome = FlowControlResolver::resolve(&mut ctx, &FlowAction::Continue).unwrap();
        assert_eq!(outcome, FlowOutcome::Advance);
        assert_eq!(ctx.cursor(), 1);
    }

    #[test]
    fn test_jump_to_label() {
        let mut ctx = context();
        let outcome =
            FlowControlResolver::resolve(&mut ctx, &FlowAction::JumpToLabel("bottom".into()))
                .unwrap();
        assert_eq!(outcome, FlowOutcome::Jumped(3));
        assert_eq!(ctx.cursor(), 3);
    }

    #[test]
    fn test_unknown_label_keeps_cursor() {
        let mut ctx = context();
        let err = FlowControlResolver::resolve(&mut ctx, &FlowAction::JumpToLabel("nowhere".into()))
            .unwrap_err();
        assert_eq!(err.category, ErrorCategory::Validation);
        assert!(err.message.contains("nowhere"));
        assert_eq!(ctx.cursor(), 1);
    }

    #[test]
    fn test_jump_to_line_range() {
        let mut ctx = context();
        assert_eq!(
            FlowControlResolver::resolve(&mut ctx, &FlowAction::JumpToLine(0)).unwrap(),
            FlowOutcome::Jumped(0)
        );
        assert!(FlowControlResolver::resolve(&mut ctx, &FlowAction::JumpToLine(4)).is_err());
        assert_eq!(ctx.cursor(), 0);
    }

    #[test]
    fn test_return_pops_or_completes() {
        let mut ctx = context();
        ctx.push_frame(Frame::new(2));

        assert_eq!(
            FlowControlResolver::resolve(&mut ctx, &FlowAction::Return).unwrap(),
            FlowOutcome::Returned(2)
        );
        assert_eq!(ctx.cursor(), 2);

        assert_eq!(
            FlowControlResolver::resolve(&mut ctx, &FlowAction::Return).unwrap(),
            FlowOutcome::Completed
        );
        assert!(!ctx.can_continue());
    }

    #[test]
    fn test_stop_and_call_script_pass_through() {
        let mut ctx = context();
        assert_eq!(
            FlowControlResolver::resolve(&mut ctx, &FlowAction::Stop("done".into())).unwrap(),
            FlowOutcome::Stop("done".into())
        );
        assert_eq!(
            FlowControlResolver::resolve(&mut ctx, &FlowAction::CallScript("next".into()))
                .unwrap(),
            FlowOutcome::CallScript("next".into())
        );
        assert_eq!(ctx.cursor(), 1);
    }
}
