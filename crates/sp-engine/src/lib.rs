//! Script playback engine
//!
//! Plays line-based scripts: text lines are labels, comments or narrative,
//! command lines dispatch to [`Command`] implementations. The engine runs
//! one playback at a time through the state machine in `sp_core`, applies
//! per-command timeouts, retries and recovery, and publishes every step on
//! the event bus.
//!
//! # Key Types
//!
//! - [`ScriptEngine`] - Plays scripts and exposes the control API
//! - [`Script`] / [`Line`] - A parsed script
//! - [`Command`] / [`StructuredCommand`] - What command lines execute
//! - [`ScriptParser`] - Turns script text into a [`Script`]
//! - [`MetadataRegistry`] - Per command type timeout, retry and recovery policy
//! - [`TimeoutManager`] - Runs commands under their timeout and keeps stats
//! - [`RecoveryManager`] - Decides what happens to a failed line

pub mod builtin;
pub mod classify;
pub mod command;
pub mod context;
pub mod engine;
pub mod flow;
pub mod loader;
pub mod metadata;
pub mod metrics;
pub mod parser;
pub mod preprocess;
pub mod recovery;
pub mod script;
pub mod state;
pub mod timeout;

pub use classify::classify;
pub use command::{Command, CommandContext, CommandError, StructuredCommand};
pub use context::ExecutionContext;
pub use engine::{EngineBuilder, EngineError, EngineResult, ScriptEngine};
pub use flow::{FlowControlResolver, FlowOutcome};
pub use loader::{
    FileScriptLoader, LoaderError, ResourcePreloader, ScriptLoader, TextPresenter,
    SCRIPT_EXTENSION,
};
pub use metadata::{CommandMetadata, MetadataRegistry};
pub use metrics::{ExecutionSample, MemoryProbe, MemorySample, MetricsSink, TracingMetricsSink};
pub use parser::{CommandFactory, ScriptParser, COMMAND_MARKER};
pub use preprocess::{preprocess, PreprocessError, PreprocessReport};
pub use recovery::{RecoveryManager, RecoveryOutcome};
pub use script::{CommandLine, Line, Script, TextKind, TextLine};
pub use state::PlaybackStateManager;
pub use timeout::{CommandStats, HealthReport, TimeoutManager};
