//! Script player
//!
//! Plays a script from a directory of `.script` files, printing narrative
//! lines to stdout. Ctrl-C stops the playback; saved snapshots can be resumed
//! with `--resume`.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::Parser;
use sp_config::EngineConfig;
use sp_core::ExecutionOutcome;
use sp_engine::{
    CommandError, FileScriptLoader, ScriptEngine, ScriptLoader, TextPresenter, TracingMetricsSink,
};
use sp_storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "scriptplay", version, about = "Play line-based scripts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, clap::Subcommand)]
enum Commands {
    /// Play a script by name
    Run(RunArgs),
}

#[derive(Debug, clap::Args)]
struct RunArgs {
    /// Script name, without the extension
    name: String,

    /// Directory holding the scripts
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Engine configuration file (YAML)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Playback speed multiplier
    #[arg(long)]
    speed: Option<f64>,

    /// Keep going past lines that fail
    #[arg(long)]
    continue_on_error: bool,

    /// Resume from a saved snapshot key
    #[arg(long)]
    resume: Option<String>,
}

/// Prints narrative lines to stdout
struct StdoutPresenter;

#[async_trait]
impl TextPresenter for StdoutPresenter {
    async fn present(&self, text: &str, _cancel: CancellationToken) -> Result<(), CommandError> {
        println!("{}", text);
        Ok(())
    }
}

fn load_engine_config(args: &RunArgs) -> Result<EngineConfig> {
    let mut config = match &args.config {
        Some(path) => sp_config::load_config(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if args.continue_on_error {
        config.errors.continue_on_error = true;
    }
    if let Some(speed) = args.speed {
        config.playback.playback_speed = speed;
    }
    config.validate()?;
    Ok(config)
}

async fn run(args: RunArgs) -> Result<ExecutionOutcome> {
    let config = load_engine_config(&args)?;
    let loader = Arc::new(FileScriptLoader::with_builtins(&args.root));
    let storage = Arc::new(Storage::new(args.root.join(".storage")));

    let engine = ScriptEngine::builder(config)
        .with_loader(loader.clone())
        .with_persistence(storage)
        .with_text_presenter(Arc::new(StdoutPresenter))
        .with_metrics(Arc::new(TracingMetricsSink))
        .build();

    // Ctrl-C stops the playback; the run still returns its result
    let stopper = engine.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, stopping playback");
            stopper.stop();
        }
    });

    let result = match &args.resume {
        Some(key) => {
            let snapshot = engine.load_snapshot(key).await?;
            info!(key = %key, script = %snapshot.script_name, cursor = snapshot.cursor, "Resuming");
            let script = loader.load_script(&snapshot.script_name).await?;
            engine.play_from_state(script, snapshot).await?
        }
        None => {
            let script = loader.load_script(&args.name).await?;
            engine.play(script).await?
        }
    };

    info!(
        script = %result.script_name,
        outcome = ?result.outcome,
        lines = result.lines_executed,
        commands = result.commands_executed,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "Playback finished"
    );
    if let Some(error) = &result.error {
        eprintln!(
            "error at line {}: {}",
            result.line_index.map_or_else(|| "?".to_string(), |i| i.to_string()),
            error.message
        );
    }
    println!("{}", serde_json::to_string_pretty(&result)?);

    engine.shutdown().await;
    Ok(result.outcome)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run(args) => {
            let outcome = run(args).await?;
            if outcome == ExecutionOutcome::Failure {
                bail!("playback failed");
            }
        }
    }
    Ok(())
}
