//! Collaborators the engine consumes: script loading, resource preloading
//! and narrative presentation

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::CommandError;
use crate::parser::ScriptParser;
use crate::script::Script;

/// File extension of scripts loaded by [`FileScriptLoader`]
pub const SCRIPT_EXTENSION: &str = "script";

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("script not found: {name}")]
    NotFound { name: String },

    #[error("failed to parse script {name} at line {line}: {message}")]
    Parse {
        name: String,
        line: usize,
        message: String,
    },

    #[error("IO error loading script {name}: {source}")]
    Io {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// Loads scripts by name
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    async fn load_script(&self, name: &str) -> Result<Script, LoaderError>;
}

/// Warms up resources a script refers to before playback starts
///
/// Failures are logged and never stop the playback.
#[async_trait]
pub trait ResourcePreloader: Send + Sync {
    async fn preload(&self, script: &Script) -> anyhow::Result<()>;
}

/// Shows narrative text lines
#[async_trait]
pub trait TextPresenter: Send + Sync {
    async fn present(&self, text: &str, cancel: CancellationToken) -> Result<(), CommandError>;
}

/// Loads `<root>/<name>.script` and parses it
pub struct FileScriptLoader {
    root: PathBuf,
    parser: Arc<ScriptParser>,
}

impl FileScriptLoader {
    pub fn new(root: impl Into<PathBuf>, parser: Arc<ScriptParser>) -> Self {
        Self {
            root: root.into(),
            parser,
        }
    }

    /// Loader with the built-in command set
    pub fn with_builtins(root: impl Into<PathBuf>) -> Self {
        Self::new(root, Arc::new(ScriptParser::with_builtins()))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn script_path(&self, name: &str) -> Result<PathBuf, LoaderError> {
        let escapes = Path::new(name)
            .components()
            .any(|c| !matches!(c, std::path::Component::Normal(_)));
        if name.is_empty() || escapes {
            return Err(LoaderError::NotFound {
                name: name.to_string(),
            });
        }
        Ok(self.root.join(format!("{}.{}", name, SCRIPT_EXTENSION)))
    }
}

#[async_trait]
impl ScriptLoader for FileScriptLoader {
    async fn load_script(&self, name: &str) -> Result<Script, LoaderError> {
        let path = self.script_path(name)?;
        debug!("Loading script {} from {:?}", name, path);

        let source = match fs::read_to_string(&path).await {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(LoaderError::NotFound {
                    name: name.to_string(),
                })
            }
            Err(e) => {
                return Err(LoaderError::Io {
                    name: name.to_string(),
                    source: e,
                })
            }
        };

        self.parser.parse(name, &source)
    }
}
