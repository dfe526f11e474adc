//! YAML configuration loader with custom tag support
//!
//! Supported tags:
//! - `!include path` - Include another YAML file (relative to the including file)
//! - `!env_var VAR` or `!env_var "VAR default"` - Environment variable substitution

use crate::engine_config::EngineConfig;
use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// YAML loader that resolves custom tags before deserializing
pub struct YamlLoader {
    /// Base directory for resolving relative paths
    config_dir: PathBuf,
    /// Track included files to detect circular includes
    include_stack: HashSet<PathBuf>,
}

impl YamlLoader {
    /// Create a new YAML loader for the given config directory
    pub fn new(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
            include_stack: HashSet::new(),
        }
    }

    /// Load and process a YAML file
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.resolve_path(path.as_ref());
        debug!("Loading YAML file: {:?}", path);

        if self.include_stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }

        let content = fs::read_to_string(&path).map_err(|e| ConfigError::ReadFile {
            path: path.clone(),
            source: e,
        })?;

        self.include_stack.insert(path.clone());
        let result = self.load_string(&content, &path);
        self.include_stack.remove(&path);

        result
    }

    /// Load and process YAML from a string
    pub fn load_string(&mut self, content: &str, source_path: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseYaml {
            path: source_path.to_path_buf(),
            source: e,
        })?;

        self.process_value(value, source_path)
    }

    fn process_value(&mut self, value: Value, source_path: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => self.process_tagged(*tagged, source_path),
            Value::Mapping(map) => {
                let mut result = serde_yaml::Mapping::new();
                for (k, v) in map {
                    let processed_value = self.process_value(v, source_path)?;
                    result.insert(k, processed_value);
                }
                Ok(Value::Mapping(result))
            }
            Value::Sequence(seq) => {
                let result: ConfigResult<Vec<Value>> = seq
                    .into_iter()
                    .map(|v| self.process_value(v, source_path))
                    .collect();
                Ok(Value::Sequence(result?))
            }
            _ => Ok(value),
        }
    }

    fn process_tagged(
        &mut self,
        tagged: serde_yaml::value::TaggedValue,
        source_path: &Path,
    ) -> ConfigResult<Value> {
        let tag = tagged.tag.to_string();
        let value = tagged.value;

        trace!("Processing tag '{}' with value {:?}", tag, value);

        match tag.as_str() {
            "!include" => {
                let include_path = self.value_to_path(&value, source_path)?;
                debug!("Including file: {:?}", include_path);
                self.load_file(&include_path)
            }
            "!env_var" => self.process_env_var(value),
            // Unknown tags carry enum variants, e.g. `on_error: !jump {label: x}`
            _ => {
                let processed = self.process_value(value, source_path)?;
                Ok(Value::Tagged(Box::new(serde_yaml::value::TaggedValue {
                    tag: tagged.tag,
                    value: processed,
                })))
            }
        }
    }

    /// `!env_var NAME` or `!env_var "NAME fallback"`
    fn process_env_var(&self, value: Value) -> ConfigResult<Value> {
        let reference = match value {
            Value::String(s) => s,
            _ => {
                return Err(ConfigError::InvalidValue {
                    key: "!env_var".to_string(),
                    reason: "environment variable name must be a string".to_string(),
                })
            }
        };

        let (var_name, fallback) = match reference.split_once(char::is_whitespace) {
            Some((name, default)) => (name.to_string(), Some(default.trim().to_string())),
            None => (reference, None),
        };

        let env_value = match (std::env::var(&var_name), fallback) {
            (Ok(v), _) => v,
            (Err(_), Some(default)) => default,
            (Err(_), None) => return Err(ConfigError::EnvVarNotFound { var: var_name }),
        };

        debug!("Substituted env var: {}", var_name);
        // Re-parse so numbers and booleans keep their type
        Ok(serde_yaml::from_str(&env_value).unwrap_or(Value::String(env_value)))
    }

    fn value_to_path(&self, value: &Value, source_path: &Path) -> ConfigResult<PathBuf> {
        let path_str = match value {
            Value::String(s) => s.clone(),
            _ => {
                return Err(ConfigError::InvalidIncludePath {
                    path: format!("{:?}", value),
                    reason: "path must be a string".to_string(),
                })
            }
        };

        let base_dir = source_path.parent().unwrap_or(&self.config_dir);
        let resolved = if Path::new(&path_str).is_absolute() {
            PathBuf::from(&path_str)
        } else {
            base_dir.join(&path_str)
        };

        Ok(resolved)
    }

    fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }
}

/// Load an engine configuration file and validate it
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<EngineConfig> {
    let path = path.as_ref();
    let config_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let mut loader = YamlLoader::new(config_dir);
    let value = loader.load_file(path)?;
    from_value(value, path)
}

/// Parse an engine configuration from YAML text and validate it
pub fn from_yaml_str(content: &str) -> ConfigResult<EngineConfig> {
    let source = Path::new("<inline>");
    let mut loader = YamlLoader::new(".");
    let value = loader.load_string(content, source)?;
    from_value(value, source)
}

fn from_value(value: Value, source: &Path) -> ConfigResult<EngineConfig> {
    // An empty document means "all defaults"
    let value = if value.is_null() {
        Value::Mapping(serde_yaml::Mapping::new())
    } else {
        value
    };

    let config: EngineConfig =
        serde_yaml::from_value(value).map_err(|e| ConfigError::ParseYaml {
            path: source.to_path_buf(),
            source: e,
        })?;
    config.validate()?;
    Ok(config)
}
