//! YAML configuration loading for scriptplay
//!
//! The engine configuration covers playback pacing, autosave, the error
//! policy and per-command-type policies (timeouts, retries, backoff,
//! recovery). Files may use two custom tags:
//!
//! - `!include path` - Include another YAML file
//! - `!env_var VAR` - Environment variable substitution, with an optional fallback
//!
//! # Example
//!
//! ```ignore
//! use sp_config::load_config;
//!
//! let config = load_config("config/engine.yaml")?;
//! println!("continue on error: {}", config.errors.continue_on_error);
//! ```

mod engine_config;
mod error;
mod loader;

pub use engine_config::{
    is_valid_playback_speed, BackoffPolicy, CommandPolicy, CommandsConfig, EngineConfig,
    ErrorPolicyConfig, PerformanceConfig, PlaybackConfig, PLAYBACK_SPEED_RANGE,
};
pub use error::{ConfigError, ConfigResult};
pub use loader::{from_yaml_str, load_config, YamlLoader};
