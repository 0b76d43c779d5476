//! Layered configuration
//!
//! Settings are merged from, lowest precedence first:
//! 1. Built-in defaults
//! 2. User config (`~/.config/tap-on-save/config.toml`)
//! 3. Project config (`.tap-on-save.toml`, or an explicit `--config` path)
//! 4. CLI flags
//!
//! Missing default-location files are skipped; an explicit path must exist.

mod merge;

pub use merge::{merge_layers, merge_values};

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use toml::Value;

use crate::discovery::DEFAULT_TEST_DIR_NAME;
use crate::timeout::{TimeoutConfig, TimeoutValidationError};

/// Test command used when nothing else is configured.
pub const DEFAULT_COMMAND: &str = "mocha -R tap --compilers coffee:coffee-script";

/// Project config file name, looked up in the current directory.
pub const PROJECT_CONFIG_FILE: &str = ".tap-on-save.toml";

/// Errors that can occur when loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse TOML in {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Schema(#[from] toml::de::Error),

    #[error("Config file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error(transparent)]
    Timeout(#[from] TimeoutValidationError),
}

/// Where a layer came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigOrigin {
    Builtin,
    User,
    Project,
    Cli,
}

/// A contributing layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigSource {
    pub origin: ConfigOrigin,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// File watcher settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WatchSettings {
    /// Glob patterns (relative to the watch root) that count as source files
    pub patterns: Vec<String>,

    /// Delay between filesystem scans
    pub interval_ms: u64,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            patterns: vec!["**/*.js".to_string(), "**/*.coffee".to_string()],
            interval_ms: 250,
        }
    }
}

/// Fully resolved settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Shell command that prints TAP on stdout
    pub command: String,

    /// Directory name that marks where tests live
    pub test_dir_name: String,

    /// Wall-clock limit per run (default: 10)
    pub timeout_seconds: u64,

    /// SIGTERM → SIGKILL grace period (default: 2000)
    pub termination_grace_ms: u64,

    /// Interval between supervisor polls (default: 20)
    pub poll_interval_ms: u64,

    /// Status key handed to the sink
    pub status_key: String,

    /// Output panel name handed to the sink
    pub panel_name: String,

    pub watch: WatchSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            command: DEFAULT_COMMAND.to_string(),
            test_dir_name: DEFAULT_TEST_DIR_NAME.to_string(),
            timeout_seconds: TimeoutConfig::default().overall_seconds,
            termination_grace_ms: TimeoutConfig::default().termination_grace_ms,
            poll_interval_ms: 20,
            status_key: "Mocha".to_string(),
            panel_name: "run_mocha".to_string(),
            watch: WatchSettings::default(),
        }
    }
}

impl Settings {
    /// Parse a single TOML document on top of the defaults
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let overlay: toml::Table = toml::from_str(content)?;
        let loaded = Self::from_layers(vec![Value::Table(overlay)])?;
        Ok(loaded)
    }

    /// Merge `layers` above the defaults, deserialize and validate.
    pub fn from_layers(layers: Vec<Value>) -> Result<Self, ConfigError> {
        let defaults = Value::try_from(Settings::default()).map_err(|e| ConfigError::Invalid {
            field: "defaults",
            reason: e.to_string(),
        })?;

        let merged = merge_layers(std::iter::once(defaults).chain(layers));
        let settings = merged.try_into::<Settings>()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.command.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "command",
                reason: "must not be empty".to_string(),
            });
        }

        if self.test_dir_name.is_empty() || self.test_dir_name.contains(['/', '\\']) {
            return Err(ConfigError::Invalid {
                field: "test_dir_name",
                reason: format!("must be a plain directory name, got '{}'", self.test_dir_name),
            });
        }

        if self.poll_interval_ms == 0 || self.poll_interval_ms > 1000 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: format!("must be in (0, 1000], got {}", self.poll_interval_ms),
            });
        }

        if self.watch.interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "watch.interval_ms",
                reason: "must be greater than 0".to_string(),
            });
        }

        self.timeout().validate()?;
        Ok(())
    }

    pub fn timeout(&self) -> TimeoutConfig {
        TimeoutConfig {
            overall_seconds: self.timeout_seconds,
            termination_grace_ms: self.termination_grace_ms,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch.interval_ms)
    }

    /// Render as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// CLI-level overrides (layer 4)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub command: Option<String>,
    pub test_dir_name: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl CliOverrides {
    fn to_value(&self) -> Value {
        let mut table = toml::Table::new();
        if let Some(ref command) = self.command {
            table.insert("command".to_string(), Value::String(command.clone()));
        }
        if let Some(ref name) = self.test_dir_name {
            table.insert("test_dir_name".to_string(), Value::String(name.clone()));
        }
        if let Some(secs) = self.timeout_seconds {
            // Values past i64::MAX fail range validation anyway.
            let secs = i64::try_from(secs).unwrap_or(i64::MAX);
            table.insert("timeout_seconds".to_string(), Value::Integer(secs));
        }
        Value::Table(table)
    }

    fn is_empty(&self) -> bool {
        self.command.is_none() && self.test_dir_name.is_none() && self.timeout_seconds.is_none()
    }
}

/// Settings plus the layers that produced them
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub settings: Settings,
    pub sources: Vec<ConfigSource>,
}

/// Default user config location
pub fn user_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".config/tap-on-save/config.toml"))
}

/// Load all layers.
///
/// `project_path` overrides the project-file lookup and must exist when given.
pub fn load(
    user_path: Option<&Path>,
    project_path: Option<&Path>,
    overrides: &CliOverrides,
) -> Result<LoadedConfig, ConfigError> {
    let mut layers = Vec::new();
    let mut sources = vec![ConfigSource {
        origin: ConfigOrigin::Builtin,
        path: None,
    }];

    if let Some(path) = user_path {
        if path.is_file() {
            layers.push(read_layer(path)?);
            sources.push(ConfigSource {
                origin: ConfigOrigin::User,
                path: Some(path.to_path_buf()),
            });
        }
    }

    match project_path {
        Some(path) => {
            if !path.is_file() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            layers.push(read_layer(path)?);
            sources.push(ConfigSource {
                origin: ConfigOrigin::Project,
                path: Some(path.to_path_buf()),
            });
        }
        None => {
            let path = Path::new(PROJECT_CONFIG_FILE);
            if path.is_file() {
                layers.push(read_layer(path)?);
                sources.push(ConfigSource {
                    origin: ConfigOrigin::Project,
                    path: Some(path.to_path_buf()),
                });
            }
        }
    }

    if !overrides.is_empty() {
        layers.push(overrides.to_value());
        sources.push(ConfigSource {
            origin: ConfigOrigin::Cli,
            path: None,
        });
    }

    let settings = Settings::from_layers(layers)?;
    Ok(LoadedConfig { settings, sources })
}

fn read_layer(path: &Path) -> Result<Value, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let table: toml::Table = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Value::Table(table))
}
