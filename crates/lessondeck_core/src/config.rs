//! Engine configuration loaded from TOML.
//!
//! # Responsibility
//! - Describe tunables for storage, sync, logging and capture.
//! - Load and validate a config file; a missing file is not an error.
//!
//! # Invariants
//! - Every field has a default, so partial files are accepted.
//! - A validated config never has a zero quiet period, zero transaction
//!   timeout or empty palette.

use crate::capture::DEFAULT_PALETTE;
use crate::logging::parse_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_QUIET_PERIOD_MS: u64 = 1_000;
pub const DEFAULT_TRANSACTION_TIMEOUT_MS: u64 = 15_000;
pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;
pub const DEFAULT_LOG_LEVEL: &str = "info";
pub const DEFAULT_LOG_FILE_MB: u64 = 10;
pub const DEFAULT_LOG_KEEP_FILES: usize = 5;
pub const DEFAULT_PANIC_PAYLOAD_CHARS: usize = 160;

#[derive(Debug)]
pub enum ConfigError {
    Read {
        config_path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        config_path: PathBuf,
        source: toml::de::Error,
    },
    Serialize(toml::ser::Error),
    Write {
        config_path: PathBuf,
        source: std::io::Error,
    },
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Read {
                config_path,
                source,
            } => write!(
                f,
                "failed to read config file at {}: {source}",
                config_path.display()
            ),
            Self::Parse {
                config_path,
                source,
            } => write!(
                f,
                "failed to parse config file at {}: {source}",
                config_path.display()
            ),
            Self::Serialize(err) => write!(f, "failed to serialize config: {err}"),
            Self::Write {
                config_path,
                source,
            } => write!(
                f,
                "failed to write config file at {}: {source}",
                config_path.display()
            ),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Read { source, .. } | Self::Write { source, .. } => Some(source),
            Self::Parse { source, .. } => Some(source),
            Self::Serialize(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite file; `None` keeps the database in memory.
    pub db_path: Option<PathBuf>,
    pub transaction_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            transaction_timeout_ms: DEFAULT_TRANSACTION_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub quiet_period_ms: u64,
    pub broadcast_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: DEFAULT_QUIET_PERIOD_MS,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Absolute log directory; logging stays off when unset.
    pub dir: Option<PathBuf>,
    /// Rotation threshold per file.
    pub max_file_mb: u64,
    pub keep_files: usize,
    /// Cap on panic text written to the log. Zero omits the payload.
    pub panic_payload_chars: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            dir: None,
            max_file_mb: DEFAULT_LOG_FILE_MB,
            keep_files: DEFAULT_LOG_KEEP_FILES,
            panic_payload_chars: DEFAULT_PANIC_PAYLOAD_CHARS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub palette: Vec<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            palette: DEFAULT_PALETTE.iter().map(|c| c.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub storage: StorageConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
    pub capture: CaptureConfig,
}

impl EngineConfig {
    /// Loads a config file. Returns `Ok(None)` when the file does not exist.
    pub fn load_from_path(config_path: impl AsRef<Path>) -> Result<Option<Self>, ConfigError> {
        let config_path = config_path.as_ref();
        if !config_path.exists() {
            return Ok(None);
        }

        let content =
            std::fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
                config_path: config_path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml_str(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                config_path: config_path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(Some(config))
    }

    /// Parses and validates a config document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            config_path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to_path(&self, config_path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let config_path = config_path.as_ref();
        let write_err = |source| ConfigError::Write {
            config_path: config_path.to_path_buf(),
            source,
        };
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(config_path, content).map_err(write_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sync.quiet_period_ms == 0 {
            return Err(ConfigError::Invalid(
                "sync.quiet_period_ms must be greater than zero".to_string(),
            ));
        }
        if self.sync.broadcast_capacity == 0 {
            return Err(ConfigError::Invalid(
                "sync.broadcast_capacity must be greater than zero".to_string(),
            ));
        }
        if self.storage.transaction_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "storage.transaction_timeout_ms must be greater than zero".to_string(),
            ));
        }
        parse_level(&self.logging.level)
            .map_err(|err| ConfigError::Invalid(format!("logging.level: {err}")))?;
        if self.logging.max_file_mb == 0 || self.logging.keep_files == 0 {
            return Err(ConfigError::Invalid(
                "logging.max_file_mb and logging.keep_files must be greater than zero"
                    .to_string(),
            ));
        }
        if self
            .capture
            .palette
            .iter()
            .all(|color| color.trim().is_empty())
        {
            return Err(ConfigError::Invalid(
                "capture.palette must contain at least one color".to_string(),
            ));
        }
        Ok(())
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.sync.quiet_period_ms)
    }

    pub fn transaction_timeout(&self) -> Duration {
        Duration::from_millis(self.storage.transaction_timeout_ms)
    }

    /// Palette with blank entries removed.
    pub fn palette(&self) -> Vec<String> {
        self.capture
            .palette
            .iter()
            .map(|color| color.trim())
            .filter(|color| !color.is_empty())
            .map(str::to_string)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfigError, EngineConfig, DEFAULT_QUIET_PERIOD_MS};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = TempDir::new().unwrap();
        let loaded = EngineConfig::load_from_path(dir.path().join("absent.toml")).unwrap();
        assert!(loaded.is_none());
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let config = EngineConfig::from_toml_str(
            r##"
            [sync]
            quiet_period_ms = 250

            [capture]
            palette = ["#000000", " "]
            "##,
        )
        .unwrap();

        assert_eq!(config.quiet_period(), Duration::from_millis(250));
        assert_eq!(config.transaction_timeout(), Duration::from_secs(15));
        assert_eq!(config.palette(), vec!["#000000".to_string()]);
        assert!(config.storage.db_path.is_none());
    }

    #[test]
    fn zero_quiet_period_is_rejected() {
        let err = EngineConfig::from_toml_str("[sync]\nquiet_period_ms = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("quiet_period")));
    }

    #[test]
    fn empty_palette_is_rejected() {
        let err = EngineConfig::from_toml_str("[capture]\npalette = []\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let err = EngineConfig::from_toml_str("[logging]\nlevel = \"loud\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(message) if message.contains("logging.level")));

        let config = EngineConfig::from_toml_str("[logging]\nlevel = \"WARNING\"\n").unwrap();
        assert_eq!(config.logging.keep_files, 5);
    }

    #[test]
    fn parse_errors_carry_the_file_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("engine.toml");
        std::fs::write(&path, "[sync\n").unwrap();

        let err = EngineConfig::load_from_path(&path).unwrap_err();
        assert!(matches!(&err, ConfigError::Parse { config_path, .. } if config_path == &path));
    }

    #[test]
    fn saved_config_loads_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("engine.toml");
        let mut config = EngineConfig::default();
        config.sync.quiet_period_ms = DEFAULT_QUIET_PERIOD_MS * 2;
        config.save_to_path(&path).unwrap();

        let loaded = EngineConfig::load_from_path(&path).unwrap().unwrap();
        assert_eq!(loaded, config);
    }
}
