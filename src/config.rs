//! User configuration stored at `~/.hnk/config.json`.
//!
//! Every field is optional in the file. Loading never fails: a missing or
//! unreadable file yields [`Config::default`], with a warning for the latter.

use crate::cache::DEFAULT_MAX_BYTES;
use error_set::error_set;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Environment variable that overrides [`Config::claude_bin`]
pub const CLAUDE_BIN_ENV: &str = "HNK_CLAUDE_BIN";

const CONFIG_DIR: &str = ".hnk";
const CONFIG_FILE: &str = "config.json";
const CACHE_FILE: &str = "cache.json";

error_set! {
    /// Errors from reading or writing the configuration file
    ConfigError := {
        #[display("Failed to read config {path}: {message}")]
        Read { path: String, message: String },
        #[display("Invalid config {path}: {message}")]
        Parse { path: String, message: String },
        #[display("Failed to write config {path}: {message}")]
        Write { path: String, message: String },
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model name passed to the analyzer
    pub model: String,
    /// Cache budget in MiB; zero or negative selects the default
    pub cache_size_mb: i64,
    /// Per-request analyzer timeout
    pub timeout_secs: u64,
    /// Analyzer executable
    pub claude_bin: String,
    pub line_numbers: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "sonnet".to_string(),
            cache_size_mb: 5,
            timeout_secs: 120,
            claude_bin: "claude".to_string(),
            line_numbers: true,
        }
    }
}

/// `~/.hnk`, or `None` without a home directory
pub fn config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR))
}

impl Config {
    /// Load from the default location, then apply environment overrides
    pub fn load() -> Self {
        let config = match config_dir() {
            Some(dir) => Self::load_from(&dir.join(CONFIG_FILE)),
            None => Self::default(),
        };
        config.with_claude_bin_override(std::env::var(CLAUDE_BIN_ENV).ok())
    }

    /// Load from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match Self::read(path) {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(err) => {
                log::warn!("{err}; using defaults");
                Self::default()
            }
        }
    }

    /// Read `path`; `Ok(None)` when it does not exist
    pub fn read(path: &Path) -> Result<Option<Self>, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    message: e.to_string(),
                });
            }
        };

        serde_json::from_str(&data)
            .map(Some)
            .map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }

    /// Write to the default location
    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_dir()
            .map(|dir| dir.join(CONFIG_FILE))
            .ok_or_else(|| ConfigError::Write {
                path: format!("~/{CONFIG_DIR}/{CONFIG_FILE}"),
                message: "no home directory".to_string(),
            })?;
        self.save_to(&path)
    }

    /// Write as pretty JSON, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let write_error = |message: String| ConfigError::Write {
            path: path.display().to_string(),
            message,
        };

        let data = serde_json::to_string_pretty(self).map_err(|e| write_error(e.to_string()))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
        }
        fs::write(path, data + "\n").map_err(|e| write_error(e.to_string()))
    }

    /// Replace the analyzer executable when `value` is set and non-empty
    #[must_use]
    pub fn with_claude_bin_override(mut self, value: Option<String>) -> Self {
        if let Some(bin) = value.filter(|bin| !bin.trim().is_empty()) {
            self.claude_bin = bin;
        }
        self
    }

    pub fn cache_size_bytes(&self) -> usize {
        usize::try_from(self.cache_size_mb)
            .ok()
            .filter(|&mb| mb > 0)
            .and_then(|mb| mb.checked_mul(1024 * 1024))
            .unwrap_or(DEFAULT_MAX_BYTES)
    }

    /// `~/.hnk/cache.json`, or `None` without a home directory
    pub fn cache_path(&self) -> Option<PathBuf> {
        config_dir().map(|dir| dir.join(CACHE_FILE))
    }
}
