//! User configuration, persisted as TOML in `$XDG_CONFIG_HOME/crosswalk/config.toml`.
//!
//! Every field has a default, so a missing or partial file is fine. Command
//! line flags override whatever the file says.

use std::path::{Path, PathBuf};
use std::time::Duration;

use miette::Diagnostic;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from config operations.
#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(crosswalk::config::read),
        help("Ensure the config file is readable, or create one with `crosswalk config init`.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}: {message}")]
    #[diagnostic(
        code(crosswalk::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(crosswalk::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("config already exists: {path}")]
    #[diagnostic(
        code(crosswalk::config::exists),
        help("Edit the existing file, or pass --force to overwrite it.")
    )]
    AlreadyExists { path: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the document service.
    #[serde(default = "default_server_url")]
    pub server_url: String,
    /// Where exports are written. Defaults to `$XDG_DATA_HOME/crosswalk/exports`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_dir: Option<PathBuf>,
    /// Quiet period before a search is sent.
    #[serde(default = "default_search_debounce_ms")]
    pub search_debounce_ms: u64,
    /// How long notices stay on screen.
    #[serde(default = "default_notice_ttl_ms")]
    pub notice_ttl_ms: u64,
    /// Overall HTTP request timeout. Unset means no timeout.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,
}

fn default_server_url() -> String {
    "http://127.0.0.1:8000".into()
}
fn default_search_debounce_ms() -> u64 {
    300
}
fn default_notice_ttl_ms() -> u64 {
    4000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            export_dir: None,
            search_debounce_ms: default_search_debounce_ms(),
            notice_ttl_ms: default_notice_ttl_ms(),
            request_timeout_secs: None,
        }
    }
}

impl Config {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save to a TOML file.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Write defaults to `path`, refusing to clobber an existing file unless `force`.
    pub fn init(path: &Path, force: bool) -> ConfigResult<Self> {
        if path.exists() && !force {
            return Err(ConfigError::AlreadyExists {
                path: path.display().to_string(),
            });
        }
        let config = Self::default();
        config.save(path)?;
        Ok(config)
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }

    pub fn notice_ttl(&self) -> Duration {
        Duration::from_millis(self.notice_ttl_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    /// Configured export directory, or `fallback`.
    pub fn export_dir_or(&self, fallback: PathBuf) -> PathBuf {
        self.export_dir.clone().unwrap_or(fallback)
    }

    /// Render as TOML for `config show`.
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }
}
