//! XDG-compliant path resolution for crosswalk.
//!
//! Provides `CrosswalkPaths` following the XDG Base Directory Specification.

use std::path::{Path, PathBuf};

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(crosswalk::paths::no_home),
        help("Set the HOME environment variable or ensure a valid user profile exists.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(crosswalk::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Global XDG-compliant directories for crosswalk.
#[derive(Debug, Clone)]
pub struct CrosswalkPaths {
    /// `$XDG_CONFIG_HOME/crosswalk/`
    pub config_dir: PathBuf,
    /// `$XDG_DATA_HOME/crosswalk/`
    pub data_dir: PathBuf,
    /// `$XDG_STATE_HOME/crosswalk/`
    pub state_dir: PathBuf,
}

impl CrosswalkPaths {
    /// Resolve XDG directories from environment variables with standard fallbacks.
    pub fn resolve() -> PathResult<Self> {
        let home = std::env::var("HOME")
            .map(PathBuf::from)
            .map_err(|_| PathError::NoHome)?;
        Ok(Self::from_env(&home, |key| std::env::var(key).ok()))
    }

    /// Resolve against `home` with variables supplied by `var`.
    fn from_env(home: &Path, var: impl Fn(&str) -> Option<String>) -> Self {
        let dir = |key: &str, fallback: &str| {
            var(key)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| home.join(fallback))
                .join("crosswalk")
        };
        Self {
            config_dir: dir("XDG_CONFIG_HOME", ".config"),
            data_dir: dir("XDG_DATA_HOME", ".local/share"),
            state_dir: dir("XDG_STATE_HOME", ".local/state"),
        }
    }

    /// Create all base directories. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        for dir in [
            &self.config_dir,
            &self.data_dir,
            &self.state_dir,
            &self.logs_dir(),
        ] {
            ensure_dir(dir)?;
        }
        Ok(())
    }

    /// Path to the config file.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }

    /// `state_dir/logs/`
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Log file the interactive mapper writes to.
    pub fn log_file(&self) -> PathBuf {
        self.logs_dir().join("crosswalk.log")
    }

    /// Default destination for exports: `data_dir/exports/`.
    pub fn exports_dir(&self) -> PathBuf {
        self.data_dir.join("exports")
    }
}

/// `create_dir_all` with a diagnostic error.
fn ensure_dir(dir: &Path) -> PathResult<()> {
    std::fs::create_dir_all(dir).map_err(|e| PathError::CreateDir {
        path: dir.display().to_string(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdg_overrides_win_over_home_defaults() {
        let paths = CrosswalkPaths::from_env(Path::new("/home/u"), |key| match key {
            "XDG_CONFIG_HOME" => Some("/cfg".into()),
            "XDG_STATE_HOME" => Some(String::new()),
            _ => None,
        });
        assert_eq!(paths.config_dir, PathBuf::from("/cfg/crosswalk"));
        assert_eq!(paths.data_dir, PathBuf::from("/home/u/.local/share/crosswalk"));
        assert_eq!(paths.state_dir, PathBuf::from("/home/u/.local/state/crosswalk"));
        assert_eq!(paths.config_file(), PathBuf::from("/cfg/crosswalk/config.toml"));
        assert_eq!(
            paths.log_file(),
            PathBuf::from("/home/u/.local/state/crosswalk/logs/crosswalk.log")
        );
    }

    #[test]
    fn ensure_dirs_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let paths = CrosswalkPaths::from_env(tmp.path(), |_| None);
        paths.ensure_dirs().unwrap();
        paths.ensure_dirs().unwrap();
        assert!(paths.logs_dir().is_dir());
        assert!(paths.config_dir.is_dir());
    }
}
