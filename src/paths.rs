//! XDG-compliant path resolution for extree.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Errors from path resolution.
#[derive(Debug, Error, Diagnostic)]
pub enum PathError {
    #[error("cannot determine home directory")]
    #[diagnostic(
        code(extree::paths::no_home),
        help("Set the HOME environment variable or pass `--config <file>` explicitly.")
    )]
    NoHome,

    #[error("failed to create directory: {path}")]
    #[diagnostic(
        code(extree::paths::create_dir),
        help("Check that the parent directory exists and you have write permissions.")
    )]
    CreateDir {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type PathResult<T> = std::result::Result<T, PathError>;

/// Directories used by the CLI.
#[derive(Debug, Clone)]
pub struct ExTreePaths {
    /// `$XDG_CONFIG_HOME/extree/`
    pub config_dir: PathBuf,
}

impl ExTreePaths {
    /// Resolve from `XDG_CONFIG_HOME`, falling back to `~/.config`.
    pub fn resolve() -> PathResult<Self> {
        let config_root = match std::env::var("XDG_CONFIG_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => std::env::var("HOME")
                .map(|home| PathBuf::from(home).join(".config"))
                .map_err(|_| PathError::NoHome)?,
        };
        Ok(Self {
            config_dir: config_root.join("extree"),
        })
    }

    /// Create the config directory. Idempotent.
    pub fn ensure_dirs(&self) -> PathResult<()> {
        std::fs::create_dir_all(&self.config_dir).map_err(|e| PathError::CreateDir {
            path: self.config_dir.display().to_string(),
            source: e,
        })
    }

    /// Path to the config file.
    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join("config.toml")
    }
}
