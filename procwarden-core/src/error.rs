use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Process spawn failed: {0}")]
    SpawnFailed(String),

    #[error("start '{name}' failed, {reason}")]
    StartFailure { name: String, reason: String },

    #[error("stop '{name}' timed out after {timeout:?}")]
    StopTimeout { name: String, timeout: Duration },

    #[error("pid file '{}' {reason}", path.display())]
    Pidfile { path: PathBuf, reason: String },

    #[error("'{name}' crashed with error - {message}")]
    RuntimeCrash { name: String, message: String },

    #[error("Unit {0} not found")]
    UnitNotFound(String),

    #[error("Unit {0} already exists")]
    DuplicateUnit(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("hook '{}' failed, {reason}", path.display())]
    Hook { path: PathBuf, reason: String },

    #[error("{}", .0.join("\n"))]
    Bulk(Vec<String>),

    #[error("Signal handling error: {0}")]
    Signal(String),

    #[cfg(unix)]
    #[error("Unix error: {0}")]
    Unix(#[from] nix::errno::Errno),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Folds per-unit failures into one error, or `Ok` when nothing failed.
    pub fn collect(failures: Vec<String>) -> Result<()> {
        if failures.is_empty() {
            Ok(())
        } else {
            Err(Error::Bulk(failures))
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
