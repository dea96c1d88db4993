//! Error types for configuration, the blocker worker and per-process operations.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that end a blocking session before it starts (or refuse to start one).
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("incorrect time format {0:?}: use HH:MM (24-hour format)")]
    InvalidStartTime(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("blocker already started")]
    AlreadyStarted,
    #[error("blocker was never started")]
    NotStarted,
    #[error("failed to read profile {path}: {source}")]
    ProfileRead {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse profile {path}: {source}")]
    ProfileParse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Per-process soft failures. These are logged inside a sweep and never abort it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProcError {
    #[error("process {0} no longer exists")]
    NotFound(i32),
    #[error("permission denied for PID {0}")]
    PermissionDenied(i32),
    #[error("failed to send signal to PID {0}: {1}")]
    SignalError(i32, String),
    #[error("process {0} did not exit within {1:?}")]
    Timeout(i32, std::time::Duration),
    #[error("procfs error: {0}")]
    Procfs(String),
}

impl From<procfs::ProcError> for ProcError {
    fn from(err: procfs::ProcError) -> Self {
        ProcError::Procfs(err.to_string())
    }
}
