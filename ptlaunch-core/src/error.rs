//! Error types for the launcher core.
//!
//! Uses `thiserror` for a single public error enum whose variants map one-to-one onto the
//! failure kinds a caller may want to branch on: bad input, missing paths, filesystem
//! permissions, process start-up, and the child's own failure.

use std::path::PathBuf;

use crate::process::ExitStatus;

/// Top-level error type for the launcher.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Path not found: {path}")]
    PathNotFound { path: PathBuf },

    #[error("Missing input file: {path} ({reason})")]
    MissingInputFile { path: PathBuf, reason: String },

    #[error("Permission denied: {path}")]
    PermissionDenied { path: PathBuf },

    #[error("Failed to start trainer '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Trainer {status}")]
    ChildFailed { status: ExitStatus },

    #[error("Log capture failed for {path}: {source}")]
    LogCapture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Coarse classification of a [`LaunchError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    PathNotFound,
    MissingInputFile,
    PermissionDenied,
    SpawnFailed,
    ChildFailed,
    LogCapture,
    Config,
    Io,
}

impl LaunchError {
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    pub fn missing_input(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::MissingInputFile {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Map a filesystem error on `path`, surfacing permission problems as their own kind.
    pub fn from_fs(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied { path: path.into() },
            std::io::ErrorKind::NotFound => Self::PathNotFound { path: path.into() },
            _ => Self::Io(err),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::PathNotFound { .. } => ErrorKind::PathNotFound,
            Self::MissingInputFile { .. } => ErrorKind::MissingInputFile,
            Self::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            Self::SpawnFailed { .. } => ErrorKind::SpawnFailed,
            Self::ChildFailed { .. } => ErrorKind::ChildFailed,
            Self::LogCapture { .. } => ErrorKind::LogCapture,
            Self::Config { .. } => ErrorKind::Config,
            Self::Io(_) | Self::Serialization(_) => ErrorKind::Io,
        }
    }
}

impl From<Box<figment::Error>> for LaunchError {
    fn from(err: Box<figment::Error>) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}

/// A type alias for results using [`LaunchError`].
pub type Result<T> = std::result::Result<T, LaunchError>;
