use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the registry, allocator and the operations built on them.
#[derive(Debug, Error)]
pub enum BerthError {
    #[error("no free {resource} left ({detail})")]
    AllocationExhausted {
        resource: &'static str,
        detail: String,
    },

    #[error("a deployment named '{0}' already exists")]
    DuplicateName(String),

    #[error("'{0}' is not a valid deployment name")]
    InvalidName(String),

    #[error("config not found at {}", .0.display())]
    MissingConfig(PathBuf),

    #[error("invalid config {}: {reason}", .path.display())]
    InvalidConfig { path: PathBuf, reason: String },

    #[error("registry document not found at {}", .0.display())]
    MissingRegistry(PathBuf),

    #[error("registry document {} is malformed: {source}", .path.display())]
    CorruptRegistry {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("sync of {} into {} failed: {reason}", .from.display(), .to.display())]
    SyncFailed {
        from: PathBuf,
        to: PathBuf,
        reason: String,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("container runtime error: {0}")]
    Runtime(#[from] bollard::errors::Error),

    #[error("failed to load settings: {0}")]
    Settings(String),
}

impl BerthError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BerthError>;
