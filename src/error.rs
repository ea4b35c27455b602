//! Fatal errors that abort a validation run.
//!
//! Per-address lookup failures are not represented here; they stay inside
//! the checker as [`ProviderError`](crate::providers::ProviderError) and are
//! folded into an `Indeterminate` verdict.

use std::path::{Path, PathBuf};

/// Error that aborts a run before anything is committed.
#[derive(Debug)]
pub enum ValidatorError {
    /// Missing or unusable configuration (e.g. no API credentials).
    Config(String),
    /// A storage file could not be read or written.
    Storage {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Persisted run state exists but is corrupt.
    State { path: PathBuf, detail: String },
}

impl ValidatorError {
    pub(crate) fn storage(path: &Path, source: std::io::Error) -> Self {
        ValidatorError::Storage {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn state(path: &Path, detail: impl Into<String>) -> Self {
        ValidatorError::State {
            path: path.to_path_buf(),
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for ValidatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidatorError::Config(msg) => write!(f, "Configuration error: {}", msg),
            ValidatorError::Storage { path, source } => {
                write!(f, "Storage error at {}: {}", path.display(), source)
            }
            ValidatorError::State { path, detail } => {
                write!(f, "Corrupt state in {}: {}", path.display(), detail)
            }
        }
    }
}

impl std::error::Error for ValidatorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ValidatorError::Storage { source, .. } => Some(source),
            _ => None,
        }
    }
}
