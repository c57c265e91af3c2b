//! Error and diagnostic types for registry operations.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by registry operations.
///
/// Every variant leaves the index in its last consistent state.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Path does not fall under any mount point.
    #[error("Path is not under any mount point: {path}")]
    NotMounted { path: PathBuf },

    /// Mount point is unusable.
    #[error("Invalid mount point {path}: {message}")]
    InvalidMountPoint { path: PathBuf, message: String },

    /// Filter is empty or contradictory.
    #[error("Invalid filter: {message}")]
    InvalidFilter { message: String },

    /// Operation must run on the designated thread.
    #[error("{operation} must be called on the designated thread")]
    WrongThread { operation: &'static str },

    /// Discovery exceeded its iteration cap.
    #[error("Scan of {path} aborted after {limit} iterations")]
    IterationLimit { path: PathBuf, limit: usize },

    /// Generic I/O error.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration.
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

impl RegistryError {
    /// Create an I/O error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Kind of non-fatal gather diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WarningKind {
    /// Container could not be read.
    ReadError,
    /// Container content is malformed.
    Malformed,
    /// Two files claim the same container name.
    DuplicatePackage,
    /// Path is outside every mount point.
    InvalidPath,
    /// Path matched the deny list.
    Denied,
    /// Discovery stopped at the iteration cap.
    IterationLimit,
}

/// Non-fatal diagnostic recorded while gathering.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatherWarning {
    /// Local path the warning concerns.
    pub path: PathBuf,
    /// Human-readable message.
    pub message: String,
    /// Kind of warning.
    pub kind: WarningKind,
}

impl GatherWarning {
    /// Create a new gather warning.
    pub fn new(path: impl Into<PathBuf>, message: impl Into<String>, kind: WarningKind) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
            kind,
        }
    }

    /// Create a read error warning.
    pub fn read_error(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        let path = path.into();
        Self {
            message: format!("Read error: {error}"),
            path,
            kind: WarningKind::ReadError,
        }
    }

    /// Create a malformed container warning.
    pub fn malformed(path: impl Into<PathBuf>, detail: impl std::fmt::Display) -> Self {
        let path = path.into();
        Self {
            message: format!("Malformed container {}: {detail}", path.display()),
            path,
            kind: WarningKind::Malformed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_error_display() {
        let err = RegistryError::NotMounted {
            path: PathBuf::from("/elsewhere"),
        };
        assert!(err.to_string().contains("/elsewhere"));

        let err = RegistryError::WrongThread { operation: "tick" };
        assert_eq!(err.to_string(), "tick must be called on the designated thread");
    }

    #[test]
    fn test_gather_warning_creation() {
        let warning = GatherWarning::malformed("/data/A.asset", "expected value");
        assert_eq!(warning.kind, WarningKind::Malformed);
        assert!(warning.message.contains("expected value"));
    }
}
