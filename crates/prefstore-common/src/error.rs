//! Error types for prefstore
//!
//! This module defines the common error taxonomy shared by the storage
//! engines, the facade, and the instance manager.

use std::path::PathBuf;
use thiserror::Error;

/// Common result type for prefstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for prefstore
#[derive(Debug, Error)]
pub enum Error {
    // Parameter validation errors (detected at the facade boundary,
    // the backend is never touched)
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("file path is relative")]
    RelativePath,

    #[error("file name is empty")]
    EmptyFileName,

    #[error("file path exceeds maximum length")]
    PathExceedMaxLength,

    #[error("{0} exceeds maximum length")]
    ExceedMaxLength(&'static str),

    // Backend selection errors
    #[error("storage type not supported: {0}")]
    NotSupported(String),

    // Lookup errors (only the typed getters distinguish miss from error)
    #[error("key not found: {0}")]
    KeyNotFound(String),

    // Lifecycle errors
    #[error("store already closed")]
    AlreadyClosed,

    // Durability errors
    #[error("flush failed: {0}")]
    FlushFailed(String),

    #[error("failed to delete file: {0}")]
    DeleteFileFail(PathBuf),

    // I/O and backend passthrough
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Create an invalid parameter error
    pub fn invalid_param(msg: impl Into<String>) -> Self {
        Self::InvalidParam(msg.into())
    }

    /// Create an opaque backend error
    pub fn storage(msg: impl std::fmt::Display) -> Self {
        Self::Storage(msg.to_string())
    }

    /// Create a serialization error
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Check if this is a validation error (the kind never forwarded
    /// to a backend)
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidParam(_)
                | Self::RelativePath
                | Self::EmptyFileName
                | Self::PathExceedMaxLength
                | Self::ExceedMaxLength(_)
        )
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_classification() {
        assert!(Error::invalid_param("empty key").is_validation());
        assert!(Error::ExceedMaxLength("key").is_validation());
        assert!(Error::RelativePath.is_validation());
        assert!(!Error::AlreadyClosed.is_validation());
        assert!(!Error::storage("backend down").is_validation());
    }

    #[test]
    fn test_display_messages() {
        assert_eq!(
            Error::ExceedMaxLength("value").to_string(),
            "value exceeds maximum length"
        );
        assert_eq!(
            Error::KeyNotFound("missing".into()).to_string(),
            "key not found: missing"
        );
    }
}
