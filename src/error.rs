//! Error types shared by the store, cache and sync engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Project or file does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Project creation collided with an existing project
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed descriptor or settings document
    #[error("invalid metadata: {0}")]
    InvalidMetadata(String),

    /// Projected project size is over the configured quota
    #[error("project size limit exceeded: {projected} > {limit} bytes")]
    SizeLimitExceeded { projected: i64, limit: i64 },

    /// Declared path/size/hash disagrees with what was received
    #[error("integrity mismatch: {0}")]
    IntegrityMismatch(String),

    /// Path is absolute, escapes the project root or targets the control directory
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl StoreError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        StoreError::Io {
            context: context.into(),
            source,
        }
    }

    /// Wraps a non-`std::io` failure (subprocess, task join) as an I/O failure.
    pub fn other(context: impl Into<String>, message: impl std::fmt::Display) -> Self {
        StoreError::Io {
            context: context.into(),
            source: std::io::Error::other(message.to_string()),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
