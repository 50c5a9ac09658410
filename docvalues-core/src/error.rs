//! Error types for docvalues

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Corrupt format: {0}")]
    Corruption(String),

    #[error("Unsupported format version {version} for {codec} (supported {min}..={max})")]
    UnsupportedVersion {
        codec: String,
        version: i32,
        min: i32,
        max: i32,
    },

    #[error("Resource already closed")]
    AlreadyClosed,

    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Invalid field type: expected {expected}, got {got}")]
    InvalidFieldType { expected: String, got: String },
}

impl Error {
    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// True for the error kinds that make a segment unreadable.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Error::Corruption(_) | Error::UnsupportedVersion { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
