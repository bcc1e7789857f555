//! Error types shared by every layer.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::CodecError;

/// Error category reported to remote callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    InvalidParameter,
    NotSupported,
    ResourceExhausted,
    Failed,
}

/// Backend gateway error.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    #[error("Backend rejected request: {0}")]
    Rejected(String),
    #[error("Backend unavailable: {0}")]
    Unavailable(String),
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Error returned by shell operations.
#[derive(Debug, Clone, Error)]
pub enum ShellError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Already exists: {0}")]
    AlreadyExists(String),
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("Not supported: {0}")]
    NotSupported(String),
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),
    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("Failed: {0}")]
    Failed(String),
}

impl ShellError {
    /// The category reported on the wire.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::InvalidParameter(_) => ErrorKind::InvalidParameter,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::ResourceExhausted(_) | Self::Codec(CodecError::OutOfMemory(_)) => {
                ErrorKind::ResourceExhausted
            }
            Self::Codec(_) | Self::Backend(_) | Self::Failed(_) => ErrorKind::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(ShellError::NotFound("x".into()).kind(), ErrorKind::NotFound);
        assert_eq!(
            ShellError::from(CodecError::TruncatedChunk { offset: 0 }).kind(),
            ErrorKind::Failed
        );
        assert_eq!(
            ShellError::from(CodecError::OutOfMemory(1)).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            ShellError::from(BackendError::Rejected("no".into())).kind(),
            ErrorKind::Failed
        );
    }

    #[test]
    fn test_error_kind_serialization() {
        let json = serde_json::to_string(&ErrorKind::AlreadyExists).unwrap();
        assert_eq!(json, "\"already_exists\"");
    }
}
