use thiserror::Error;

/// Error types for attribute access, module initialization and platform services.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RqError {
    /// Malformed input on an attribute write, or an invalid lifecycle call.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Attribute node or group could not be created.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// Platform does not support the feature, or the access mode forbids it.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// No attribute is registered at the requested path.
    #[error("not found: {0}")]
    NotFound(String),

    /// The background worker could not be created.
    #[error("worker creation failed: {0}")]
    WorkerCreation(String),
}

impl RqError {
    /// Negative errno surfaced to the calling process for this error.
    #[must_use]
    pub fn errno(&self) -> i32 {
        match self {
            Self::InvalidArgument(_) => -libc::EINVAL,
            Self::OutOfMemory(_) | Self::WorkerCreation(_) => -libc::ENOMEM,
            Self::PermissionDenied(_) => -libc::EPERM,
            Self::NotFound(_) => -libc::ENOENT,
        }
    }
}

/// Convenience type alias for rq-stats operations.
pub type RqResult<T> = Result<T, RqError>;
