//! Error types for the extraction service

use framegrab_db::DatabaseError;
use framegrab_processing::ProbeError;
use thiserror::Error;

/// Source path resolution failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PathError {
    #[error("input path is empty")]
    Empty,

    #[error("illegal input path: {0}")]
    Illegal(String),

    #[error("path escapes its root: {0}")]
    Traversal(String),

    #[error("input file does not exist: {0}")]
    Missing(String),

    #[error("input is not a regular file: {0}")]
    NotAFile(String),

    #[error("content resolver failed: {0}")]
    Resolver(String),
}

/// Coarse error classification exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InputMissing,
    Traversal,
    NotAFile,
    ProbeFailed,
    QueueFull,
    Shutdown,
    Internal,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::InputMissing => "INPUT_MISSING",
            ErrorKind::Traversal => "TRAVERSAL",
            ErrorKind::NotAFile => "NOT_A_FILE",
            ErrorKind::ProbeFailed => "PROBE_FAILED",
            ErrorKind::QueueFull => "QUEUE_FULL",
            ErrorKind::Shutdown => "SHUTDOWN",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Source resolution failures are reported to callers as validation errors
    pub fn public(&self) -> ErrorKind {
        match self {
            ErrorKind::InputMissing | ErrorKind::Traversal | ErrorKind::NotAFile => {
                ErrorKind::Validation
            }
            other => *other,
        }
    }

    /// Status code for an HTTP front end
    pub fn http_status(&self) -> u16 {
        match self.public() {
            ErrorKind::Validation | ErrorKind::ProbeFailed => 400,
            ErrorKind::NotFound => 404,
            ErrorKind::Conflict => 409,
            _ => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("input missing: {0}")]
    InputMissing(String),

    #[error("path traversal detected: {0}")]
    Traversal(String),

    #[error("input is not a file: {0}")]
    NotAFile(String),

    #[error("probe failed: {0}")]
    ProbeFailed(String),

    #[error("task queue is full")]
    QueueFull,

    #[error("scheduler is shut down")]
    Shutdown,

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExtractError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExtractError::Validation(_) => ErrorKind::Validation,
            ExtractError::NotFound(_) => ErrorKind::NotFound,
            ExtractError::Conflict(_) => ErrorKind::Conflict,
            ExtractError::InputMissing(_) => ErrorKind::InputMissing,
            ExtractError::Traversal(_) => ErrorKind::Traversal,
            ExtractError::NotAFile(_) => ErrorKind::NotAFile,
            ExtractError::ProbeFailed(_) => ErrorKind::ProbeFailed,
            ExtractError::QueueFull => ErrorKind::QueueFull,
            ExtractError::Shutdown => ErrorKind::Shutdown,
            ExtractError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ExtractError::Validation(msg.into())
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        ExtractError::Internal(err.to_string())
    }
}

impl From<DatabaseError> for ExtractError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(what) => ExtractError::NotFound(what),
            other => ExtractError::Internal(other.to_string()),
        }
    }
}

impl From<PathError> for ExtractError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Empty | PathError::Illegal(_) | PathError::Resolver(_) => {
                ExtractError::Validation(err.to_string())
            }
            PathError::Traversal(p) => ExtractError::Traversal(p),
            PathError::Missing(p) => ExtractError::InputMissing(p),
            PathError::NotAFile(p) => ExtractError::NotAFile(p),
        }
    }
}

impl From<ProbeError> for ExtractError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::InputMissing(p) => ExtractError::InputMissing(p),
            other => ExtractError::ProbeFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
