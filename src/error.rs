//! Custom error types and result handling for archive transformations.
//!
//! All operations return a [`Result<T>`] which is a type alias for `std::result::Result<T, Error>`.
//! The domain variants follow the failure taxonomy of the pipeline: parameter errors are
//! raised before any I/O, tool failures carry the operation and path that failed, and
//! `PartialWriteAbort` wraps whatever interrupted a group mid-materialization.
//!
use std::path::PathBuf;

/// Type alias for Results with bunkatsu errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Comprehensive error type for all archive operations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// I/O errors from the standard library
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// Regular expression parsing errors (glob patterns)
    #[error(transparent)]
    Regex(#[from] regex::Error),
    /// Image decoding or encoding errors
    #[error(transparent)]
    Image(#[from] image::ImageError),
    /// ZIP file operation errors
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),
    /// Async task join errors
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
    #[error(transparent)]
    Semaphore(#[from] tokio::sync::AcquireError),
    #[error(transparent)]
    SettingsBuilder(#[from] crate::settings::SettingsBuilderError),
    #[error(transparent)]
    JobSpecBuilder(#[from] crate::types::ArchiveJobSpecBuilderError),
    /// A strategy or job argument is below its minimum or out of range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),
    /// Error for resources that couldn't be found (e.g., source archive, extraction root)
    #[error("Not found: {0}")]
    NotFound(String),
    /// The count strategy cannot produce the requested number of non-empty groups
    #[error("Not enough pages: {requested} groups requested but only {available} image pages")]
    InsufficientPages { requested: usize, available: usize },
    /// Archive tool or image codec failure
    #[error("{operation} failed for '{path:?}': {message}")]
    ExternalToolFailure {
        operation: String,
        path: PathBuf,
        message: String,
    },
    /// Materialization of a group stopped midway; its staging directory was removed
    #[error("Group {group} aborted: {source}")]
    PartialWriteAbort {
        group: usize,
        #[source]
        source: Box<Error>,
    },
    /// The job was cancelled through its cancellation token
    #[error("Operation cancelled")]
    Cancelled,
    /// Error for invalid file or directory paths
    #[error("The given path '{0:?}' is invalid: {1}")]
    InvalidPath(PathBuf, String),
    /// Error for failed asynchronous tasks
    #[error("Asynchronous task failed: {0}")]
    AsyncTaskError(String),
    /// Error for unsupported operations or formats
    #[error("Unsupported: {0}")]
    Unsupported(String),
    /// Other errors that don't fit into specific categories
    #[error("Other error: {0}")]
    Other(String),
}

impl Error {
    /// Builds an [`Error::ExternalToolFailure`] from any displayable cause.
    pub fn tool(operation: &str, path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Error::ExternalToolFailure {
            operation: operation.to_string(),
            path: path.into(),
            message: cause.to_string(),
        }
    }

    /// True when this error (or the error a group abort wraps) is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::PartialWriteAbort { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }
}

// Basic From<String> conversion for convenience
impl From<String> for Error {
    fn from(error: String) -> Self {
        Error::Other(error)
    }
}

impl From<&str> for Error {
    fn from(error: &str) -> Self {
        Error::Other(error.to_string())
    }
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.to_string().as_ref())
    }
}
