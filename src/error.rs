/*!
 * Error types for Collate
 */

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CollateError>;

/// Exit code constants for structured process exit
pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_PARTIAL: i32 = 1;
pub const EXIT_FATAL: i32 = 2;

#[derive(Debug, Error)]
pub enum CollateError {
    /// Source file or directory not found
    #[error("Source not found: {}", .0.display())]
    SourceNotFound(PathBuf),

    /// Path cannot be used for this operation
    #[error("Invalid path: {}", .0.display())]
    InvalidPath(PathBuf),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Source/target combination rejected before any work started
    #[error("Validation error: {0}")]
    Validation(String),

    /// Destination exists with a type that does not match the source
    #[error("Cannot overwrite {dest_kind} {} with {source_kind} {}", .dest_path.display(), .source_path.display())]
    TypeConflict {
        source_path: PathBuf,
        dest_path: PathBuf,
        source_kind: &'static str,
        dest_kind: &'static str,
    },

    /// Followed link leads back to a directory being copied
    #[error("Filesystem loop detected at {}", .0.display())]
    FilesystemLoop(PathBuf),

    /// In-process compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// External transform tool failed
    #[error("Transform '{program}' failed on {}: {status}", .path.display())]
    Transform {
        program: String,
        path: PathBuf,
        status: String,
    },

    /// Written bytes differ from the source range
    #[error("Checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Attribute preservation failed
    #[error("Metadata operation failed: {0}")]
    Metadata(String),

    /// Work record could not be encoded or decoded
    #[error("Work queue error: {0}")]
    Queue(String),

    /// Rank thread failure
    #[error("Parallel processing error: {0}")]
    Parallel(String),

    /// Coordinator rejected the run; non-coordinator ranks report this
    #[error("Run aborted by coordinator")]
    Aborted,
}

impl CollateError {
    /// Get the process exit code for this error
    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            EXIT_FATAL
        } else {
            EXIT_PARTIAL
        }
    }

    /// Fatal errors stop the run before distributed work begins
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CollateError::Config(_)
                | CollateError::Validation(_)
                | CollateError::Parallel(_)
                | CollateError::Aborted
        )
    }

    /// Short tag used in log fields
    pub fn category(&self) -> &'static str {
        match self {
            CollateError::SourceNotFound(_) | CollateError::InvalidPath(_) => "validation",
            CollateError::Validation(_) => "validation",
            CollateError::Io(_) => "io",
            CollateError::Config(_) => "configuration",
            CollateError::TypeConflict { .. } | CollateError::FilesystemLoop(_) => "conflict",
            CollateError::Compression(_) | CollateError::Transform { .. } => "codec",
            CollateError::ChecksumMismatch { .. } => "integrity",
            CollateError::Metadata(_) => "metadata",
            CollateError::Queue(_) => "queue",
            CollateError::Parallel(_) | CollateError::Aborted => "concurrency",
        }
    }
}

impl From<bincode::Error> for CollateError {
    fn from(err: bincode::Error) -> Self {
        CollateError::Queue(err.to_string())
    }
}
