//! Error types for the fim library
//!
//! All fallible operations return [`Result`], whose error side is [`FimError`].
//! The taxonomy separates three families:
//!
//! - **Usage errors**: the caller asked for something the current
//!   configuration cannot deliver (for example corruption detection without
//!   full-content hashing). They are raised before any I/O happens.
//! - **Per-file I/O errors**: a single file could not be read. The snapshot
//!   generator logs them and leaves the file out of the snapshot.
//! - **Repository errors**: the `.fim` directory is missing, a snapshot file
//!   is absent or its checksum does not match.
//!
//! Data corruption found in the tracked tree is *not* an error; it shows up
//! as a classified difference in a [`CompareResult`](crate::CompareResult).

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the fim library
pub type Result<T> = std::result::Result<T, FimError>;

/// Main error type for all fim operations
#[derive(Debug, Error)]
pub enum FimError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Errors during bincode serialization/deserialization
    #[error("Bincode error: {0}")]
    Bincode(String),

    /// The requested operation is not allowed with the current settings
    #[error("Usage error: {0}")]
    Usage(String),

    /// A tracked file could not be read
    #[error("Unable to read {path:?}: {source}")]
    FileRead {
        /// File that failed
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Snapshot number not present in the repository
    #[error("Snapshot not found: #{0}")]
    SnapshotNotFound(u32),

    /// Persisted snapshot does not match its recorded checksum
    #[error("Snapshot #{number} has been modified and may be corrupted (expected {expected}, got {actual})")]
    CorruptedSnapshot {
        /// Snapshot number
        number: u32,
        /// Checksum stored in the snapshot
        expected: String,
        /// Checksum recomputed from the content
        actual: String,
    },

    /// Repository directory does not exist
    #[error("Repository not initialized at path: {0:?}")]
    RepositoryNotInitialized(PathBuf),

    /// Repository directory already exists
    #[error("Repository already exists at path: {0:?}")]
    RepositoryAlreadyExists(PathBuf),

    /// A file could not be removed after the bounded number of attempts
    #[error("Failed to delete {path:?} after {attempts} attempts")]
    DeleteFailed {
        /// File that could not be removed
        path: PathBuf,
        /// Number of attempts made
        attempts: u32,
    },

    /// Compression errors
    #[error("Compression error: {0}")]
    Compression(String),

    /// Decompression errors
    #[error("Decompression error: {0}")]
    Decompression(String),

    /// Malformed radix-85 text
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Pattern parsing error
    #[error("Invalid ignore pattern: {0}")]
    InvalidPattern(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<bincode::error::DecodeError> for FimError {
    fn from(err: bincode::error::DecodeError) -> Self {
        FimError::Bincode(err.to_string())
    }
}

impl From<bincode::error::EncodeError> for FimError {
    fn from(err: bincode::error::EncodeError) -> Self {
        FimError::Bincode(err.to_string())
    }
}

impl From<globset::Error> for FimError {
    fn from(err: globset::Error) -> Self {
        FimError::InvalidPattern(err.to_string())
    }
}

impl From<ignore::Error> for FimError {
    fn from(err: ignore::Error) -> Self {
        FimError::InvalidPattern(err.to_string())
    }
}

impl FimError {
    /// Create a usage error with a custom message
    pub fn usage(msg: impl Into<String>) -> Self {
        FimError::Usage(msg.into())
    }

    /// Create a compression error with a custom message
    pub fn compression(msg: impl Into<String>) -> Self {
        FimError::Compression(msg.into())
    }

    /// Create a decompression error with a custom message
    pub fn decompression(msg: impl Into<String>) -> Self {
        FimError::Decompression(msg.into())
    }

    /// Create an encoding error with a custom message
    pub fn encoding(msg: impl Into<String>) -> Self {
        FimError::Encoding(msg.into())
    }

    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        FimError::Internal(msg.into())
    }

    /// Wrap an I/O error raised while reading `path`
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        FimError::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Check if this error is a usage error
    pub fn is_usage_error(&self) -> bool {
        matches!(self, FimError::Usage(_))
    }

    /// Check if this error only affects a single file and the run can go on
    pub fn is_recoverable(&self) -> bool {
        matches!(self, FimError::FileRead { .. } | FimError::DeleteFailed { .. })
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            FimError::RepositoryNotInitialized(path) => {
                format!("No repository found at {:?}. Run 'fim init' first.", path)
            }
            FimError::RepositoryAlreadyExists(path) => {
                format!("A repository already exists at {:?}.", path)
            }
            FimError::SnapshotNotFound(number) => {
                format!("Snapshot #{} not found. Use 'fim log' to list snapshots.", number)
            }
            FimError::CorruptedSnapshot { number, .. } => {
                format!(
                    "Snapshot #{} failed its checksum. Use 'fim rollback' if it is the last one.",
                    number
                )
            }
            _ => self.to_string(),
        }
    }
}
