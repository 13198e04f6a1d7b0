//! Centralized error types for mailvault.
//!
//! Two layers live here: [`ErrorCode`], the closed status taxonomy carried by
//! archive handles and records, and [`ArchiveError`], the `Result` error used
//! throughout the library.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Status carried by an [`Archive`](crate::archive::Archive) and by every
/// [`Record`](crate::record::Record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum ErrorCode {
    /// Success, and the rest state before any operation ran.
    #[default]
    NoError = 0,
    /// The archive byte source could not be opened.
    Open = 1,
    /// The source opened but its index structures could not be loaded.
    IndexLoad = 2,
    /// The item kind could not be classified; the record cannot be exported.
    UnknownRecord = 3,
    /// Export failed while creating or writing the output.
    FileError = 4,
    /// Export was rejected by the configuration before any I/O.
    UnsupportedParam = 5,
}

impl ErrorCode {
    /// Stable constant-style name, used in logs and CLI output.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoError => "NO_ERROR",
            Self::Open => "ERROR_OPEN",
            Self::IndexLoad => "ERROR_INDEX_LOAD",
            Self::UnknownRecord => "ERROR_UNKNOWN_RECORD",
            Self::FileError => "MESSAGE_ERROR_FILE_ERROR",
            Self::UnsupportedParam => "MESSAGE_ERROR_UNSUPPORTED_PARAM",
        }
    }

    pub fn is_ok(self) -> bool {
        self == Self::NoError
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<i32> for ErrorCode {
    type Error = i32;

    fn try_from(value: i32) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::NoError),
            1 => Ok(Self::Open),
            2 => Ok(Self::IndexLoad),
            3 => Ok(Self::UnknownRecord),
            4 => Ok(Self::FileError),
            5 => Ok(Self::UnsupportedParam),
            other => Err(other),
        }
    }
}

/// All errors produced by the mailvault library.
#[derive(Error, Debug)]
pub enum ArchiveError {
    /// I/O error with the associated file path.
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The archive path does not exist.
    #[error("Archive not found: {0}")]
    FileNotFound(PathBuf),

    /// The file exists but is not an archive this decoder understands.
    #[error("File does not appear to be a mail archive: {0}")]
    NotAnArchive(PathBuf),

    /// The index is corrupt, missing, or was built with an incompatible version.
    #[error("Corrupt or incompatible index for '{path}': {reason}")]
    InvalidIndex { path: PathBuf, reason: String },

    /// A parsing error occurred at a specific byte offset.
    #[error("Parse error at offset {offset}: {reason}")]
    ParseError { offset: u64, reason: String },

    /// A MIME decoding error.
    #[error("MIME decoding error: {0}")]
    MimeError(String),

    /// The decoder could not produce the payload of an item.
    #[error("Cannot read payload of item {item}: {reason}")]
    Payload { item: u64, reason: String },

    /// The item id is not part of the archive, or its kind is unknown.
    #[error("Unknown archive item {0}")]
    UnknownItem(u64),

    /// Rejected by export policy.
    #[error("Unsupported by export configuration: {0}")]
    Unsupported(String),

    /// `destroy` was called twice on the same object.
    #[error("{0} already released")]
    AlreadyReleased(&'static str),

    /// The object was never initialized.
    #[error("{0} not initialized")]
    NotInitialized(&'static str),

    /// The archive handle that owns this record was released.
    #[error("Archive handle released; record references are no longer valid")]
    HandleReleased,

    /// A thread panicked while holding the decoder session.
    #[error("Decoder session poisoned by a panicked thread")]
    Poisoned,

    /// Some records in a bulk release failed.
    #[error("{failed} of {total} records could not be released")]
    ReleaseFailed { failed: usize, total: usize },
}

/// Convenience alias for `Result<T, ArchiveError>`.
pub type Result<T> = std::result::Result<T, ArchiveError>;

impl ArchiveError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map onto the closed status taxonomy.
    ///
    /// Lifecycle errors have no status code and return `None`; they are
    /// returned to the caller instead of being stored in a slot.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Io { .. } => Some(ErrorCode::FileError),
            Self::FileNotFound(_) | Self::NotAnArchive(_) => Some(ErrorCode::Open),
            Self::InvalidIndex { .. } => Some(ErrorCode::IndexLoad),
            Self::ParseError { .. }
            | Self::MimeError(_)
            | Self::Payload { .. }
            | Self::UnknownItem(_) => Some(ErrorCode::UnknownRecord),
            Self::Unsupported(_) => Some(ErrorCode::UnsupportedParam),
            Self::AlreadyReleased(_)
            | Self::NotInitialized(_)
            | Self::HandleReleased
            | Self::Poisoned
            | Self::ReleaseFailed { .. } => None,
        }
    }
}

/// Allow `?` on `std::io::Error` when no path context is available
/// (rare, prefer `ArchiveError::io`).
impl From<std::io::Error> for ArchiveError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}
