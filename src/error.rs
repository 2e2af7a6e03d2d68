//! Error types for recopy.
//!
//! This module provides the [`Error`] enum containing all errors that can
//! stop a remote copy from being evaluated, the [`ErrorCode`] used for
//! machine-readable reporting, and the [`Result`] type alias.
//!
//! Most external-command failures are *not* errors: a failed transfer is a
//! [`JobOutcome::Failed`](crate::JobOutcome::Failed) value. `Error` is
//! reserved for conditions the caller has to react to directly.
//!
//! # Error Categories
//!
//! | Category | Errors |
//! |----------|--------|
//! | IO | [`Error::Io`], [`Error::LogFile`] |
//! | Fatal | [`Error::ConnectionFailed`] |
//! | Interrupted | [`Error::Cancelled`] |
//! | Remote | [`Error::CommandFailed`] |
//! | User input | [`Error::InvalidConflictAnswer`], [`Error::Prompt`] |

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for recopy operations.
///
/// This is a type alias for `std::result::Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Stable machine-readable classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Invalid arguments or answers supplied by the user
    InvalidInput,
    /// The base SSH connection could not be established
    ConnectionFailed,
    /// A remote command kept failing after all retries
    CommandFailed,
    /// A local IO operation failed
    IoError,
    /// The local disk is full
    NoSpace,
    /// Access to a local path was denied
    PermissionDenied,
    /// The interactive prompt could not be shown or read
    Prompt,
    /// The run was cancelled through its cancel token
    Cancelled,
    /// Anything else
    Internal,
}

impl ErrorCode {
    /// Snake-case identifier used in CLI and JSON output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidInput => "invalid_input",
            Self::ConnectionFailed => "connection_failed",
            Self::CommandFailed => "command_failed",
            Self::IoError => "io_error",
            Self::NoSpace => "no_space",
            Self::PermissionDenied => "permission_denied",
            Self::Prompt => "prompt",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check if an IO error indicates "no space left on device".
///
/// # Platform Support
///
/// | Platform | Error Detection |
/// |----------|-----------------|
/// | Unix | `ENOSPC` (errno 28) |
/// | Windows | `ERROR_DISK_FULL` (0x70) |
///
/// # Example
///
/// ```
/// use std::io;
/// use recopy::is_no_space_error;
///
/// let error = io::Error::new(io::ErrorKind::StorageFull, "disk full");
/// assert!(is_no_space_error(&error));
/// ```
pub fn is_no_space_error(error: &io::Error) -> bool {
    if error.kind() == io::ErrorKind::StorageFull {
        return true;
    }

    #[cfg(unix)]
    {
        if let Some(raw_error) = error.raw_os_error() {
            const ENOSPC: i32 = 28;
            return raw_error == ENOSPC;
        }
    }

    #[cfg(windows)]
    {
        if let Some(raw_error) = error.raw_os_error() {
            const ERROR_DISK_FULL: i32 = 112;
            return raw_error == ERROR_DISK_FULL;
        }
    }

    false
}

/// Errors that can occur while talking to the remote or preparing a copy.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// IO error during local file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The base SSH connection could not be established at all
    ///
    /// This aborts the current top-level operation (listing, copying,
    /// deleting) but is never a reason to terminate the process.
    #[error("SSH connection to {target} failed after {attempts} attempts: {detail}")]
    ConnectionFailed {
        /// `user@host` that was contacted
        target: String,
        /// Number of connection attempts made
        attempts: u32,
        /// Last stderr line or launch error
        detail: String,
    },

    /// A remote command failed after exhausting its retries
    #[error("{description} failed after {attempts} attempts (exit code {})", display_code(.exit_code))]
    CommandFailed {
        /// Human description of the command ("folder list retrieval")
        description: String,
        /// Exit code of the last attempt, `None` if it never launched
        exit_code: Option<i32>,
        /// Number of attempts made
        attempts: u32,
    },

    /// The activity log could not be opened for appending
    #[error("Cannot open log file {path}: {source}")]
    LogFile {
        /// Path of the log file
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Answer to the destination-conflict question was not understood
    #[error("Invalid conflict answer: {0:?} (expected skip, overwrite or rename)")]
    InvalidConflictAnswer(String),

    /// The interactive prompt failed (closed terminal, read error)
    #[error("Prompt failed: {0}")]
    Prompt(String),

    /// Operation was cancelled via cancellation token
    ///
    /// Any child process was stopped and scratch files were removed before
    /// this is returned. `partial` names a destination that may hold an
    /// incomplete copy; re-copying it with
    /// [`ConflictDecision::Overwrite`](crate::ConflictDecision::Overwrite)
    /// starts clean.
    #[error("Cancelled during {item}")]
    Cancelled {
        /// Item being processed when the cancel arrived
        item: String,
        /// Destination the transfer had started writing to
        partial: Option<PathBuf>,
    },
}

fn display_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "none".to_owned(), |c| c.to_string())
}

impl Error {
    /// Classify this error for reporting.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Io(source) | Self::LogFile { source, .. } => io_error_code(source),
            Self::ConnectionFailed { .. } => ErrorCode::ConnectionFailed,
            Self::CommandFailed { .. } => ErrorCode::CommandFailed,
            Self::InvalidConflictAnswer(_) => ErrorCode::InvalidInput,
            Self::Prompt(_) => ErrorCode::Prompt,
            Self::Cancelled { .. } => ErrorCode::Cancelled,
        }
    }
}

/// Classify a raw IO error.
#[must_use]
pub fn io_error_code(error: &io::Error) -> ErrorCode {
    if is_no_space_error(error) {
        return ErrorCode::NoSpace;
    }
    if error.kind() == io::ErrorKind::PermissionDenied {
        return ErrorCode::PermissionDenied;
    }
    ErrorCode::IoError
}
