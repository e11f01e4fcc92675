//! Errors reported by filesystem operations and their errno mapping.

use std::ffi::OsString;
use std::num::ParseIntError;

use thiserror::Error;

use crate::fs::FileHandle;

/// Why a write payload could not be applied to a counter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    /// The bytes are not UTF-8.
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    /// Nothing but whitespace.
    #[error("payload is empty")]
    Empty,

    /// Not a base-10 `i64`.
    #[error("payload is not a decimal integer: {0}")]
    Invalid(#[from] ParseIntError),
}

/// Every failure a countfs operation can report.
///
/// Structural errors are raised before any mutation happens, so a failed operation never leaves a
/// partially linked node behind.
#[derive(Debug, Error)]
pub enum FsError {
    /// No entry by that name or address.
    #[error("no such file or directory")]
    NotFound,

    /// The target name is taken.
    #[error("entry already exists")]
    AlreadyExists,

    /// A directory to be removed or replaced still has children.
    #[error("directory not empty")]
    NotEmpty,

    /// A directory operation hit a counter file.
    #[error("not a directory")]
    NotADirectory,

    /// A counter-file operation hit a directory.
    #[error("is a directory")]
    IsADirectory,

    /// Empty, `.`, `..`, or containing `/` or NUL.
    #[error("invalid entry name {0:?}")]
    InvalidName(OsString),

    /// The name exceeds [`MAX_NAME_LEN`](crate::fs::MAX_NAME_LEN).
    #[error("entry name longer than {max} bytes")]
    NameTooLong {
        /// The limit that was exceeded.
        max: usize,
    },

    /// A directory would become its own ancestor.
    #[error("cannot move a directory beneath itself")]
    InvalidMove,

    /// A node would gain a second name.
    #[error("node is already linked; counter files cannot have a second name")]
    TooManyLinks,

    /// The payload was consumed but did not change the counter.
    #[error("write of {consumed} bytes not applied: {source}")]
    Parse {
        /// Bytes taken from the caller, always the full payload length.
        consumed: usize,
        /// What was wrong with the payload.
        #[source]
        source: ParseFailure,
    },

    /// The handle outlived its file or its mount session.
    #[error("stale file handle")]
    StaleHandle,

    /// The handle number was never issued or is already closed.
    #[error("file handle {0} is not open")]
    BadHandle(FileHandle),

    /// The mount's node limit is reached.
    #[error("node limit reached")]
    NoSpace,

    /// The mount does not allow this operation.
    #[error("operation not supported by this mount")]
    Unsupported,
}

impl From<FsError> for i32 {
    fn from(e: FsError) -> Self {
        (&e).into()
    }
}

impl From<&FsError> for i32 {
    fn from(e: &FsError) -> Self {
        match e {
            FsError::NotFound => libc::ENOENT,
            FsError::AlreadyExists => libc::EEXIST,
            FsError::NotEmpty => libc::ENOTEMPTY,
            FsError::NotADirectory => libc::ENOTDIR,
            FsError::IsADirectory => libc::EISDIR,
            FsError::InvalidName(_) | FsError::InvalidMove | FsError::Parse { .. } => libc::EINVAL,
            FsError::NameTooLong { .. } => libc::ENAMETOOLONG,
            FsError::TooManyLinks => libc::EMLINK,
            FsError::StaleHandle => libc::ESTALE,
            FsError::BadHandle(_) => libc::EBADF,
            FsError::NoSpace => libc::ENOSPC,
            FsError::Unsupported => libc::ENOTSUP,
        }
    }
}
