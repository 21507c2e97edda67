#![forbid(unsafe_code)]
//! Error types for nsfs.
//!
//! # Error Taxonomy
//!
//! Every namespace operation returns [`FsError`]. Each variant is a stable,
//! distinguishable result so callers never need string inspection to tell
//! "already exists" from "not found" from "no space".
//!
//! | Variant | errno | Raised by |
//! |---------|-------|-----------|
//! | `Io` | raw os error, else `EIO` | audit sink, store I/O |
//! | `NotFound` | `ENOENT` | entry lookup |
//! | `NameExists` | `EEXIST` | entry insert, no-replace rename |
//! | `NameTooLong` | `ENAMETOOLONG` | lookup, create, symlink target |
//! | `DirectoryNotEmpty` | `ENOTEMPTY` | rmdir, rename onto a directory |
//! | `NoSpace` | `ENOSPC` | directory cannot grow |
//! | `OutOfSpace` | `ENOSPC` | no free inode or block |
//! | `LinkLimitExceeded` | `EMLINK` | link accounting |
//! | `CorruptDirectory` | `EIO` | missing `..`, malformed entry block, stale handle |
//! | `InvalidArgument` | `EINVAL` | unsupported rename flags, bad geometry, directory loops |
//! | `NotDirectory` | `ENOTDIR` | directory operation on a non-directory |
//! | `IsDirectory` | `EISDIR` | file operation on a directory |
//!
//! ## Design Constraints
//!
//! - `nsfs-error` MUST NOT depend on any other nsfs crate.
//! - All string payloads are owned (`String`).

use thiserror::Error;

/// Unified error type for all nsfs operations.
#[derive(Debug, Error)]
pub enum FsError {
    /// Operating system I/O error (wraps `std::io::Error`).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// File, directory, or other named object not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A directory entry with the requested name already exists.
    #[error("file exists")]
    NameExists,

    /// Filename (or symlink target) exceeds the filesystem's length limit.
    #[error("name too long")]
    NameTooLong,

    /// rmdir, or rename onto a directory that still has entries.
    #[error("directory not empty")]
    DirectoryNotEmpty,

    /// The directory's entry blocks are full and cannot grow.
    #[error("no space left in directory")]
    NoSpace,

    /// No free inodes or blocks available.
    #[error("no space left on device")]
    OutOfSpace,

    /// The inode's link count is already at the representable maximum.
    #[error("too many links")]
    LinkLimitExceeded,

    /// A directory's structural invariants are violated.
    #[error("corrupt directory {dir}: {detail}")]
    CorruptDirectory { dir: u64, detail: String },

    /// Unsupported flags or otherwise invalid request.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A path component is not a directory.
    #[error("not a directory")]
    NotDirectory,

    /// Attempted a file operation on a directory.
    #[error("is a directory")]
    IsDirectory,
}

impl FsError {
    /// Convert this error into a POSIX errno.
    ///
    /// The mapping is exhaustive; adding a variant without assigning its
    /// errno is a compile error.
    #[must_use]
    pub fn to_errno(&self) -> libc::c_int {
        match self {
            Self::Io(err) => err.raw_os_error().unwrap_or(libc::EIO),
            Self::NotFound(_) => libc::ENOENT,
            Self::NameExists => libc::EEXIST,
            Self::NameTooLong => libc::ENAMETOOLONG,
            Self::DirectoryNotEmpty => libc::ENOTEMPTY,
            Self::NoSpace | Self::OutOfSpace => libc::ENOSPC,
            Self::LinkLimitExceeded => libc::EMLINK,
            Self::CorruptDirectory { .. } => libc::EIO,
            Self::InvalidArgument(_) => libc::EINVAL,
            Self::NotDirectory => libc::ENOTDIR,
            Self::IsDirectory => libc::EISDIR,
        }
    }

    /// Shorthand for a [`FsError::CorruptDirectory`] on directory `dir`.
    #[must_use]
    pub fn corrupt(dir: u64, detail: impl Into<String>) -> Self {
        Self::CorruptDirectory {
            dir,
            detail: detail.into(),
        }
    }
}

/// Result alias using `FsError`.
pub type Result<T> = std::result::Result<T, FsError>;
