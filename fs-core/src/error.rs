//! Error kinds shared by every component of the content pipeline.
//!
//! The variant set matches spec.md §7 exactly; `to_errno` implements the
//! propagation table from the same section so FUSE dispatch code has a
//! single place to turn a pipeline failure into a `libc` errno.

use std::path::PathBuf;

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("no such entry")]
    NoEntry,

    #[error("permission denied")]
    Permission,

    #[error("upstream error: status={status}, body={body}")]
    UpstreamError { status: u16, body: String },

    #[error("bad manifest line {line}: {reason}")]
    BadManifest { line: usize, reason: String },

    #[error("bad meta sidecar at {path}: {reason}")]
    BadMeta { path: PathBuf, reason: String },

    #[error("missing encryption key")]
    MissingKey,

    #[error("key mismatch")]
    KeyMismatch,

    #[error("crypto failure: {0}")]
    CryptoFailure(String),

    #[error("corrupt stream: {0}")]
    Corrupt(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled,

    #[error("not implemented")]
    NotImplemented,
}

pub type FsResult<T> = Result<T, FsError>;

impl FsError {
    /// Maps a pipeline error to the errno a FUSE reply should carry,
    /// per spec.md §7's propagation table.
    pub fn to_errno(&self) -> i32 {
        match self {
            FsError::NoEntry => libc::ENOENT,
            FsError::Permission => libc::EACCES,
            FsError::Corrupt(_) | FsError::UpstreamError { .. } | FsError::CryptoFailure(_) => {
                libc::EIO
            }
            FsError::Cancelled => libc::EINTR,
            FsError::NotImplemented => libc::ENOSYS,
            FsError::MissingKey | FsError::KeyMismatch => libc::EIO,
            FsError::BadManifest { .. } | FsError::BadMeta { .. } => libc::EIO,
            FsError::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

impl From<reqwest::Error> for FsError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            FsError::UpstreamError {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            FsError::Io(std::io::Error::other(e.to_string()))
        }
    }
}

impl From<openssl::error::ErrorStack> for FsError {
    fn from(e: openssl::error::ErrorStack) -> Self {
        FsError::CryptoFailure(e.to_string())
    }
}
