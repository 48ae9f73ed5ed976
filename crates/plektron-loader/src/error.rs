#![forbid(unsafe_code)]

use plektron_net::NetError;
use thiserror::Error;

/// Why a transfer was rejected or stopped.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoaderError {
    #[error("network error: {0}")]
    Net(#[from] NetError),

    #[error("unexpected HTTP status {status} (range request: {ranged})")]
    UnexpectedStatus { status: u16, ranged: bool },

    #[error("invalid Content-Range {0:?}")]
    InvalidContentRange(String),

    #[error("Content-Range starts at {received}, requested {requested}")]
    RangeMismatch { requested: u64, received: u64 },

    #[error("response origin {actual} differs from {expected}")]
    CrossOrigin { expected: String, actual: String },

    #[error("read of {size} bytes exceeds the maximum buffer capacity")]
    ReadTooLarge { size: usize },
}

pub type LoaderResult<T> = Result<T, LoaderError>;

/// Completion status of a loader start or read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadStatus {
    Ok,
    /// The requested bytes are not buffered and will not arrive on the
    /// current transfer.
    CacheMiss,
    Failed,
}

impl LoadStatus {
    pub fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}
