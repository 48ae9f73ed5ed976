use thiserror::Error;

/// Terminal outcome of a read, as seen by the demuxer.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ReadError {
    #[error("read at {position} failed: {reason}")]
    Failed { position: u64, reason: String },

    #[error("source stopped")]
    Stopped,

    #[error("read at {position} failed after {retries} retries")]
    RetriesExhausted { position: u64, retries: u32 },

    #[error("a read is already pending")]
    ReadInProgress,
}

impl ReadError {
    pub fn position(&self) -> Option<u64> {
        match self {
            Self::Failed { position, .. } | Self::RetriesExhausted { position, .. } => {
                Some(*position)
            }
            Self::Stopped | Self::ReadInProgress => None,
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InitError {
    #[error("initial request failed: {0}")]
    Failed(String),

    /// Local resources must report their size up front.
    #[error("resource size is unknown")]
    UnknownSize,

    #[error("source stopped")]
    Stopped,

    #[error("source already initialized")]
    AlreadyInitialized,
}

pub type SourceResult<T> = Result<T, ReadError>;
