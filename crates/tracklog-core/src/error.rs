//! Error types for the tracklog pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the query client while talking to the remote indexer.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Connection refused, reset, timed out, or the body could not be read.
    #[error("transport error: {0}")]
    Transport(String),

    /// The indexer answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    /// The response carried a non-empty `errors` array.
    #[error("GraphQL errors: {}", .0.join("; "))]
    Graphql(Vec<String>),

    /// The response could not be decoded into the expected shape.
    #[error("decode error: {0}")]
    Decode(String),

    /// The caller cancelled the request (possibly during a backoff sleep).
    #[error("query cancelled")]
    Cancelled,

    /// Every attempt of the retry budget failed with a transient error.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        last: Box<QueryError>,
    },
}

impl QueryError {
    /// Returns `true` for transient failures: transport errors, 5xx and 429.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status == 429 || (500..600).contains(status),
            _ => false,
        }
    }
}

/// Errors raised by the checkpoint store and the append log writer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{op} {}: {source}", .path.display())]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The event failed the validation gate and never reached disk.
    #[error("invalid event: {field} must be set")]
    InvalidEvent { field: &'static str },

    /// An event or batch belongs to a different epoch than its destination.
    #[error("epoch {actual} does not match expected epoch {expected}")]
    EpochMismatch { expected: i64, actual: i64 },
}

impl StoreError {
    /// Wrap an I/O failure with the operation and path it happened on.
    pub fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Errors surfaced by a single worker poll.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("query block info: {0}")]
    BlockInfo(#[source] QueryError),

    #[error("query events after ({height}, {tx_index}): {source}")]
    Events {
        height: i64,
        tx_index: i64,
        #[source]
        source: QueryError,
    },

    #[error("write at ({height}, {tx_index}): {source}")]
    Write {
        height: i64,
        tx_index: i64,
        #[source]
        source: StoreError,
    },

    #[error("epoch change to {epoch}: {source}")]
    Epoch {
        epoch: i64,
        #[source]
        source: StoreError,
    },

    #[error("flush: {0}")]
    Flush(#[source] StoreError),
}

impl IndexerError {
    /// Returns `true` if the underlying failure was a cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            Self::BlockInfo(QueryError::Cancelled)
                | Self::Events {
                    source: QueryError::Cancelled,
                    ..
                }
        )
    }
}
