//! Error types for ferrogroup

use thiserror::Error;

/// Result type for process-group operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for process-group operations
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid rank specified
    #[error("Invalid rank: {0}")]
    InvalidRank(i32),

    /// Invalid group size specified
    #[error("Invalid group size: {0}")]
    InvalidSize(i32),

    /// A launch environment variable is missing or malformed
    #[error("Invalid launch environment ({var}): {reason}")]
    Environment {
        /// Name of the offending variable
        var: &'static str,
        /// What was wrong with it
        reason: String,
    },

    /// The coordinator refused to form the group
    #[error("Group formation rejected: {0}")]
    JoinRejected(String),

    /// The peer closed the connection while a frame was expected
    #[error("Connection closed by peer")]
    Disconnected,

    /// A frame arrived that does not fit the rendezvous protocol
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// An operation did not complete within its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A group member could not be started
    #[error("Failed to spawn rank {rank}: {source}")]
    Spawn {
        /// Rank whose process failed to start
        rank: i32,
        /// Underlying OS error
        #[source]
        source: std::io::Error,
    },

    /// The identity line could not be written
    #[error("Failed to write identity: {0}")]
    Output(#[source] std::io::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame (de)serialization error
    #[error("Malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Map an I/O error raised under a socket deadline to [`Error::Timeout`].
    pub(crate) fn from_io_deadline(err: std::io::Error, what: &str) -> Self {
        match err.kind() {
            std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => {
                Error::Timeout(what.to_string())
            }
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe => Error::Disconnected,
            _ => Error::Io(err),
        }
    }
}
