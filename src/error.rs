//! Transfer error taxonomy.

use thiserror::Error;

/// Error surfaced by a transfer or by engine construction. Network and storage
/// failures leave the transfer in a resumable state; retry policy is a caller
/// concern.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Invalid construction input (zero capacity, mismatched range lengths).
    /// Raised before any thread is spawned.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// libcurl reported a failure (timeout, connection, TLS, ...).
    #[error(transparent)]
    Curl(#[from] curl::Error),

    /// The response had a non-2xx status.
    #[error("HTTP {0}")]
    Http(u32),

    /// Disk write or file open failed.
    #[error("storage: {0}")]
    Storage(#[source] std::io::Error),

    /// The stream ended before the requested length was transferred. The
    /// remaining ranges have already been advanced, so a later `start` resumes
    /// from the right offset.
    #[error("partial transfer: expected {expected} bytes, got {received}")]
    PartialTransfer { expected: u64, received: u64 },

    /// The response was rejected by the configured response filter.
    #[error("response rejected by filter")]
    Rejected,

    /// The transfer was stopped cooperatively. Not surfaced as an error event.
    #[error("transfer stopped")]
    Stopped,
}

impl TransferError {
    /// True for the cooperative-stop case, which ends a transfer cleanly
    /// instead of failing it.
    pub fn is_stopped(&self) -> bool {
        matches!(self, TransferError::Stopped)
    }
}
