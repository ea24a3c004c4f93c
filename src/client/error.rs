use std::{io, time::Duration};
use thiserror::Error;

/// Outcome of a failed transfer, as seen by the caller.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Rejected locally before any I/O.
    #[error("invalid transfer: {0}")]
    Validation(String),

    /// The server answered with a non-retryable status.
    #[error("server rejected transfer ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Every attempt hit a transient failure.
    #[error("transfer failed after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },

    /// A failure retrying cannot fix (TLS, DNS, a broken body stream).
    #[error("transfer failed: {0}")]
    Terminal(String),

    /// The server reported success but the reply is unusable.
    #[error("invalid server response: {0}")]
    InvalidResponse(String),

    /// A non-seekable source was partly sent before failing and cannot be
    /// replayed without uploading a truncated object.
    #[error("source stream was consumed ({consumed} bytes) before the transfer failed: {reason}")]
    SourceExhausted { consumed: u64, reason: String },

    #[error("transfer exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TransferError {
    /// Whether the server itself refused the transfer. Such errors are never
    /// worth a staged retry.
    pub fn is_server_verdict(&self) -> bool {
        matches!(
            self,
            TransferError::Rejected { .. }
                | TransferError::Validation(_)
                | TransferError::InvalidResponse(_)
        )
    }
}
