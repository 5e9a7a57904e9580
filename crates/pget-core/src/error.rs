//! Error types for pget core

use pget_types::RequestError;
use thiserror::Error;

/// Errors that can occur while downloading
#[derive(Debug, Error)]
pub enum PgetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Short write at offset {offset}: wrote {written} of {expected} bytes")]
    ShortWrite {
        offset: u64,
        expected: usize,
        written: usize,
    },

    #[error("Could not connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Authentication failed for {username}: {message}")]
    Auth { username: String, message: String },

    #[error("Server rejected {command}: {message}")]
    Protocol { command: String, message: String },

    #[error("Transfer failed: {0}")]
    TransferStream(String),

    #[error("Segment {index} length mismatch: expected {expected} bytes, received {received}")]
    LengthMismatch {
        index: u32,
        expected: u64,
        received: u64,
    },

    #[error("Invalid download request: {0}")]
    Validation(String),

    #[error("Timed out during {0}")]
    Timeout(String),

    #[error("Download was cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`PgetError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    LocalIo,
    Connect,
    Auth,
    Protocol,
    TransferStream,
    Validation,
    Timeout,
    Cancelled,
}

impl PgetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PgetError::Io(_) | PgetError::ShortWrite { .. } => ErrorKind::LocalIo,
            PgetError::Connect { .. } => ErrorKind::Connect,
            PgetError::Auth { .. } => ErrorKind::Auth,
            PgetError::Protocol { .. } => ErrorKind::Protocol,
            PgetError::TransferStream(_)
            | PgetError::LengthMismatch { .. }
            | PgetError::Internal(_) => ErrorKind::TransferStream,
            PgetError::Validation(_) => ErrorKind::Validation,
            PgetError::Timeout(_) => ErrorKind::Timeout,
            PgetError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Check if this error is transient. The engine never retries on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Connect | ErrorKind::Timeout | ErrorKind::TransferStream
        ) && !matches!(self, PgetError::Internal(_))
    }
}

impl From<RequestError> for PgetError {
    fn from(error: RequestError) -> Self {
        PgetError::Validation(error.to_string())
    }
}
