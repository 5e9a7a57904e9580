//! Transfer session interface
//!
//! A session is one logical connection to the remote server. The engine
//! drives it through authenticate, binary mode, optional resume and
//! retrieve, then pulls data chunks until the stream reports success or
//! an error.

use crate::error::PgetError;
use async_trait::async_trait;

/// One connected, stateful session
#[async_trait]
pub trait TransferSession: Send {
    /// Log in with the given credentials
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), PgetError>;

    /// Switch the session to binary (image) transfers
    async fn set_binary_mode(&mut self) -> Result<(), PgetError>;

    /// Make the next retrieve start at `offset`
    async fn resume_at(&mut self, offset: u64) -> Result<(), PgetError>;

    /// Size of the remote file in bytes
    async fn query_size(&mut self, path: &str) -> Result<u64, PgetError>;

    /// Start streaming the remote file
    async fn retrieve(&mut self, path: &str) -> Result<(), PgetError>;

    /// Next chunk of the open stream.
    ///
    /// `Ok(Some(bytes))` is a data chunk, `Ok(None)` is the success signal
    /// and `Err` is the stream error signal.
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, PgetError>;

    /// Terminate the stream if one is open and close the session.
    /// Must be safe to call once the stream has already finished.
    async fn end(&mut self) -> Result<(), PgetError>;
}

/// Opens sessions; the `connect()` step of the session lifecycle
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    type Session: TransferSession + 'static;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Session, PgetError>;
}
