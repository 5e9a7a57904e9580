//! Output sink - the single local file every segment lands in

use crate::error::PgetError;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tracing::debug;

/// Positional writer for assembled segments
#[async_trait]
pub trait OutputSink: Send {
    /// Write `bytes` starting at absolute `offset`, returning the bytes written
    async fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<usize, PgetError>;

    /// Resize the output to exactly `len` bytes
    async fn set_len(&mut self, len: u64) -> Result<(), PgetError>;

    /// Flush everything to stable storage
    async fn close(&mut self) -> Result<(), PgetError>;
}

/// [`OutputSink`] backed by a local file opened exclusively
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    file: File,
}

impl FileSink {
    /// Remove any existing file at `path`, then create it exclusively
    pub async fn create_exclusive(path: impl AsRef<Path>) -> Result<Self, PgetError> {
        let path = path.as_ref().to_path_buf();

        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Removed existing file {:?}", path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PgetError::Io(e)),
        }

        let file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        Ok(Self { path, file })
    }
}

#[async_trait]
impl OutputSink for FileSink {
    async fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<usize, PgetError> {
        self.file.seek(SeekFrom::Start(offset)).await?;
        self.file.write_all(bytes).await?;
        Ok(bytes.len())
    }

    async fn set_len(&mut self, len: u64) -> Result<(), PgetError> {
        self.file.set_len(len).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PgetError> {
        self.file.flush().await?;
        self.file.sync_all().await?;
        debug!("Flushed {:?}", self.path);
        Ok(())
    }
}
