//! pget Core - Segmented Download Engine
//!
//! This crate downloads one remote file over several FTP sessions at once.
//! The file is split into contiguous segments, each segment is fetched on
//! its own session using a resumed retrieve, and every segment is written
//! at its absolute offset of a single local file.

pub mod engine;
mod error;
pub mod ftp;
mod session;
mod sink;

#[cfg(test)]
pub(crate) mod testing;

pub use engine::{DownloadTask, PartitionPlan, TerminalSignal};
pub use error::*;
pub use ftp::{FtpConnector, FtpSession};
pub use session::*;
pub use sink::*;

pub use pget_types::{
    Credentials, DownloadReport, DownloadRequest, Segment, SegmentState, Settings, TransferEvent,
};

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Capacity of the event channel; slow subscribers lag rather than block
const EVENT_CAPACITY: usize = 1024;

/// Download `remote_path` from `host:port` into `local_path` using
/// `segment_count` parallel FTP sessions and default settings.
pub async fn download(
    host: &str,
    port: u16,
    username: &str,
    password: &str,
    remote_path: &str,
    local_path: impl Into<PathBuf>,
    segment_count: u32,
) -> Result<DownloadReport, PgetError> {
    let request = DownloadRequest::new(
        host,
        port,
        Credentials::new(username, password),
        remote_path,
        local_path,
        segment_count,
    );
    Pget::new(Settings::default()).download(request).await
}

/// The main pget instance
pub struct Pget<C: SessionConnector = FtpConnector> {
    connector: Arc<C>,
    settings: Settings,
    /// Event broadcaster
    event_tx: broadcast::Sender<TransferEvent>,
}

impl Pget<FtpConnector> {
    /// Create an instance that talks FTP
    pub fn new(settings: Settings) -> Self {
        let connector = FtpConnector::new(&settings);
        Self::with_connector(connector, settings)
    }
}

impl<C: SessionConnector> Pget<C> {
    /// Create an instance over any session implementation
    pub fn with_connector(connector: C, settings: Settings) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            connector: Arc::new(connector),
            settings,
            event_tx,
        }
    }

    /// Subscribe to transfer events
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.event_tx.subscribe()
    }

    /// Run a download to completion
    pub async fn download(&self, request: DownloadRequest) -> Result<DownloadReport, PgetError> {
        self.task(request, CancellationToken::new()).run().await
    }

    /// Start a download in the background
    pub fn start(&self, request: DownloadRequest) -> DownloadHandle {
        let id = request.id;
        let cancel = CancellationToken::new();
        let task = self.task(request, cancel.clone());
        let (signal, result) = TerminalSignal::new();

        tokio::spawn(async move {
            signal.settle(task.run().await);
        });

        DownloadHandle { id, cancel, result }
    }

    /// Size of a remote file, using a single throwaway session
    pub async fn probe(
        &self,
        host: &str,
        port: u16,
        credentials: &Credentials,
        remote_path: &str,
    ) -> Result<u64, PgetError> {
        engine::probe_size(
            self.connector.as_ref(),
            host,
            port,
            credentials,
            remote_path,
            &CancellationToken::new(),
        )
        .await
    }

    fn task(&self, request: DownloadRequest, cancel: CancellationToken) -> DownloadTask<C> {
        DownloadTask::new(
            request,
            Arc::clone(&self.connector),
            self.settings.clone(),
            self.event_tx.clone(),
            cancel,
        )
    }
}

/// Handle to a download started with [`Pget::start`]
pub struct DownloadHandle {
    id: Uuid,
    cancel: CancellationToken,
    result: oneshot::Receiver<Result<DownloadReport, PgetError>>,
}

impl DownloadHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Stop every session of the download; the result becomes `Cancelled`
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token that cancels this download, for use from another task
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the terminal result
    pub async fn wait(self) -> Result<DownloadReport, PgetError> {
        self.result.await.unwrap_or_else(|_| {
            Err(PgetError::Internal(
                "download task ended without a result".to_string(),
            ))
        })
    }
}
