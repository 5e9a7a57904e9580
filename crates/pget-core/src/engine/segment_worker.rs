//! Segment worker - downloads a single segment into memory
//!
//! Each worker owns one session for the lifetime of its segment. It drives
//! the session through login, binary mode, an optional resume and the
//! retrieve, then fills a buffer of exactly the segment's length. The
//! protocol streams until the end of the remote file, so the worker ends
//! the stream itself once the buffer is full.

use crate::engine::cancellable;
use crate::error::PgetError;
use crate::session::{SessionConnector, TransferSession};
use pget_types::{DownloadRequest, Segment, SegmentState, TransferEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Minimum spacing between two progress events of one segment
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// What happened to a chunk handed to [`SegmentBuffer::absorb`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Absorbed {
    /// Copied, the segment still needs more bytes
    Partial,
    /// Copied (possibly truncated), the segment is now full
    Complete,
    /// The segment was already full, nothing was copied
    Discarded,
}

/// Fixed-length buffer for one segment's bytes
#[derive(Debug)]
pub struct SegmentBuffer {
    segment: Segment,
    data: Vec<u8>,
    filled: usize,
}

impl SegmentBuffer {
    pub fn new(segment: Segment) -> Result<Self, PgetError> {
        let len = usize::try_from(segment.length).map_err(|_| {
            PgetError::Validation(format!(
                "segment {} of {} bytes does not fit in memory",
                segment.index, segment.length
            ))
        })?;

        Ok(Self {
            segment,
            data: vec![0u8; len],
            filled: 0,
        })
    }

    /// Copy `chunk` at the fill cursor, keeping only the bytes still needed
    pub fn absorb(&mut self, chunk: &[u8]) -> Absorbed {
        if self.is_complete() {
            return Absorbed::Discarded;
        }

        let take = chunk.len().min(self.data.len() - self.filled);
        self.data[self.filled..self.filled + take].copy_from_slice(&chunk[..take]);
        self.filled += take;

        if self.is_complete() {
            Absorbed::Complete
        } else {
            Absorbed::Partial
        }
    }

    pub fn is_complete(&self) -> bool {
        self.filled == self.data.len()
    }

    pub fn received(&self) -> u64 {
        self.filled as u64
    }

    pub fn segment(&self) -> Segment {
        self.segment
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

/// A worker that downloads one byte range over its own session
pub struct SegmentWorker<C: SessionConnector> {
    download_id: Uuid,
    segment: Segment,
    request: Arc<DownloadRequest>,
    connector: Arc<C>,
    event_tx: broadcast::Sender<TransferEvent>,
    cancel: CancellationToken,
    state: SegmentState,
    last_progress: Option<Instant>,
}

impl<C: SessionConnector> SegmentWorker<C> {
    /// Create a new segment worker
    pub fn new(
        segment: Segment,
        request: Arc<DownloadRequest>,
        connector: Arc<C>,
        event_tx: broadcast::Sender<TransferEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            download_id: request.id,
            segment,
            request,
            connector,
            event_tx,
            cancel,
            state: SegmentState::Connecting,
            last_progress: None,
        }
    }

    /// Run the segment download
    pub async fn run(mut self) -> Result<SegmentBuffer, PgetError> {
        info!(
            "Starting segment {} for download {} (bytes {}-{})",
            self.segment.index,
            self.download_id,
            self.segment.offset,
            self.segment.end()
        );

        self.transition(SegmentState::Connecting);
        let connector = Arc::clone(&self.connector);
        let request = Arc::clone(&self.request);
        let connected = cancellable(&self.cancel, connector.connect(&request.host, request.port)).await;
        let mut session = match connected {
            Ok(session) => session,
            Err(e) => {
                self.transition(SegmentState::Failed);
                return Err(e);
            }
        };

        let result = self.drive(&mut session).await;

        // Whatever happened, this is the one place the session is ended
        if let Err(e) = session.end().await {
            warn!("Failed to end session of segment {}: {}", self.segment.index, e);
        }

        match result {
            Ok(buffer) => {
                self.transition(SegmentState::Succeeded);
                info!(
                    "Segment {} complete ({} bytes)",
                    self.segment.index,
                    buffer.received()
                );
                Ok(buffer)
            }
            Err(e) => {
                self.transition(SegmentState::Failed);
                Err(e)
            }
        }
    }

    async fn drive(&mut self, session: &mut C::Session) -> Result<SegmentBuffer, PgetError> {
        let request = Arc::clone(&self.request);
        let cancel = self.cancel.clone();
        let mut buffer = SegmentBuffer::new(self.segment)?;

        self.transition(SegmentState::Authenticating);
        let credentials = &request.credentials;
        cancellable(
            &cancel,
            session.authenticate(&credentials.username, &credentials.password),
        )
        .await?;

        self.transition(SegmentState::SettingBinaryMode);
        cancellable(&cancel, session.set_binary_mode()).await?;

        if self.segment.needs_resume() {
            self.transition(SegmentState::Resuming);
            cancellable(&cancel, session.resume_at(self.segment.offset)).await?;
        }
        self.transition(SegmentState::Ready);

        self.transition(SegmentState::Retrieving);
        cancellable(&cancel, session.retrieve(&request.remote_path)).await?;

        self.transition(SegmentState::Accumulating);
        loop {
            match cancellable(&cancel, session.next_chunk()).await? {
                Some(chunk) => match buffer.absorb(&chunk) {
                    Absorbed::Partial => self.report_progress(&buffer, false),
                    Absorbed::Complete | Absorbed::Discarded => {
                        debug!(
                            "Segment {} reached {} bytes, ending stream early",
                            self.segment.index, self.segment.length
                        );
                        break;
                    }
                },
                None if buffer.is_complete() => break,
                None => {
                    return Err(PgetError::LengthMismatch {
                        index: self.segment.index,
                        expected: self.segment.length,
                        received: buffer.received(),
                    })
                }
            }
        }

        self.report_progress(&buffer, true);
        Ok(buffer)
    }

    fn transition(&mut self, next: SegmentState) {
        if self.state != next {
            debug!(
                "Segment {}: {:?} -> {:?}",
                self.segment.index, self.state, next
            );
        }
        self.state = next;
        let _ = self.event_tx.send(TransferEvent::SegmentStateChanged {
            id: self.download_id,
            index: self.segment.index,
            state: next,
        });
    }

    fn report_progress(&mut self, buffer: &SegmentBuffer, force: bool) {
        let due = self
            .last_progress
            .map_or(true, |at| at.elapsed() >= PROGRESS_INTERVAL);
        if !force && !due {
            return;
        }

        self.last_progress = Some(Instant::now());
        let _ = self.event_tx.send(TransferEvent::SegmentProgress {
            id: self.download_id,
            index: self.segment.index,
            received: buffer.received(),
            length: self.segment.length,
        });
    }
}
