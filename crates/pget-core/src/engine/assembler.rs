//! Segment assembler - the single writer of the output sink
//!
//! Completed segments are handed over one at a time. The assembler writes
//! each buffer at its absolute offset and counts it; because it owns both
//! the sink and the counter, completion is observed exactly once.

use crate::engine::segment_worker::SegmentBuffer;
use crate::error::PgetError;
use crate::sink::OutputSink;
use pget_types::TransferEvent;
use tokio::sync::broadcast;
use tracing::{debug, info};
use uuid::Uuid;

/// Message a worker sends when it finishes, successfully or not
#[derive(Debug)]
pub struct SegmentOutcome {
    pub index: u32,
    pub result: Result<SegmentBuffer, PgetError>,
}

/// State of the output after a segment has been written
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyProgress {
    Pending { written: u32, expected: u32 },
    Complete,
}

pub struct SegmentAssembler<S: OutputSink> {
    download_id: Uuid,
    sink: S,
    written: Vec<bool>,
    completed: u32,
    event_tx: broadcast::Sender<TransferEvent>,
}

impl<S: OutputSink> SegmentAssembler<S> {
    pub fn new(
        download_id: Uuid,
        sink: S,
        segment_count: u32,
        event_tx: broadcast::Sender<TransferEvent>,
    ) -> Self {
        Self {
            download_id,
            sink,
            written: vec![false; segment_count as usize],
            completed: 0,
            event_tx,
        }
    }

    pub fn completed(&self) -> u32 {
        self.completed
    }

    pub fn expected(&self) -> u32 {
        self.written.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.completed == self.expected()
    }

    /// Write a finished segment and count it. Closes the sink on the last one.
    pub async fn accept(&mut self, buffer: SegmentBuffer) -> Result<AssemblyProgress, PgetError> {
        let segment = buffer.segment();
        let slot = segment.index as usize;

        if self.is_complete() {
            return Err(PgetError::Internal(format!(
                "segment {} delivered after the download completed",
                segment.index
            )));
        }
        match self.written.get(slot) {
            None => {
                return Err(PgetError::Internal(format!(
                    "segment {} is outside the plan of {}",
                    segment.index,
                    self.expected()
                )))
            }
            Some(true) => {
                return Err(PgetError::Internal(format!(
                    "segment {} delivered twice",
                    segment.index
                )))
            }
            Some(false) => {}
        }

        let bytes = buffer.as_bytes();
        debug!(
            "Writing {} bytes of segment {} at offset {}",
            bytes.len(),
            segment.index,
            segment.offset
        );
        let written = self.sink.write_at(segment.offset, bytes).await?;
        if written != bytes.len() {
            return Err(PgetError::ShortWrite {
                offset: segment.offset,
                expected: bytes.len(),
                written,
            });
        }

        self.written[slot] = true;
        self.completed += 1;
        let _ = self.event_tx.send(TransferEvent::SegmentWritten {
            id: self.download_id,
            index: segment.index,
            offset: segment.offset,
            length: segment.length,
        });

        if !self.is_complete() {
            return Ok(AssemblyProgress::Pending {
                written: self.completed,
                expected: self.expected(),
            });
        }

        info!("All {} segments written, closing output", self.completed);
        self.sink.close().await?;
        Ok(AssemblyProgress::Complete)
    }

    /// Give the sink back, e.g. to discard it after a failure
    pub fn into_sink(self) -> S {
        self.sink
    }
}
