//! Download task - coordinates multiple segment workers
//!
//! This is the main orchestrator for a single download.
//! It opens the output, probes the remote size, spawns one segment worker
//! per partition and routes every finished segment through the assembler.

use crate::engine::{
    probe_size, AssemblyProgress, PartitionPlan, SegmentAssembler, SegmentOutcome, SegmentWorker,
};
use crate::error::PgetError;
use crate::session::SessionConnector;
use crate::sink::{FileSink, OutputSink};
use chrono::{DateTime, Utc};
use pget_types::{DownloadReport, DownloadRequest, Settings, TransferEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How long stopped workers get to end their sessions when no command
/// timeout is configured
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// A download task that manages multiple segment workers
pub struct DownloadTask<C: SessionConnector> {
    request: Arc<DownloadRequest>,
    connector: Arc<C>,
    settings: Settings,
    event_tx: broadcast::Sender<TransferEvent>,
    cancel: CancellationToken,
}

impl<C: SessionConnector> DownloadTask<C> {
    /// Create a new download task
    pub fn new(
        request: DownloadRequest,
        connector: Arc<C>,
        settings: Settings,
        event_tx: broadcast::Sender<TransferEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            request: Arc::new(request),
            connector,
            settings,
            event_tx,
            cancel,
        }
    }

    /// Run the download task
    pub async fn run(self) -> Result<DownloadReport, PgetError> {
        let started_at = Utc::now();
        info!(
            "Starting download {}: {}:{}{} -> {:?} with {} segments",
            self.request.id,
            self.request.host,
            self.request.port,
            self.request.remote_path,
            self.request.local_path,
            self.request.segment_count
        );

        let result = self.execute(started_at).await;

        match &result {
            Ok(report) => {
                info!(
                    "Download completed: {:?} ({} bytes in {:?})",
                    report.local_path,
                    report.total_size,
                    report.elapsed()
                );
                let _ = self.event_tx.send(TransferEvent::Completed {
                    report: report.clone(),
                });
            }
            Err(e) => {
                error!("Download {} failed: {}", self.request.id, e);
                let _ = self.event_tx.send(TransferEvent::Failed {
                    id: self.request.id,
                    error: e.to_string(),
                });
            }
        }

        result
    }

    async fn execute(&self, started_at: DateTime<Utc>) -> Result<DownloadReport, PgetError> {
        // Reject before touching the file or the network
        if self.request.segment_count == 0 {
            return Err(PgetError::Validation(
                "at least one segment is required".to_string(),
            ));
        }

        let mut sink = FileSink::create_exclusive(&self.request.local_path).await?;

        let plan = match self.plan().await {
            Ok(plan) => plan,
            Err(e) => {
                self.discard_output(sink).await;
                return Err(e);
            }
        };

        if let Err(e) = sink.set_len(plan.total_size).await {
            self.discard_output(sink).await;
            return Err(e);
        }

        let segments = plan.segments();
        info!(
            "Downloading {} bytes in {} segments of {} ({} leftover)",
            plan.total_size, plan.segment_count, plan.base_chunk_size, plan.leftover
        );
        let _ = self.event_tx.send(TransferEvent::Started {
            id: self.request.id,
            total_size: plan.total_size,
            segments: segments.clone(),
        });

        let mut assembler = SegmentAssembler::new(
            self.request.id,
            sink,
            plan.segment_count,
            self.event_tx.clone(),
        );

        if let Err(e) = self.download_segments(&plan, &mut assembler).await {
            self.discard_output(assembler.into_sink()).await;
            return Err(e);
        }

        Ok(DownloadReport {
            id: self.request.id,
            remote_path: self.request.remote_path.clone(),
            local_path: self.request.local_path.clone(),
            total_size: plan.total_size,
            segments,
            started_at,
            finished_at: Utc::now(),
        })
    }

    async fn plan(&self) -> Result<PartitionPlan, PgetError> {
        let size = probe_size(
            self.connector.as_ref(),
            &self.request.host,
            self.request.port,
            &self.request.credentials,
            &self.request.remote_path,
            &self.cancel,
        )
        .await?;

        PartitionPlan::new(size, self.request.segment_count)
    }

    /// Download with multiple parallel segments
    async fn download_segments<S: OutputSink>(
        &self,
        plan: &PartitionPlan,
        assembler: &mut SegmentAssembler<S>,
    ) -> Result<(), PgetError> {
        let workers_cancel = self.cancel.child_token();
        let (outcome_tx, mut outcome_rx) = mpsc::channel(plan.segment_count as usize);
        let mut join_set = JoinSet::new();

        for segment in plan.segments() {
            let worker = SegmentWorker::new(
                segment,
                Arc::clone(&self.request),
                Arc::clone(&self.connector),
                self.event_tx.clone(),
                workers_cancel.clone(),
            );
            let outcome_tx = outcome_tx.clone();

            join_set.spawn(async move {
                let result = worker.run().await;
                let _ = outcome_tx
                    .send(SegmentOutcome {
                        index: segment.index,
                        result,
                    })
                    .await;
            });
        }
        drop(outcome_tx);

        let result = collect_segments(&mut outcome_rx, &mut join_set, assembler).await;

        if result.is_err() {
            info!("Stopping remaining segment workers");
            workers_cancel.cancel();
        }
        self.wait_for_workers(join_set).await;

        result
    }

    /// Wait until every worker has ended its session
    async fn wait_for_workers(&self, mut join_set: JoinSet<()>) {
        let grace = self
            .settings
            .command_timeout()
            .unwrap_or(DEFAULT_SHUTDOWN_GRACE);

        let drained = tokio::time::timeout(grace, async {
            while join_set.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            warn!(
                "{} segment workers did not stop within {:?}, aborting them",
                join_set.len(),
                grace
            );
            join_set.shutdown().await;
        }
    }

    /// Close the output after a failure, removing it if configured to
    async fn discard_output<S: OutputSink>(&self, sink: S) {
        drop(sink);

        if !self.settings.remove_partial_on_failure {
            return;
        }
        match tokio::fs::remove_file(&self.request.local_path).await {
            Ok(()) => info!("Removed partial file {:?}", self.request.local_path),
            Err(e) => warn!(
                "Failed to remove partial file {:?}: {}",
                self.request.local_path, e
            ),
        }
    }
}

/// Feed finished segments to the assembler until all are written or one fails
async fn collect_segments<S: OutputSink>(
    outcome_rx: &mut mpsc::Receiver<SegmentOutcome>,
    join_set: &mut JoinSet<()>,
    assembler: &mut SegmentAssembler<S>,
) -> Result<(), PgetError> {
    loop {
        tokio::select! {
            outcome = outcome_rx.recv() => match outcome {
                Some(SegmentOutcome { index, result: Ok(buffer) }) => {
                    info!("Segment {} completed", index);
                    if assembler.accept(buffer).await? == AssemblyProgress::Complete {
                        return Ok(());
                    }
                }
                Some(SegmentOutcome { index, result: Err(e) }) => {
                    error!("Segment {} failed: {}", index, e);
                    return Err(e);
                }
                None => {
                    return Err(PgetError::Internal(format!(
                        "segment workers exited after {} of {} segments",
                        assembler.completed(),
                        assembler.expected()
                    )));
                }
            },
            Some(joined) = join_set.join_next() => {
                if let Err(e) = joined {
                    error!("Segment task panicked: {}", e);
                    return Err(PgetError::Internal(format!("segment task panicked: {}", e)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{payload, MockConfig, MockConnector};
    use pget_types::Credentials;
    use std::collections::HashMap;
    use std::path::Path;

    fn request(local_path: &Path, segments: u32) -> DownloadRequest {
        DownloadRequest::new(
            "mock",
            21,
            Credentials::new("user", "pass"),
            "/file.bin",
            local_path,
            segments,
        )
    }

    async fn run(
        connector: &MockConnector,
        request: DownloadRequest,
        settings: Settings,
    ) -> (Result<DownloadReport, PgetError>, Vec<TransferEvent>) {
        let (event_tx, mut event_rx) = broadcast::channel(4096);
        let task = DownloadTask::new(
            request,
            Arc::new(connector.clone()),
            settings,
            event_tx,
            CancellationToken::new(),
        );

        let result = task.run().await;
        let mut events = Vec::new();
        while let Ok(event) = event_rx.try_recv() {
            events.push(event);
        }
        (result, events)
    }

    #[tokio::test]
    async fn test_thousand_bytes_in_three_segments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let data = payload(1000);
        let connector = MockConnector::new(MockConfig {
            payload: data.clone(),
            chunk_size: 64,
            ..MockConfig::default()
        });

        let (result, _) = run(&connector, request(&path, 3), Settings::default()).await;
        let report = result.unwrap();

        assert_eq!(report.total_size, 1000);
        assert_eq!(
            report.segments.iter().map(|s| (s.offset, s.length)).collect::<Vec<_>>(),
            vec![(0, 333), (333, 333), (666, 334)]
        );
        assert_eq!(std::fs::read(&path).unwrap(), data);
        assert_eq!(connector.stats().resumes_sorted(), vec![333, 666]);
        // Probe plus one session per segment, each ended once
        assert_eq!(connector.stats().connects(), 4);
        assert_eq!(connector.stats().ends(), 4);
        assert_eq!(connector.stats().double_ends(), 0);
    }

    #[tokio::test]
    async fn test_round_trip_with_and_without_leftover() {
        for (size, segments, chunk) in [(4096, 4, 100), (4096, 7, 100), (5003, 5, 1), (777, 1, 4096)] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("out.bin");
            let data = payload(size);
            let connector = MockConnector::new(MockConfig {
                payload: data.clone(),
                chunk_size: chunk,
                ..MockConfig::default()
            });

            let (result, _) = run(&connector, request(&path, segments), Settings::default()).await;
            result.unwrap();

            let written = std::fs::read(&path).unwrap();
            assert_eq!(written.len(), size, "size mismatch for {size}/{segments}");
            assert_eq!(written, data, "content mismatch for {size}/{segments}");
        }
    }

    #[tokio::test]
    async fn test_zero_segments_rejected_before_any_session() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let connector = MockConnector::new(MockConfig {
            payload: payload(100),
            ..MockConfig::default()
        });

        let (result, _) = run(&connector, request(&path, 0), Settings::default()).await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
        assert_eq!(connector.stats().connects(), 0);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_empty_remote_file_rejected_before_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let connector = MockConnector::new(MockConfig::default());

        let (result, events) = run(&connector, request(&path, 4), Settings::default()).await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Validation);
        // Only the probe session was opened
        assert_eq!(connector.stats().connects(), 1);
        assert_eq!(connector.stats().ends(), 1);
        assert!(!events
            .iter()
            .any(|e| matches!(e, TransferEvent::Started { .. })));
    }

    #[tokio::test]
    async fn test_auth_failure_starts_no_workers() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let connector = MockConnector::new(MockConfig {
            payload: payload(100),
            reject_login: true,
            ..MockConfig::default()
        });

        let (result, _) = run(&connector, request(&path, 4), Settings::default()).await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::Auth);
        assert_eq!(connector.stats().connects(), 1);
    }

    #[tokio::test]
    async fn test_segment_failure_fails_download_and_stops_siblings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let connector = MockConnector::new(MockConfig {
            payload: payload(1000),
            chunk_size: 50,
            // Segment 1 of 4 breaks mid-stream, segment 2 never finishes
            fail_stream_at: Some(250),
            hang_at: Some(500),
            ..MockConfig::default()
        });

        let (result, events) = run(&connector, request(&path, 4), Settings::default()).await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::TransferStream);
        // Every session that was opened, including the stuck one, got ended
        assert!(connector.stats().connects() >= 3);
        assert_eq!(connector.stats().ends(), connector.stats().connects());
        assert_eq!(connector.stats().double_ends(), 0);
        assert!(!events
            .iter()
            .any(|e| matches!(e, TransferEvent::Completed { .. })));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, TransferEvent::Failed { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_reverse_completion_fires_success_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let data = payload(400);
        let delays = HashMap::from([
            (0, Duration::from_millis(300)),
            (100, Duration::from_millis(200)),
            (200, Duration::from_millis(100)),
        ]);
        let connector = MockConnector::new(MockConfig {
            payload: data.clone(),
            chunk_size: 4096,
            chunk_delays: delays,
            ..MockConfig::default()
        });

        let (result, events) = run(&connector, request(&path, 4), Settings::default()).await;
        result.unwrap();

        let written: Vec<u32> = events
            .iter()
            .filter_map(|e| match e {
                TransferEvent::SegmentWritten { index, .. } => Some(*index),
                _ => None,
            })
            .collect();
        assert_eq!(written, vec![3, 2, 1, 0]);

        let completed: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| matches!(e, TransferEvent::Completed { .. }))
            .map(|(i, _)| i)
            .collect();
        assert_eq!(completed.len(), 1);
        let last_write = events
            .iter()
            .rposition(|e| matches!(e, TransferEvent::SegmentWritten { .. }))
            .unwrap();
        assert!(completed[0] > last_write);
        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_partial_file_kept_or_removed_on_failure() {
        for remove in [false, true] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("out.bin");
            let connector = MockConnector::new(MockConfig {
                payload: payload(1000),
                fail_stream_at: Some(0),
                ..MockConfig::default()
            });
            let settings = Settings {
                remove_partial_on_failure: remove,
                ..Settings::default()
            };

            let (result, _) = run(&connector, request(&path, 2), settings).await;

            assert!(result.is_err());
            assert_eq!(path.exists(), !remove);
        }
    }

    #[tokio::test]
    async fn test_existing_output_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.bin");
        std::fs::write(&path, vec![0xAA; 5000]).unwrap();
        let data = payload(300);
        let connector = MockConnector::new(MockConfig {
            payload: data.clone(),
            ..MockConfig::default()
        });

        let (result, _) = run(&connector, request(&path, 3), Settings::default()).await;
        result.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), data);
    }

    #[tokio::test]
    async fn test_unwritable_output_fails_before_probe() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no-such-dir").join("out.bin");
        let connector = MockConnector::new(MockConfig {
            payload: payload(100),
            ..MockConfig::default()
        });

        let (result, _) = run(&connector, request(&path, 2), Settings::default()).await;

        assert_eq!(result.unwrap_err().kind(), ErrorKind::LocalIo);
        assert_eq!(connector.stats().connects(), 0);
    }
}
