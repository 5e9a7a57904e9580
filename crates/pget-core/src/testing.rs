//! Scripted in-memory sessions and sinks for engine tests.

use crate::error::PgetError;
use crate::session::{SessionConnector, TransferSession};
use crate::sink::OutputSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Deterministic, non-repeating-looking test payload
pub(crate) fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| ((i * 31 + 7) % 251) as u8).collect()
}

/// Behaviour of every session a [`MockConnector`] opens.
///
/// Sessions are told apart by their resume offset; a session that never
/// resumes has offset 0.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockConfig {
    pub payload: Vec<u8>,
    /// Bytes per data chunk, 0 means 1024
    pub chunk_size: usize,
    pub refuse_connect: bool,
    pub reject_login: bool,
    /// The stream of the session at this offset errors on its first read
    pub fail_stream_at: Option<u64>,
    /// The stream of the session at this offset never produces data
    pub hang_at: Option<u64>,
    /// The session at this offset reports success after this many bytes
    pub truncate_stream_at: Option<(u64, usize)>,
    /// Sleep before every chunk of the session at this offset
    pub chunk_delays: HashMap<u64, Duration>,
}

#[derive(Debug, Default)]
pub(crate) struct MockStats {
    connects: AtomicUsize,
    ends: AtomicUsize,
    double_ends: AtomicUsize,
    chunks_served: AtomicUsize,
    resumes: Mutex<Vec<u64>>,
}

impl MockStats {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn ends(&self) -> usize {
        self.ends.load(Ordering::SeqCst)
    }

    pub fn double_ends(&self) -> usize {
        self.double_ends.load(Ordering::SeqCst)
    }

    pub fn chunks_served(&self) -> usize {
        self.chunks_served.load(Ordering::SeqCst)
    }

    pub fn resumes(&self) -> Vec<u64> {
        self.resumes.lock().clone()
    }

    pub fn resumes_sorted(&self) -> Vec<u64> {
        let mut resumes = self.resumes();
        resumes.sort_unstable();
        resumes
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockConnector {
    config: Arc<MockConfig>,
    stats: Arc<MockStats>,
}

impl MockConnector {
    pub fn new(config: MockConfig) -> Self {
        Self {
            config: Arc::new(config),
            stats: Arc::new(MockStats::default()),
        }
    }

    pub fn stats(&self) -> &MockStats {
        &self.stats
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    type Session = MockSession;

    async fn connect(&self, host: &str, port: u16) -> Result<MockSession, PgetError> {
        if self.config.refuse_connect {
            return Err(PgetError::Connect {
                host: host.to_string(),
                port,
                source: std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
            });
        }

        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        Ok(MockSession {
            config: Arc::clone(&self.config),
            stats: Arc::clone(&self.stats),
            offset: 0,
            cursor: None,
            ended: false,
        })
    }
}

pub(crate) struct MockSession {
    config: Arc<MockConfig>,
    stats: Arc<MockStats>,
    offset: u64,
    cursor: Option<usize>,
    ended: bool,
}

#[async_trait]
impl TransferSession for MockSession {
    async fn authenticate(&mut self, username: &str, _password: &str) -> Result<(), PgetError> {
        if self.config.reject_login {
            return Err(PgetError::Auth {
                username: username.to_string(),
                message: "530 Login incorrect".to_string(),
            });
        }
        Ok(())
    }

    async fn set_binary_mode(&mut self) -> Result<(), PgetError> {
        Ok(())
    }

    async fn resume_at(&mut self, offset: u64) -> Result<(), PgetError> {
        self.offset = offset;
        self.stats.resumes.lock().push(offset);
        Ok(())
    }

    async fn query_size(&mut self, _path: &str) -> Result<u64, PgetError> {
        Ok(self.config.payload.len() as u64)
    }

    async fn retrieve(&mut self, _path: &str) -> Result<(), PgetError> {
        self.cursor = Some(self.offset as usize);
        Ok(())
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, PgetError> {
        let cursor = self
            .cursor
            .ok_or_else(|| PgetError::TransferStream("no transfer in progress".to_string()))?;

        if self.config.hang_at == Some(self.offset) {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.config.chunk_delays.get(&self.offset) {
            tokio::time::sleep(*delay).await;
        }
        if self.config.fail_stream_at == Some(self.offset) {
            return Err(PgetError::TransferStream("426 Connection reset".to_string()));
        }

        let mut end = self.config.payload.len();
        if let Some((offset, limit)) = self.config.truncate_stream_at {
            if offset == self.offset {
                end = end.min(self.offset as usize + limit);
            }
        }
        if cursor >= end {
            self.cursor = None;
            return Ok(None);
        }

        let chunk_size = if self.config.chunk_size == 0 {
            1024
        } else {
            self.config.chunk_size
        };
        let next = end.min(cursor + chunk_size);
        self.cursor = Some(next);
        self.stats.chunks_served.fetch_add(1, Ordering::SeqCst);
        Ok(Some(self.config.payload[cursor..next].to_vec()))
    }

    async fn end(&mut self) -> Result<(), PgetError> {
        if std::mem::replace(&mut self.ended, true) {
            self.stats.double_ends.fetch_add(1, Ordering::SeqCst);
        } else {
            self.stats.ends.fetch_add(1, Ordering::SeqCst);
        }
        self.cursor = None;
        Ok(())
    }
}

/// Shared in-memory [`OutputSink`]; clones see the same bytes
#[derive(Debug, Clone)]
pub(crate) struct MemorySink {
    data: Arc<Mutex<Vec<u8>>>,
    closed: Arc<AtomicBool>,
    write_limit: Option<usize>,
}

impl MemorySink {
    pub fn new(len: usize) -> Self {
        Self {
            data: Arc::new(Mutex::new(vec![0; len])),
            closed: Arc::new(AtomicBool::new(false)),
            write_limit: None,
        }
    }

    /// Make every write stop after `limit` bytes
    pub fn with_write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit);
        self
    }

    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OutputSink for MemorySink {
    async fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<usize, PgetError> {
        let count = self.write_limit.map_or(bytes.len(), |limit| limit.min(bytes.len()));
        let start = offset as usize;
        let mut data = self.data.lock();
        if data.len() < start + count {
            data.resize(start + count, 0);
        }
        data[start..start + count].copy_from_slice(&bytes[..count]);
        Ok(count)
    }

    async fn set_len(&mut self, len: u64) -> Result<(), PgetError> {
        self.data.lock().resize(len as usize, 0);
        Ok(())
    }

    async fn close(&mut self) -> Result<(), PgetError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
