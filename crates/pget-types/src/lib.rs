//! Shared types for pget
//!
//! This crate contains the plain data structures shared between the
//! download engine and the CLI.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Port used when a request does not name one
pub const DEFAULT_FTP_PORT: u16 = 21;

// ============================================================================
// Request Types
// ============================================================================

/// Login credentials for the remote server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Conventional anonymous FTP login
    pub fn anonymous() -> Self {
        Self::new("anonymous", "anonymous@")
    }
}

// Keep passwords out of logs
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Errors produced while building a [`DownloadRequest`]
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unsupported scheme '{0}', only ftp:// is supported")]
    UnsupportedScheme(String),

    #[error("URL has no host")]
    MissingHost,

    #[error("URL does not name a remote file")]
    MissingPath,

    #[error("URL {0} contains a line break")]
    LineBreak(&'static str),
}

/// One segmented download, immutable once the engine has it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRequest {
    pub id: Uuid,
    pub host: String,
    pub port: u16,
    pub credentials: Credentials,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub segment_count: u32,
}

impl DownloadRequest {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        credentials: Credentials,
        remote_path: impl Into<String>,
        local_path: impl Into<PathBuf>,
        segment_count: u32,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            host: host.into(),
            port,
            credentials,
            remote_path: remote_path.into(),
            local_path: local_path.into(),
            segment_count,
        }
    }

    /// Build a request from an `ftp://[user[:password]@]host[:port]/path` URL.
    ///
    /// User, password and path are percent-decoded. Without a user the
    /// request logs in anonymously.
    pub fn from_url(
        url: &str,
        local_path: impl Into<PathBuf>,
        segment_count: u32,
    ) -> Result<Self, RequestError> {
        let parsed = url::Url::parse(url).map_err(|e| RequestError::InvalidUrl(e.to_string()))?;

        if parsed.scheme() != "ftp" {
            return Err(RequestError::UnsupportedScheme(parsed.scheme().to_string()));
        }

        let host = parsed
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or(RequestError::MissingHost)?
            .to_string();
        let port = parsed.port().unwrap_or(DEFAULT_FTP_PORT);

        let credentials = if parsed.username().is_empty() {
            Credentials::anonymous()
        } else {
            Credentials::new(
                decode(parsed.username())?,
                decode(parsed.password().unwrap_or(""))?,
            )
        };

        let remote_path = decode(parsed.path())?;
        if remote_path.is_empty() || remote_path.ends_with('/') {
            return Err(RequestError::MissingPath);
        }

        for (field, value) in [
            ("user", credentials.username.as_str()),
            ("password", credentials.password.as_str()),
            ("path", remote_path.as_str()),
        ] {
            if value.contains(['\r', '\n']) {
                return Err(RequestError::LineBreak(field));
            }
        }

        Ok(Self::new(
            host,
            port,
            credentials,
            remote_path,
            local_path,
            segment_count,
        ))
    }

    /// Last component of the remote path, used as the default local name
    pub fn remote_file_name(&self) -> &str {
        file_name_of(&self.remote_path)
    }
}

fn decode(value: &str) -> Result<String, RequestError> {
    urlencoding::decode(value)
        .map(|s| s.into_owned())
        .map_err(|e| RequestError::InvalidUrl(e.to_string()))
}

/// File name part of a slash-separated remote path
pub fn file_name_of(remote_path: &str) -> &str {
    remote_path
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("download")
}

// ============================================================================
// Segment Types
// ============================================================================

/// A contiguous byte range of the remote file owned by one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub index: u32,
    pub offset: u64,
    pub length: u64,
}

impl Segment {
    pub fn new(index: u32, offset: u64, length: u64) -> Self {
        Self {
            index,
            offset,
            length,
        }
    }

    /// First byte past this segment
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }

    /// Whether the session has to be repositioned before retrieving
    pub fn needs_resume(&self) -> bool {
        self.offset > 0
    }
}

/// Lifecycle of a segment worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentState {
    Connecting,
    Authenticating,
    SettingBinaryMode,
    Resuming,
    Ready,
    Retrieving,
    Accumulating,
    Succeeded,
    Failed,
}

impl SegmentState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SegmentState::Succeeded | SegmentState::Failed)
    }
}

// ============================================================================
// Settings Types
// ============================================================================

/// Engine and CLI settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Segments used when the caller does not ask for a count
    pub default_segments: u32,
    /// Port used when a URL does not carry one
    pub default_port: u16,
    /// Seconds allowed for the TCP connect of a session (0 = no limit)
    pub connect_timeout_secs: u64,
    /// Seconds allowed for a single control command reply (0 = no limit)
    pub command_timeout_secs: u64,
    /// Seconds allowed between two data chunks (0 = no limit)
    pub idle_timeout_secs: u64,
    /// Delete the output file when the download fails
    pub remove_partial_on_failure: bool,
    /// Size of the buffer used to read the data connection
    pub read_buffer_size: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_segments: 4,
            default_port: DEFAULT_FTP_PORT,
            connect_timeout_secs: 30,
            command_timeout_secs: 60,
            idle_timeout_secs: 120,
            remove_partial_on_failure: false,
            read_buffer_size: 64 * 1024,
        }
    }
}

impl Settings {
    pub fn connect_timeout(&self) -> Option<Duration> {
        secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        secs(self.command_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        secs(self.idle_timeout_secs)
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

// ============================================================================
// Report and Event Types
// ============================================================================

/// Summary of a finished download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReport {
    pub id: Uuid,
    pub remote_path: String,
    pub local_path: PathBuf,
    pub total_size: u64,
    pub segments: Vec<Segment>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl DownloadReport {
    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Average speed in bytes per second
    pub fn average_speed(&self) -> u64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            (self.total_size as f64 / secs) as u64
        } else {
            self.total_size
        }
    }
}

/// Events emitted by the engine while a download runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum TransferEvent {
    Started {
        id: Uuid,
        total_size: u64,
        segments: Vec<Segment>,
    },
    SegmentStateChanged {
        id: Uuid,
        index: u32,
        state: SegmentState,
    },
    SegmentProgress {
        id: Uuid,
        index: u32,
        received: u64,
        length: u64,
    },
    SegmentWritten {
        id: Uuid,
        index: u32,
        offset: u64,
        length: u64,
    },
    Completed {
        report: DownloadReport,
    },
    Failed {
        id: Uuid,
        error: String,
    },
}
