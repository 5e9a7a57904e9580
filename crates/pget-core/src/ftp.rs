//! FTP implementation of [`TransferSession`] over `suppaftp`'s tokio stream

use crate::error::PgetError;
use crate::session::{SessionConnector, TransferSession};
use async_trait::async_trait;
use pget_types::Settings;
use std::future::Future;
use std::time::Duration;
use suppaftp::tokio::{AsyncDataStream, AsyncFtpStream, AsyncNoTlsStream};
use suppaftp::types::FileType;
use suppaftp::FtpError;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::debug;

type DataStream = AsyncDataStream<AsyncNoTlsStream>;

/// Upper bound for each step of tearing a session down
const END_GRACE: Duration = Duration::from_secs(5);

/// Opens [`FtpSession`]s
#[derive(Debug, Clone)]
pub struct FtpConnector {
    connect_timeout: Option<Duration>,
    command_timeout: Option<Duration>,
    idle_timeout: Option<Duration>,
    read_buffer_size: usize,
}

impl FtpConnector {
    pub fn new(settings: &Settings) -> Self {
        Self {
            connect_timeout: settings.connect_timeout(),
            command_timeout: settings.command_timeout(),
            idle_timeout: settings.idle_timeout(),
            read_buffer_size: settings.read_buffer_size.max(1),
        }
    }
}

impl Default for FtpConnector {
    fn default() -> Self {
        Self::new(&Settings::default())
    }
}

#[async_trait]
impl SessionConnector for FtpConnector {
    type Session = FtpSession;

    async fn connect(&self, host: &str, port: u16) -> Result<FtpSession, PgetError> {
        debug!("Connecting to {}:{}", host, port);

        let tcp = with_timeout(self.connect_timeout, "connect", async {
            TcpStream::connect((host, port))
                .await
                .map_err(|source| PgetError::Connect {
                    host: host.to_string(),
                    port,
                    source,
                })
        })
        .await?;

        let mut stream = with_timeout(self.command_timeout, "greeting", async {
            AsyncFtpStream::connect_with_stream(tcp)
                .await
                .map_err(|e| ftp_error("greeting", e))
        })
        .await?;

        // Data connections always go to the control peer, whatever PASV advertises
        stream.set_passive_nat_workaround(true);

        Ok(FtpSession {
            stream,
            data: None,
            ended: false,
            connector: self.clone(),
        })
    }
}

/// One FTP control connection plus its current data connection
pub struct FtpSession {
    stream: AsyncFtpStream,
    data: Option<DataStream>,
    ended: bool,
    connector: FtpConnector,
}

#[async_trait]
impl TransferSession for FtpSession {
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<(), PgetError> {
        reject_line_breaks("username", username)?;
        reject_line_breaks("password", password)?;

        let stream = &mut self.stream;
        with_timeout(self.connector.command_timeout, "login", async {
            stream.login(username, password).await.map_err(|e| match e {
                FtpError::UnexpectedResponse(reply) => PgetError::Auth {
                    username: username.to_string(),
                    message: reply.to_string(),
                },
                other => ftp_error("USER", other),
            })
        })
        .await
    }

    async fn set_binary_mode(&mut self) -> Result<(), PgetError> {
        let stream = &mut self.stream;
        with_timeout(self.connector.command_timeout, "TYPE", async {
            stream
                .transfer_type(FileType::Binary)
                .await
                .map_err(|e| ftp_error("TYPE", e))
        })
        .await
    }

    async fn resume_at(&mut self, offset: u64) -> Result<(), PgetError> {
        let offset = usize::try_from(offset)
            .map_err(|_| PgetError::Validation(format!("offset {} is out of range", offset)))?;

        let stream = &mut self.stream;
        with_timeout(self.connector.command_timeout, "REST", async {
            stream
                .resume_transfer(offset)
                .await
                .map_err(|e| ftp_error("REST", e))
        })
        .await
    }

    async fn query_size(&mut self, path: &str) -> Result<u64, PgetError> {
        reject_line_breaks("remote path", path)?;

        let stream = &mut self.stream;
        let size = with_timeout(self.connector.command_timeout, "SIZE", async {
            stream.size(path).await.map_err(|e| ftp_error("SIZE", e))
        })
        .await?;
        Ok(size as u64)
    }

    async fn retrieve(&mut self, path: &str) -> Result<(), PgetError> {
        reject_line_breaks("remote path", path)?;

        let stream = &mut self.stream;
        let data = with_timeout(self.connector.command_timeout, "RETR", async {
            stream
                .retr_as_stream(path)
                .await
                .map_err(|e| ftp_error("RETR", e))
        })
        .await?;
        self.data = Some(data);
        Ok(())
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, PgetError> {
        let mut buf = vec![0u8; self.connector.read_buffer_size];
        let data = self
            .data
            .as_mut()
            .ok_or_else(|| PgetError::TransferStream("no transfer in progress".to_string()))?;

        let n = with_timeout(self.connector.idle_timeout, "data transfer", async {
            data.read(&mut buf)
                .await
                .map_err(|e| PgetError::TransferStream(e.to_string()))
        })
        .await?;

        if n > 0 {
            buf.truncate(n);
            return Ok(Some(buf));
        }

        // EOF on the data connection, the control reply decides the outcome
        let Some(data) = self.data.take() else {
            return Ok(None);
        };
        let stream = &mut self.stream;
        with_timeout(self.connector.command_timeout, "transfer completion", async {
            stream
                .finalize_retr_stream(data)
                .await
                .map_err(|e| PgetError::TransferStream(e.to_string()))
        })
        .await?;
        Ok(None)
    }

    async fn end(&mut self) -> Result<(), PgetError> {
        if self.ended {
            return Ok(());
        }
        self.ended = true;

        if let Some(data) = self.data.take() {
            match tokio::time::timeout(END_GRACE, self.stream.abort(data)).await {
                Ok(Ok(())) => debug!("Transfer aborted"),
                Ok(Err(e)) => debug!("ABOR not acknowledged: {}", e),
                Err(_) => debug!("ABOR not acknowledged within {:?}", END_GRACE),
            }
        }

        match tokio::time::timeout(END_GRACE, self.stream.quit()).await {
            Ok(result) => result.map_err(|e| ftp_error("QUIT", e)),
            Err(_) => Err(PgetError::Timeout("QUIT".to_string())),
        }
    }
}

/// Refuse values that would smuggle extra commands onto the control connection
fn reject_line_breaks(field: &str, value: &str) -> Result<(), PgetError> {
    if value.contains(['\r', '\n']) {
        return Err(PgetError::Validation(format!(
            "{} must not contain line breaks",
            field
        )));
    }
    Ok(())
}

fn ftp_error(command: &str, error: FtpError) -> PgetError {
    match error {
        FtpError::ConnectionError(e) => PgetError::TransferStream(e.to_string()),
        other => PgetError::Protocol {
            command: command.to_string(),
            message: other.to_string(),
        },
    }
}

async fn with_timeout<T, F>(limit: Option<Duration>, what: &str, fut: F) -> Result<T, PgetError>
where
    F: Future<Output = Result<T, PgetError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| PgetError::Timeout(what.to_string()))?,
        None => fut.await,
    }
}
