//! Probe session - learns the remote file size before partitioning

use crate::engine::cancellable;
use crate::error::PgetError;
use crate::session::{SessionConnector, TransferSession};
use pget_types::Credentials;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Connect, log in and ask for the size of `remote_path` on a throwaway session
pub async fn probe_size<C: SessionConnector>(
    connector: &C,
    host: &str,
    port: u16,
    credentials: &Credentials,
    remote_path: &str,
    cancel: &CancellationToken,
) -> Result<u64, PgetError> {
    debug!("Opening probe session to {}:{}", host, port);
    let mut session = cancellable(cancel, connector.connect(host, port)).await?;

    let size = cancellable(cancel, async {
        session
            .authenticate(&credentials.username, &credentials.password)
            .await?;
        session.query_size(remote_path).await
    })
    .await;

    if let Err(e) = session.end().await {
        warn!("Failed to close probe session: {}", e);
    }

    let size = size?;
    info!("Remote file {} is {} bytes", remote_path, size);
    Ok(size)
}
