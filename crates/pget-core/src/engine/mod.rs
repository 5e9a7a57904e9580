//! Download Engine - segmented parallel retrieval
//!
//! This module implements the engine behind pget:
//! - Partitioning the remote file into contiguous segments
//! - One session per segment, all running concurrently
//! - A single assembler writing every segment at its offset
//! - Cleanup of sibling sessions on the first failure

mod assembler;
mod download_task;
mod partition;
mod probe;
mod segment_worker;
mod terminal;

pub use assembler::*;
pub use download_task::*;
pub use partition::*;
pub use probe::*;
pub use segment_worker::*;
pub use terminal::*;

use crate::error::PgetError;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Await `fut` unless `token` is cancelled first
pub(crate) async fn cancellable<T, F>(token: &CancellationToken, fut: F) -> Result<T, PgetError>
where
    F: Future<Output = Result<T, PgetError>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(PgetError::Cancelled),
        result = fut => result,
    }
}
