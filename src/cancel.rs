//! Cancellation and per-call deadlines for external collaborators
//!
//! Every service operation takes a [`CancellationToken`]; calls into the
//! embedder, vector store and metadata store go through [`guarded`] so that
//! a cancelled caller aborts the in-flight request and a slow collaborator
//! is cut off at its configured budget.

use crate::error::{Error, ErrorKind, Result};
use std::future::Future;
use std::time::Duration;

pub use tokio_util::sync::CancellationToken;

/// Run `fut` until it completes, the token is cancelled, or `budget` elapses.
pub async fn guarded<T, F>(
    cancel: &CancellationToken,
    what: ErrorKind,
    budget: Duration,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        outcome = tokio::time::timeout(budget, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                what,
                after_ms: budget.as_millis() as u64,
            }),
        },
    }
}
