// src/exec/cancellation.rs

//! Cooperative cancellation.
//!
//! Run-stage work races each runtime call against the session's
//! [`CancellationToken`]. A cancelled call surfaces as [`Cancelled`], which
//! the execution manager recognises anywhere in an error's cause chain.

use std::future::Future;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Marker error: the work was abandoned because cancellation was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("execution was cancelled")]
pub struct Cancelled;

/// `true` if `error`, or anything it wraps, is a cancellation.
pub fn is_cancellation(error: &anyhow::Error) -> bool {
    error
        .chain()
        .any(|cause| cause.downcast_ref::<Cancelled>().is_some())
}

/// Run `future` unless `token` fires first.
pub async fn run_unless_cancelled<F, T>(token: &CancellationToken, future: F) -> Result<T, Cancelled>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(Cancelled),
        value = future => Ok(value),
    }
}
