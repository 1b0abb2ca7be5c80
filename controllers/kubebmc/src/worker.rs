//! Reconciliation workers.
//!
//! Each worker pulls declaration keys off the shared queue and runs one pass
//! per key under a deadline. Outcome handling:
//! - success: the key's failure count is reset and it is not requeued
//! - retryable error: requeued with exponential backoff
//! - permanent error: logged and dropped until the next watch event
//!
//! A worker exits when the queue shuts down or the cancellation token trips;
//! an in-flight pass is abandoned at its next suspension point.

use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::work_queue::WorkQueue;
use cluster_store::ObjectKey;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Drains `queue` until shutdown or cancellation.
pub async fn run_worker(
    id: usize,
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<Reconciler>,
    timeout: Duration,
    cancel: CancellationToken,
) {
    debug!("Worker {} started", id);
    loop {
        let key = tokio::select! {
            _ = cancel.cancelled() => break,
            key = queue.get() => match key {
                Some(key) => key,
                None => break,
            },
        };

        let result = tokio::select! {
            _ = cancel.cancelled() => {
                info!("Worker {} abandoning reconciliation of {} on shutdown", id, key);
                queue.done(&key);
                break;
            }
            result = tokio::time::timeout(timeout, reconciler.reconcile(&key)) => {
                result.unwrap_or(Err(ControllerError::Timeout(timeout)))
            }
        };

        match result {
            Ok(outcome) => {
                debug!("Reconciled {}: {:?}", key, outcome);
                queue.forget(&key);
            }
            Err(e) if e.is_retryable() => {
                let delay = queue.add_rate_limited(key.clone());
                warn!(
                    "Reconciliation of {} failed (attempt {}), retrying in {:?}: {}",
                    key,
                    queue.num_requeues(&key),
                    delay,
                    e
                );
            }
            Err(e) => {
                error!("Reconciliation of {} failed permanently: {}", key, e);
                queue.forget(&key);
            }
        }
        queue.done(&key);
    }
    debug!("Worker {} stopped", id);
}
