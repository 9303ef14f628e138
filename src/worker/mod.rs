//! Batch dispatch worker.
//!
//! Selects eligible queued messages (respecting the retry cursor) and runs
//! the pipeline on each, strictly sequentially. Each message's outcome is
//! committed independently, so the batch is safely interruptible and one
//! bad message never aborts the rest.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::dispatch::DispatchPipeline;
use crate::message::MessageStore;

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
}

pub struct DispatchWorker {
    store: MessageStore,
    pipeline: Arc<DispatchPipeline>,
}

impl DispatchWorker {
    pub fn new(store: MessageStore, pipeline: Arc<DispatchPipeline>) -> Self {
        Self { store, pipeline }
    }

    /// Process up to `limit` eligible messages, oldest-first.
    pub async fn run_batch(&self, limit: u32) -> BatchReport {
        let start = Instant::now();
        let mut report = BatchReport::default();

        let candidates = match self.store.claimable(limit).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::error!(error = %e, "Failed to select dispatchable messages");
                report.elapsed_ms = start.elapsed().as_millis() as u64;
                return report;
            }
        };

        for (owner_id, message_id) in candidates {
            let outcome = self.pipeline.try_send(owner_id, message_id).await;
            report.processed += 1;
            if outcome.ok {
                report.succeeded += 1;
            } else {
                report.failed += 1;
                tracing::debug!(
                    owner_id = owner_id,
                    message_id = message_id,
                    error = outcome.error.as_deref().unwrap_or("unknown"),
                    "Dispatch attempt did not succeed"
                );
            }
        }

        report.elapsed_ms = start.elapsed().as_millis() as u64;

        if report.processed > 0 {
            tracing::info!(
                processed = report.processed,
                succeeded = report.succeeded,
                failed = report.failed,
                elapsed_ms = report.elapsed_ms,
                "Dispatch batch completed"
            );
        }

        report
    }
}
