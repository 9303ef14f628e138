//! Background task driving the dispatch worker on a fixed interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::WorkerConfig;
use crate::worker::DispatchWorker;

/// Interval-driven dispatch loop with graceful shutdown.
///
/// Batches run inside this single task, so scheduled runs can never
/// overlap each other.
pub struct WorkerTask {
    config: WorkerConfig,
    worker: Arc<DispatchWorker>,
    shutdown: broadcast::Receiver<()>,
}

impl WorkerTask {
    pub fn new(
        config: WorkerConfig,
        worker: Arc<DispatchWorker>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            worker,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        let mut timer = tokio::time::interval(Duration::from_secs(self.config.interval_seconds));

        // Skip immediate first tick
        timer.tick().await;

        tracing::info!(
            interval_secs = self.config.interval_seconds,
            batch_size = self.config.batch_size,
            "Dispatch worker task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Dispatch worker task received shutdown signal");
                    break;
                }
                _ = timer.tick() => {
                    self.worker.run_batch(self.config.batch_size).await;
                }
            }
        }

        tracing::info!("Dispatch worker task stopped");
    }
}
