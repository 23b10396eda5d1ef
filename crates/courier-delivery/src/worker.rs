//! Worker loop and pool driving the processor on an interval.
//!
//! Each worker repeatedly invokes `process_batch`, sleeping for the poll
//! interval when the queue is drained and backing off briefly after a
//! storage fault. The pool supervises the worker tasks and provides
//! graceful shutdown with a bounded timeout.

use std::{sync::Arc, time::Duration};

use courier_core::Clock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    processor::Processor,
};

/// Configuration for the delivery worker pool.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Maximum messages to claim per batch.
    pub batch_limit: usize,

    /// How often workers poll when the queue is drained.
    pub poll_interval: Duration,

    /// Maximum time to wait for workers to complete on shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_limit: crate::DEFAULT_BATCH_LIMIT,
            poll_interval: Duration::from_secs(1),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Individual worker that drains the queue until cancelled.
pub struct DeliveryWorker {
    id: usize,
    processor: Arc<Processor>,
    config: DeliveryConfig,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    /// Creates a new delivery worker.
    pub fn new(
        id: usize,
        processor: Arc<Processor>,
        config: DeliveryConfig,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, processor, config, cancellation_token, clock }
    }

    /// Main worker loop — claims and processes batches until cancelled.
    ///
    /// # Errors
    ///
    /// Never returns an error today; batch failures are logged and retried
    /// after a backoff.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "delivery worker received shutdown signal");
                break;
            }

            match self.processor.process_batch(self.config.batch_limit).await {
                Ok(outcome) => {
                    if outcome.claimed == 0 {
                        tokio::select! {
                            () = self.clock.sleep(self.config.poll_interval) => {}
                            () = self.cancellation_token.cancelled() => break,
                        }
                    } else {
                        debug!(
                            worker_id = self.id,
                            claimed = outcome.claimed,
                            delivered = outcome.delivered,
                            requeued = outcome.requeued,
                            "batch processed"
                        );
                    }
                },
                Err(error) => {
                    error!(
                        worker_id = self.id,
                        error = %error,
                        "batch processing failed"
                    );
                    // Back off to avoid tight error loops against a
                    // struggling store.
                    tokio::select! {
                        () = self.clock.sleep(Duration::from_secs(5)) => {}
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
        Ok(())
    }
}

/// Worker pool managing delivery tasks with supervision.
pub struct WorkerPool {
    processor: Arc<Processor>,
    config: DeliveryConfig,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Creates a new worker pool over the given processor.
    pub fn new(processor: Arc<Processor>, config: DeliveryConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            processor,
            config,
            cancellation_token: CancellationToken::new(),
            worker_handles: Vec::new(),
            clock,
        }
    }

    /// Spawns all configured workers and returns immediately.
    pub fn spawn_workers(&mut self) {
        info!(worker_count = self.config.worker_count, "spawning delivery workers");

        for worker_id in 0..self.config.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.processor.clone(),
                self.config.clone(),
                self.cancellation_token.clone(),
                self.clock.clone(),
            );

            let handle = tokio::spawn(async move { worker.run().await });
            self.worker_handles.push(handle);
        }
    }

    /// Gracefully shuts down all workers.
    ///
    /// Signals cancellation and waits for workers to finish their current
    /// batch within `timeout`.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers do not stop in time.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let shutdown_future = async {
            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(
                            worker_id,
                            error = %error,
                            "worker completed with error during shutdown"
                        );
                    },
                    Err(join_error) => {
                        error!(
                            worker_id,
                            error = %join_error,
                            "worker task panicked during shutdown"
                        );
                    },
                }
            }
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(()) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Checks whether any workers are still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.worker_handles.iter().any(|h| !h.is_finished())
            && !self.cancellation_token.is_cancelled()
        {
            warn!("WorkerPool dropped without graceful shutdown, cancelling workers");
            self.cancellation_token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use courier_core::{MailPayload, SystemClock};

    use super::*;
    use crate::{
        enqueue::{EnqueueOptions, Enqueuer},
        store::{mem::MemoryQueueStore, QueueStore},
        transport::mock::ScriptedTransport,
    };

    fn test_pool(
        store: Arc<MemoryQueueStore>,
        transport: Arc<ScriptedTransport>,
        worker_count: usize,
    ) -> WorkerPool {
        let processor = Arc::new(Processor::new(store, transport));
        let config = DeliveryConfig {
            worker_count,
            poll_interval: Duration::from_millis(10),
            ..Default::default()
        };
        WorkerPool::new(processor, config, Arc::new(SystemClock::new()))
    }

    #[tokio::test]
    async fn pool_spawns_configured_number_of_workers() {
        let store = Arc::new(MemoryQueueStore::new());
        let transport = Arc::new(ScriptedTransport::succeeding());
        let mut pool = test_pool(store, transport, 4);

        pool.spawn_workers();
        assert_eq!(pool.worker_handles.len(), 4);
        assert!(pool.has_active_workers());

        pool.shutdown_graceful(Duration::from_secs(2))
            .await
            .expect("graceful shutdown should succeed");
    }

    #[tokio::test]
    async fn workers_drain_the_queue() {
        let store = Arc::new(MemoryQueueStore::new());
        let transport = Arc::new(ScriptedTransport::succeeding());
        let enqueuer = Enqueuer::new(store.clone());

        for i in 0..5 {
            enqueuer
                .enqueue(
                    MailPayload::plain(
                        format!("message {i}"),
                        "body",
                        "sender@example.com",
                        "user@example.com",
                    ),
                    EnqueueOptions::default(),
                )
                .await
                .unwrap();
        }

        let mut pool = test_pool(store.clone(), transport.clone(), 2);
        pool.spawn_workers();

        // Wait for the workers to drain the queue, bounded so a regression
        // fails instead of hanging.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while store.count().await.unwrap() > 0 {
            assert!(tokio::time::Instant::now() < deadline, "queue was not drained in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        pool.shutdown_graceful(Duration::from_secs(2))
            .await
            .expect("graceful shutdown should succeed");

        assert_eq!(transport.attempt_count().await, 5);
    }

    #[tokio::test]
    async fn shutdown_without_spawn_completes_immediately() {
        let store = Arc::new(MemoryQueueStore::new());
        let transport = Arc::new(ScriptedTransport::succeeding());
        let pool = test_pool(store, transport, 3);

        let result = pool.shutdown_graceful(Duration::from_millis(50)).await;
        assert!(result.is_ok());
    }
}
