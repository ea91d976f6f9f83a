//! Consumer Loop
//!
//! One loop per listener: pull a batch, process it, then acknowledge it or
//! ask for redelivery. Persistence failures inside a batch do not block the
//! acknowledgement; a failed event task does.
//!
//! A batch that keeps failing is redelivered `max_redeliveries` times, then
//! logged and acknowledged so the partition can make progress. Zero means
//! redeliver forever.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Batch, BatchSourcePort};
use crate::application::services::batch::BatchProcessor;
use crate::infrastructure::metrics::{
    BatchResult, record_batch_received, record_batch_result, record_bus_error,
};

/// Pause after a failed receive before polling again.
const RECEIVE_BACKOFF: Duration = Duration::from_secs(1);

/// Counters shared by every consumer loop, read by the health endpoint.
#[derive(Debug, Default)]
pub struct ConsumerStats {
    running: AtomicUsize,
    batches: AtomicU64,
    acknowledged: AtomicU64,
    redelivered: AtomicU64,
    forced: AtomicU64,
    persisted: AtomicU64,
    last_batch_at: Mutex<Option<DateTime<Utc>>>,
}

impl ConsumerStats {
    /// Loops currently running.
    #[must_use]
    pub fn running(&self) -> usize {
        self.running.load(Ordering::Relaxed)
    }

    /// Batches received.
    #[must_use]
    pub fn batches(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    /// Batches acknowledged after processing.
    #[must_use]
    pub fn acknowledged(&self) -> u64 {
        self.acknowledged.load(Ordering::Relaxed)
    }

    /// Redelivery requests.
    #[must_use]
    pub fn redelivered(&self) -> u64 {
        self.redelivered.load(Ordering::Relaxed)
    }

    /// Batches acknowledged after exhausting redeliveries.
    #[must_use]
    pub fn forced(&self) -> u64 {
        self.forced.load(Ordering::Relaxed)
    }

    /// Ticks stored across all batches.
    #[must_use]
    pub fn persisted(&self) -> u64 {
        self.persisted.load(Ordering::Relaxed)
    }

    /// When the last batch arrived.
    #[must_use]
    pub fn last_batch_at(&self) -> Option<DateTime<Utc>> {
        *self.last_batch_at.lock()
    }
}

/// Consecutive failures of one batch.
struct FailureStreak {
    key: Vec<(i32, i64)>,
    attempts: u32,
}

/// Drives one batch source until shutdown or until the source closes.
pub struct ConsumerLoop {
    id: usize,
    source: Arc<dyn BatchSourcePort>,
    processor: Arc<BatchProcessor>,
    max_redeliveries: u32,
    shutdown: CancellationToken,
    stats: Arc<ConsumerStats>,
    streak: Option<FailureStreak>,
}

impl ConsumerLoop {
    /// Create a loop.
    #[must_use]
    pub const fn new(
        id: usize,
        source: Arc<dyn BatchSourcePort>,
        processor: Arc<BatchProcessor>,
        max_redeliveries: u32,
        shutdown: CancellationToken,
        stats: Arc<ConsumerStats>,
    ) -> Self {
        Self {
            id,
            source,
            processor,
            max_redeliveries,
            shutdown,
            stats,
            streak: None,
        }
    }

    /// Run until shutdown is requested or the source closes.
    ///
    /// Shutdown is only observed between batches; a batch in flight is
    /// always finished first.
    pub async fn run(mut self) {
        self.stats.running.fetch_add(1, Ordering::Relaxed);
        tracing::info!(consumer = self.id, "Consumer loop started");

        loop {
            let next = tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                next = self.source.next_batch() => next,
            };

            match next {
                Ok(Some(batch)) => self.handle(batch).await,
                Ok(None) => {
                    tracing::info!(consumer = self.id, "Batch source closed");
                    break;
                }
                Err(e) => {
                    record_bus_error();
                    tracing::error!(consumer = self.id, error = %e, "Failed to receive batch");
                    tokio::select! {
                        () = self.shutdown.cancelled() => break,
                        () = tokio::time::sleep(RECEIVE_BACKOFF) => {}
                    }
                }
            }
        }

        self.stats.running.fetch_sub(1, Ordering::Relaxed);
        tracing::info!(consumer = self.id, "Consumer loop stopped");
    }

    async fn handle(&mut self, batch: Batch) {
        self.stats.batches.fetch_add(1, Ordering::Relaxed);
        *self.stats.last_batch_at.lock() = Some(Utc::now());
        record_batch_received(batch.record_count());

        match self.processor.process(&batch.events).await {
            Ok(outcome) => {
                self.streak = None;
                self.stats
                    .persisted
                    .fetch_add(outcome.persisted as u64, Ordering::Relaxed);
                tracing::debug!(
                    consumer = self.id,
                    records = batch.record_count(),
                    skipped = batch.skipped,
                    persisted = outcome.persisted,
                    "Batch done"
                );
                self.acknowledge(&batch, BatchResult::Acknowledged).await;
            }
            Err(e) => {
                let key = batch.key();
                let attempts = match &self.streak {
                    Some(streak) if streak.key == key => streak.attempts + 1,
                    _ => 1,
                };

                if self.max_redeliveries != 0 && attempts > self.max_redeliveries {
                    tracing::error!(
                        consumer = self.id,
                        attempts,
                        error = %e,
                        "Batch failed after redelivery limit, acknowledging to move on"
                    );
                    self.streak = None;
                    self.stats.forced.fetch_add(1, Ordering::Relaxed);
                    self.acknowledge(&batch, BatchResult::Forced).await;
                    return;
                }

                tracing::warn!(
                    consumer = self.id,
                    attempts,
                    error = %e,
                    "Batch failed, requesting redelivery"
                );
                self.streak = Some(FailureStreak { key, attempts });
                self.stats.redelivered.fetch_add(1, Ordering::Relaxed);
                record_batch_result(BatchResult::Redelivered);
                if let Err(e) = self.source.redeliver(&batch).await {
                    record_bus_error();
                    tracing::error!(consumer = self.id, error = %e, "Failed to rewind for redelivery");
                }
            }
        }
    }

    async fn acknowledge(&self, batch: &Batch, result: BatchResult) {
        match self.source.acknowledge(batch).await {
            Ok(()) => {
                self.stats.acknowledged.fetch_add(1, Ordering::Relaxed);
                record_batch_result(result);
            }
            Err(e) => {
                // Uncommitted records come back after the next rebalance.
                record_bus_error();
                tracing::error!(consumer = self.id, error = %e, "Failed to acknowledge batch");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use market_events::MarketDataEvent;

    use super::*;
    use crate::application::ports::{
        InMemoryAnalysis, InMemoryBatchSource, PersistenceError, TickRepositoryPort,
    };
    use crate::application::services::dispatcher::AnalysisDispatcher;
    use crate::application::services::persistence::TickWriter;
    use crate::application::services::worker_pool::{WorkerPool, WorkerPoolSettings};
    use crate::domain::tick::Tick;

    /// Panics on every insert.
    struct Exploding;

    #[async_trait]
    impl TickRepositoryPort for Exploding {
        async fn insert(&self, _tick: &Tick) -> Result<(), PersistenceError> {
            panic!("driver bug")
        }
    }

    fn consumer(
        source: Arc<InMemoryBatchSource>,
        repository: Arc<dyn TickRepositoryPort>,
        max_redeliveries: u32,
        stats: Arc<ConsumerStats>,
    ) -> ConsumerLoop {
        let pool = Arc::new(WorkerPool::new(WorkerPoolSettings::default()));
        let processor = BatchProcessor::new(
            Arc::clone(&pool),
            TickWriter::new(repository),
            AnalysisDispatcher::new(pool, Arc::new(InMemoryAnalysis::new())),
        );
        ConsumerLoop::new(
            0,
            source,
            Arc::new(processor),
            max_redeliveries,
            CancellationToken::new(),
            stats,
        )
    }

    fn ticker() -> MarketDataEvent {
        MarketDataEvent::new(r#"{"product_id":"BTC-USD","price":"1"}"#, "coinbase")
    }

    #[tokio::test]
    async fn failing_batch_is_forced_through_after_limit() {
        let source = Arc::new(InMemoryBatchSource::new());
        source.enqueue(vec![ticker()]);
        let stats = Arc::new(ConsumerStats::default());

        consumer(source.clone(), Arc::new(Exploding), 3, stats.clone())
            .run()
            .await;

        assert_eq!(source.deliveries(), 4);
        assert_eq!(source.redeliveries(), 3);
        assert_eq!(source.acknowledged().len(), 1);
        assert_eq!(stats.forced(), 1);
        assert_eq!(stats.redelivered(), 3);
        assert_eq!(stats.running(), 0);
    }

    #[tokio::test]
    async fn shutdown_stops_waiting_loop() {
        struct Never;

        #[async_trait]
        impl BatchSourcePort for Never {
            async fn next_batch(&self) -> Result<Option<Batch>, crate::application::ports::BusError> {
                std::future::pending().await
            }
            async fn acknowledge(&self, _: &Batch) -> Result<(), crate::application::ports::BusError> {
                Ok(())
            }
            async fn redeliver(&self, _: &Batch) -> Result<(), crate::application::ports::BusError> {
                Ok(())
            }
        }

        let pool = Arc::new(WorkerPool::new(WorkerPoolSettings::default()));
        let processor = BatchProcessor::new(
            Arc::clone(&pool),
            TickWriter::new(Arc::new(crate::application::ports::InMemoryTickRepository::new())),
            AnalysisDispatcher::new(pool, Arc::new(InMemoryAnalysis::new())),
        );
        let shutdown = CancellationToken::new();
        let stats = Arc::new(ConsumerStats::default());
        let handle = tokio::spawn(
            ConsumerLoop::new(
                1,
                Arc::new(Never),
                Arc::new(processor),
                9,
                shutdown.clone(),
                stats.clone(),
            )
            .run(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(stats.running(), 1);
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats.running(), 0);
    }
}
