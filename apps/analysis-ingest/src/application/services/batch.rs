//! Batch Processor
//!
//! Fans one bus batch out into per-event tasks (parse, persist, dispatch)
//! on the worker pool and waits for all of them. A task that fails to
//! persist still counts as handled; a task that panics fails the batch so
//! it is not acknowledged.

use std::sync::Arc;
use std::time::Instant;

use futures_util::future::join_all;
use market_events::MarketDataEvent;

use crate::application::services::dispatcher::AnalysisDispatcher;
use crate::application::services::parser::parse_tick;
use crate::application::services::persistence::TickWriter;
use crate::application::services::worker_pool::{PoolError, PoolTask, WorkerPool};
use crate::infrastructure::metrics::record_batch_duration;

/// Counts for one processed batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Events in the batch.
    pub total: usize,
    /// Events that parsed into a tick.
    pub parsed: usize,
    /// Ticks stored (and dispatched).
    pub persisted: usize,
}

impl BatchOutcome {
    /// Parsed ticks the store rejected.
    #[must_use]
    pub const fn persist_failures(&self) -> usize {
        self.parsed - self.persisted
    }
}

/// A batch that must not be acknowledged.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    /// An event task did not complete.
    #[error("event {index} of {total} did not complete: {source}")]
    TaskFailed {
        /// Position of the event in the batch.
        index: usize,
        /// Events in the batch.
        total: usize,
        /// Why the task failed.
        #[source]
        source: PoolError,
    },
}

/// What happened to one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventOutcome {
    Unparsed,
    NotPersisted,
    Persisted,
}

/// Runs batches through parse, persist and dispatch.
pub struct BatchProcessor {
    pool: Arc<WorkerPool>,
    writer: TickWriter,
    dispatcher: AnalysisDispatcher,
}

impl BatchProcessor {
    /// Create a processor.
    #[must_use]
    pub const fn new(pool: Arc<WorkerPool>, writer: TickWriter, dispatcher: AnalysisDispatcher) -> Self {
        Self {
            pool,
            writer,
            dispatcher,
        }
    }

    /// Process every event in `events` and wait for all of them.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::TaskFailed`] if any event task panicked or was
    /// aborted. The other tasks still run to completion first.
    pub async fn process(&self, events: &[MarketDataEvent]) -> Result<BatchOutcome, BatchError> {
        let started = Instant::now();
        let total = events.len();

        let mut tasks: Vec<PoolTask<EventOutcome>> = Vec::with_capacity(total);
        for event in events.iter().cloned() {
            let writer = self.writer.clone();
            let dispatcher = self.dispatcher.clone();
            tasks.push(self.pool.submit(handle_event(event, writer, dispatcher)).await);
        }

        let results = join_all(tasks.into_iter().map(PoolTask::join)).await;
        record_batch_duration(started.elapsed());

        let mut outcome = BatchOutcome {
            total,
            ..BatchOutcome::default()
        };
        let mut failure = None;
        for (index, result) in results.into_iter().enumerate() {
            match result {
                Ok(EventOutcome::Persisted) => {
                    outcome.parsed += 1;
                    outcome.persisted += 1;
                }
                Ok(EventOutcome::NotPersisted) => outcome.parsed += 1,
                Ok(EventOutcome::Unparsed) => {}
                Err(e) => {
                    tracing::error!(index, total, error = %e, "Event task failed");
                    failure.get_or_insert((index, e));
                }
            }
        }

        if let Some((index, source)) = failure {
            return Err(BatchError::TaskFailed {
                index,
                total,
                source,
            });
        }

        tracing::debug!(
            total,
            parsed = outcome.parsed,
            persisted = outcome.persisted,
            persist_failures = outcome.persist_failures(),
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Batch processed"
        );
        Ok(outcome)
    }
}

async fn handle_event(
    event: MarketDataEvent,
    writer: TickWriter,
    dispatcher: AnalysisDispatcher,
) -> EventOutcome {
    let Some(tick) = parse_tick(&event) else {
        return EventOutcome::Unparsed;
    };

    if !writer.persist(&tick).await {
        return EventOutcome::NotPersisted;
    }

    dispatcher.dispatch(tick);
    EventOutcome::Persisted
}
