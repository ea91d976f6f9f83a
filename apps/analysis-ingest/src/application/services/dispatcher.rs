//! Analysis Dispatcher
//!
//! Hands a persisted tick to the analysis port on the shared worker pool
//! and returns without waiting, even when the pool is saturated. Analysis
//! errors and panics are logged and stop here.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;

use crate::application::ports::AnalysisPort;
use crate::application::services::worker_pool::{PoolError, WorkerPool};
use crate::domain::tick::Tick;
use crate::infrastructure::metrics::{DispatchOutcome, record_dispatch};

/// Fire-and-forget hand-off to analysis.
#[derive(Clone)]
pub struct AnalysisDispatcher {
    pool: Arc<WorkerPool>,
    analysis: Arc<dyn AnalysisPort>,
}

impl AnalysisDispatcher {
    /// Create a dispatcher running `analysis` on `pool`.
    #[must_use]
    pub fn new(pool: Arc<WorkerPool>, analysis: Arc<dyn AnalysisPort>) -> Self {
        Self { pool, analysis }
    }

    /// Schedule analysis of `tick`.
    ///
    /// Never runs the analysis on the caller, so a slow analyzer cannot
    /// hold up the batch that stored the tick.
    pub fn dispatch(&self, tick: Tick) {
        let analysis = Arc::clone(&self.analysis);
        let task = self.pool.submit_detached(async move {
            let product_id = tick.product_id.clone();
            match AssertUnwindSafe(analysis.analyze(tick)).catch_unwind().await {
                Ok(Ok(())) => record_dispatch(DispatchOutcome::Completed),
                Ok(Err(e)) => {
                    record_dispatch(DispatchOutcome::Failed);
                    tracing::error!(product_id = %product_id, error = %e, "Analysis failed");
                }
                Err(_) => {
                    record_dispatch(DispatchOutcome::Failed);
                    tracing::error!(product_id = %product_id, "Analysis panicked");
                }
            }
        });

        // Only a rejection completes immediately; spawned work is detached.
        if task.ran_inline() {
            record_dispatch(DispatchOutcome::Rejected);
            tracing::warn!(error = %PoolError::ShutDown, "Analysis not dispatched");
        }
    }
}
