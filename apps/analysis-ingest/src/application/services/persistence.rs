//! Tick Writer
//!
//! Inserts one tick per call and reports success as a boolean. Storage
//! errors are logged here and never reach the batch, so a bad row does not
//! hold back acknowledgement.

use std::sync::Arc;

use crate::application::ports::TickRepositoryPort;
use crate::domain::tick::Tick;
use crate::infrastructure::metrics::{record_persist_failure, record_tick_persisted};

/// Writes parsed ticks to the repository.
#[derive(Clone)]
pub struct TickWriter {
    repository: Arc<dyn TickRepositoryPort>,
}

impl TickWriter {
    /// Create a writer over `repository`.
    #[must_use]
    pub fn new(repository: Arc<dyn TickRepositoryPort>) -> Self {
        Self { repository }
    }

    /// Insert `tick`. Returns whether the row was stored.
    pub async fn persist(&self, tick: &Tick) -> bool {
        match self.repository.insert(tick).await {
            Ok(()) => {
                record_tick_persisted(&tick.source);
                tracing::trace!(product_id = %tick.product_id, id = %tick.id, "Tick stored");
                true
            }
            Err(e) => {
                record_persist_failure(&tick.source);
                tracing::error!(
                    product_id = %tick.product_id,
                    source = %tick.source,
                    time = %tick.time,
                    error = %e,
                    "Failed to store tick"
                );
                false
            }
        }
    }
}
