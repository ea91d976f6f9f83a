//! Analysis Port (Driven Port)
//!
//! Downstream consumer of persisted ticks. Whatever sits behind this port
//! must not be able to fail the batch that produced the tick.

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::tick::Tick;

/// Analysis failure. Logged by the dispatcher and otherwise dropped.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The tick could not be analysed.
    #[error("analysis failed for {product_id}: {reason}")]
    Failed {
        /// Product of the tick.
        product_id: String,
        /// What went wrong.
        reason: String,
    },
}

/// Port for downstream analysis.
#[async_trait]
pub trait AnalysisPort: Send + Sync {
    /// Analyse one persisted tick.
    async fn analyze(&self, tick: Tick) -> Result<(), AnalysisError>;
}

/// Analysis that does nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpAnalysis;

#[async_trait]
impl AnalysisPort for NoOpAnalysis {
    async fn analyze(&self, _tick: Tick) -> Result<(), AnalysisError> {
        Ok(())
    }
}

/// Records every tick it receives. For tests.
#[derive(Debug, Default)]
pub struct InMemoryAnalysis {
    ticks: Mutex<Vec<Tick>>,
}

impl InMemoryAnalysis {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ticks received so far.
    #[must_use]
    pub fn ticks(&self) -> Vec<Tick> {
        self.ticks.lock().clone()
    }

    /// Number of ticks received.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ticks.lock().len()
    }

    /// Whether nothing was received.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ticks.lock().is_empty()
    }
}

#[async_trait]
impl AnalysisPort for InMemoryAnalysis {
    async fn analyze(&self, tick: Tick) -> Result<(), AnalysisError> {
        self.ticks.lock().push(tick);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn tick(product_id: &str) -> Tick {
        Tick::new(product_id, "coinbase", Utc::now(), Utc::now())
    }

    #[tokio::test]
    async fn no_op_accepts_everything() {
        assert!(NoOpAnalysis.analyze(tick("BTC-USD")).await.is_ok());
    }

    #[tokio::test]
    async fn in_memory_keeps_arrival_order() {
        let analysis = InMemoryAnalysis::new();
        analysis.analyze(tick("BTC-USD")).await.unwrap();
        analysis.analyze(tick("ETH-USD")).await.unwrap();

        let products: Vec<_> = analysis.ticks().into_iter().map(|t| t.product_id).collect();
        assert_eq!(products, ["BTC-USD", "ETH-USD"]);
    }
}
