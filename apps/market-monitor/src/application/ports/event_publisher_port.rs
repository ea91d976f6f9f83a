//! Event Publisher Port (Driven Port)
//!
//! Publication of raw exchange frames onto the market data topic.

use async_trait::async_trait;
use market_events::MarketDataEvent;

/// Event publishing error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum PublishError {
    /// Envelope could not be serialized.
    #[error("event serialization error: {message}")]
    Serialization {
        /// Cause.
        message: String,
    },

    /// The producer refused the record (queue full, producer closed).
    #[error("event enqueue failed: {message}")]
    Enqueue {
        /// Cause.
        message: String,
    },
}

/// Port for publishing raw market data events.
#[async_trait]
pub trait EventPublisherPort: Send + Sync {
    /// Hand one event to the bus.
    ///
    /// Delivery is fire-and-forget: `Ok` means the record was accepted for
    /// sending, not that a broker acknowledged it.
    async fn publish(&self, event: MarketDataEvent) -> Result<(), PublishError>;

    /// Flush anything buffered. Called once on shutdown.
    async fn flush(&self) {}
}

/// In-memory publisher for tests and dry runs.
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    events: parking_lot::Mutex<Vec<MarketDataEvent>>,
}

impl InMemoryEventPublisher {
    /// Create an empty publisher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events published so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<MarketDataEvent> {
        self.events.lock().clone()
    }

    /// Number of events published so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl EventPublisherPort for InMemoryEventPublisher {
    async fn publish(&self, event: MarketDataEvent) -> Result<(), PublishError> {
        self.events.lock().push(event);
        Ok(())
    }
}
