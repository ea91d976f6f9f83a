//! Event Forwarder
//!
//! Drains the connector channel into the bus publisher. Publish failures
//! are logged and the frame is skipped; the stream keeps going.

use std::sync::Arc;

use market_events::MarketDataEvent;
use tokio::sync::mpsc;

use crate::application::ports::EventPublisherPort;

/// Single consumer of the connector -> bus channel.
pub struct EventForwarder {
    rx: mpsc::Receiver<MarketDataEvent>,
    publisher: Arc<dyn EventPublisherPort>,
}

impl EventForwarder {
    /// Create a forwarder over `rx`.
    #[must_use]
    pub fn new(rx: mpsc::Receiver<MarketDataEvent>, publisher: Arc<dyn EventPublisherPort>) -> Self {
        Self { rx, publisher }
    }

    /// Forward until every sender is dropped, then flush.
    ///
    /// Returns the number of events the publisher accepted.
    pub async fn run(mut self) -> u64 {
        let mut forwarded = 0_u64;
        while let Some(event) = self.rx.recv().await {
            let source = event.source.clone();
            match self.publisher.publish(event).await {
                Ok(()) => forwarded += 1,
                Err(e) => tracing::warn!(source = %source, error = %e, "Frame not published"),
            }
        }
        self.publisher.flush().await;
        tracing::info!(forwarded, "Event forwarder stopped");
        forwarded
    }
}
