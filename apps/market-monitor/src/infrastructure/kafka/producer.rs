//! Kafka Event Publisher
//!
//! Fire-and-forget publication of [`MarketDataEvent`] envelopes.
//!
//! `publish` enqueues the record on the librdkafka queue and returns; a
//! detached task awaits the delivery report and logs failures. The producer
//! is cheap to clone and shared by every connector in the process.

use std::time::Duration;

use async_trait::async_trait;
use market_events::{BusSettings, MarketDataEvent};
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;

use crate::application::ports::{EventPublisherPort, PublishError};
use crate::infrastructure::metrics::{self, PublishStage};

/// Bound on the shutdown flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Producer tuning.
#[derive(Debug, Clone)]
pub struct ProducerSettings {
    /// Topic receiving every event.
    pub topic: String,
    /// Use the frame's `product_id` as the record key.
    pub key_by_symbol: bool,
    /// `acks`.
    pub acks: String,
    /// `linger.ms`.
    pub linger: Duration,
    /// `retries`.
    pub retries: u32,
    /// `batch.size` in bytes.
    pub batch_size: u32,
    /// `message.timeout.ms`.
    pub message_timeout: Duration,
}

impl Default for ProducerSettings {
    fn default() -> Self {
        Self {
            topic: market_events::DEFAULT_MARKET_DATA_TOPIC.to_string(),
            key_by_symbol: false,
            acks: "1".to_string(),
            linger: Duration::from_millis(5),
            retries: 3,
            batch_size: 16_384,
            message_timeout: Duration::from_secs(5),
        }
    }
}

impl ProducerSettings {
    /// Full client config for the producer.
    #[must_use]
    pub fn client_config(&self, bus: &BusSettings) -> rdkafka::ClientConfig {
        let mut cfg = bus.client_config();
        cfg.set("acks", &self.acks)
            .set("linger.ms", self.linger.as_millis().to_string())
            .set("retries", self.retries.to_string())
            .set("batch.size", self.batch_size.to_string())
            .set(
                "message.timeout.ms",
                self.message_timeout.as_millis().to_string(),
            );
        cfg
    }
}

/// Kafka-backed [`EventPublisherPort`].
#[derive(Clone)]
pub struct KafkaEventPublisher {
    producer: FutureProducer,
    settings: ProducerSettings,
}

impl KafkaEventPublisher {
    /// Build the producer.
    ///
    /// # Errors
    ///
    /// Returns an error if librdkafka rejects the configuration.
    pub fn new(bus: &BusSettings, settings: ProducerSettings) -> Result<Self, KafkaError> {
        let producer: FutureProducer = settings.client_config(bus).create()?;
        tracing::info!(
            brokers = %bus.bootstrap_servers,
            topic = %settings.topic,
            key_by_symbol = settings.key_by_symbol,
            "Kafka producer created"
        );
        Ok(Self { producer, settings })
    }

    /// Topic events are sent to.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.settings.topic
    }
}

impl std::fmt::Debug for KafkaEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEventPublisher")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EventPublisherPort for KafkaEventPublisher {
    async fn publish(&self, event: MarketDataEvent) -> Result<(), PublishError> {
        let payload = event.to_json().map_err(|e| PublishError::Serialization {
            message: e.to_string(),
        })?;
        let key = if self.settings.key_by_symbol {
            event.product_id_hint()
        } else {
            None
        };

        let mut record: FutureRecord<'_, String, String> =
            FutureRecord::to(&self.settings.topic).payload(&payload);
        if let Some(key) = &key {
            record = record.key(key);
        }

        let delivery = match self.producer.send_result(record) {
            Ok(delivery) => delivery,
            Err((e, _record)) => {
                metrics::record_publish_failure(&event.source, PublishStage::Enqueue);
                tracing::error!(source = %event.source, error = %e, "Failed to enqueue event");
                return Err(PublishError::Enqueue {
                    message: e.to_string(),
                });
            }
        };
        metrics::record_event_published(&event.source);

        let source = event.source;
        tokio::spawn(async move {
            match delivery.await {
                Ok(Ok(_)) => {}
                Ok(Err((e, _message))) => {
                    metrics::record_publish_failure(&source, PublishStage::Delivery);
                    tracing::error!(source = %source, error = %e, "Event delivery failed");
                }
                Err(_canceled) => {
                    metrics::record_publish_failure(&source, PublishStage::Delivery);
                    tracing::error!(source = %source, "Delivery report dropped");
                }
            }
        });

        Ok(())
    }

    async fn flush(&self) {
        let producer = self.producer.clone();
        let flushed = tokio::task::spawn_blocking(move || {
            producer.flush(Timeout::After(FLUSH_TIMEOUT))
        })
        .await;

        match flushed {
            Ok(Ok(())) => tracing::info!("Kafka producer flushed"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Kafka producer flush incomplete"),
            Err(e) => tracing::warn!(error = %e, "Kafka producer flush task failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn producer_defaults() {
        let settings = ProducerSettings::default();
        assert_eq!(settings.topic, "coinbase-market-data");
        assert!(!settings.key_by_symbol);

        let cfg = settings.client_config(&BusSettings::new("localhost:9092"));
        assert_eq!(cfg.get("bootstrap.servers"), Some("localhost:9092"));
        assert_eq!(cfg.get("acks"), Some("1"));
        assert_eq!(cfg.get("linger.ms"), Some("5"));
        assert_eq!(cfg.get("retries"), Some("3"));
        assert_eq!(cfg.get("batch.size"), Some("16384"));
        assert_eq!(cfg.get("message.timeout.ms"), Some("5000"));
    }
}
