//! Kafka Batch Source
//!
//! Pulls records from the market data topic into batches with manual
//! offset management. Auto-commit is off: a batch is committed only when
//! the consumer loop acknowledges it, and rewound to its first offsets when
//! the loop asks for redelivery.
//!
//! A batch closes at `max_batch_size` records or `max_batch_wait` after its
//! first record, whichever comes first.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use market_events::{BusSettings, MarketDataEvent};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::KafkaError;
use rdkafka::message::BorrowedMessage;
use rdkafka::util::Timeout;
use rdkafka::{Message, Offset, TopicPartitionList};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::application::ports::{Batch, BatchSourcePort, BusError};
use crate::infrastructure::metrics::record_record_skipped;

/// Bound on a single seek.
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// Consumer group, topic and batching.
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Topic to consume.
    pub topic: String,
    /// Consumer group id.
    pub group_id: String,
    /// Independent consumer loops in the group.
    pub listener_threads: usize,
    /// Records per batch at most.
    pub max_batch_size: usize,
    /// How long to wait after the first record for the batch to fill.
    pub max_batch_wait: Duration,
    /// Redeliveries of a failing batch before it is acknowledged anyway.
    /// Zero means no limit.
    pub max_redeliveries: u32,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            topic: market_events::DEFAULT_MARKET_DATA_TOPIC.to_string(),
            group_id: "analysis-service-group".to_string(),
            listener_threads: 3,
            max_batch_size: 100,
            max_batch_wait: Duration::from_millis(500),
            max_redeliveries: 9,
        }
    }
}

impl ConsumerSettings {
    /// Full client config for one consumer.
    #[must_use]
    pub fn client_config(&self, bus: &BusSettings) -> rdkafka::ClientConfig {
        let mut cfg = bus.client_config();
        cfg.set("group.id", &self.group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .set("enable.partition.eof", "false")
            .set("fetch.min.bytes", "1024")
            .set("fetch.wait.max.ms", "500");
        cfg
    }
}

/// Kafka-backed [`BatchSourcePort`]. One instance per consumer loop.
pub struct KafkaBatchSource {
    consumer: Arc<StreamConsumer>,
    settings: ConsumerSettings,
    shutdown: CancellationToken,
}

impl KafkaBatchSource {
    /// Create a consumer and subscribe it to the topic.
    ///
    /// # Errors
    ///
    /// Returns an error if librdkafka rejects the configuration or the
    /// subscription.
    pub fn new(
        bus: &BusSettings,
        settings: ConsumerSettings,
        shutdown: CancellationToken,
    ) -> Result<Self, KafkaError> {
        let consumer: StreamConsumer = settings.client_config(bus).create()?;
        consumer.subscribe(&[settings.topic.as_str()])?;

        tracing::info!(
            brokers = %bus.bootstrap_servers,
            topic = %settings.topic,
            group_id = %settings.group_id,
            "Kafka consumer subscribed"
        );

        Ok(Self {
            consumer: Arc::new(consumer),
            settings,
            shutdown,
        })
    }

    fn push_message(&self, batch: &mut Batch, message: &BorrowedMessage<'_>) {
        let partition = message.partition();
        let offset = message.offset();

        let decoded = match message.payload() {
            Some(bytes) => MarketDataEvent::from_bytes(bytes).map_err(|e| e.to_string()),
            None => Err("record has no value".to_string()),
        };

        match decoded {
            Ok(event) => batch.push_event(partition, offset, event),
            Err(e) => {
                record_record_skipped();
                tracing::error!(
                    topic = %self.settings.topic,
                    partition,
                    offset,
                    error = %e,
                    "Skipping record that is not a market data envelope"
                );
                batch.push_skipped(partition, offset);
            }
        }
    }
}

#[async_trait]
impl BatchSourcePort for KafkaBatchSource {
    async fn next_batch(&self) -> Result<Option<Batch>, BusError> {
        let mut batch = Batch::new(self.settings.topic.clone());

        tokio::select! {
            biased;
            () = self.shutdown.cancelled() => return Ok(None),
            first = self.consumer.recv() => {
                let message = first.map_err(|e| BusError::Receive(e.to_string()))?;
                self.push_message(&mut batch, &message);
            }
        }

        let deadline = Instant::now() + self.settings.max_batch_wait;
        while batch.record_count() < self.settings.max_batch_size {
            match tokio::time::timeout_at(deadline, self.consumer.recv()).await {
                Ok(Ok(message)) => self.push_message(&mut batch, &message),
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "Receive failed mid-batch, closing batch early");
                    break;
                }
                Err(_) => break,
            }
        }

        Ok(Some(batch))
    }

    async fn acknowledge(&self, batch: &Batch) -> Result<(), BusError> {
        let mut offsets = TopicPartitionList::new();
        for range in &batch.ranges {
            offsets
                .add_partition_offset(
                    &batch.topic,
                    range.partition,
                    Offset::Offset(range.last_offset + 1),
                )
                .map_err(|e| BusError::Commit(e.to_string()))?;
        }

        let consumer = Arc::clone(&self.consumer);
        tokio::task::spawn_blocking(move || consumer.commit(&offsets, CommitMode::Sync))
            .await
            .map_err(|e| BusError::Commit(e.to_string()))?
            .map_err(|e| BusError::Commit(e.to_string()))
    }

    async fn redeliver(&self, batch: &Batch) -> Result<(), BusError> {
        let consumer = Arc::clone(&self.consumer);
        let topic = batch.topic.clone();
        let ranges = batch.ranges.clone();

        tokio::task::spawn_blocking(move || {
            for range in ranges {
                consumer.seek(
                    &topic,
                    range.partition,
                    Offset::Offset(range.first_offset),
                    Timeout::After(SEEK_TIMEOUT),
                )?;
            }
            Ok::<(), KafkaError>(())
        })
        .await
        .map_err(|e| BusError::Seek(e.to_string()))?
        .map_err(|e| BusError::Seek(e.to_string()))
    }
}
