//! Batch Source Port (Driving Port)
//!
//! Delivers bus records in batches with manual, batch-granular
//! acknowledgement. A batch that is not acknowledged is redelivered whole.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use market_events::MarketDataEvent;
use parking_lot::Mutex;

/// Bus errors.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// Receiving from the bus failed.
    #[error("receive failed: {0}")]
    Receive(String),

    /// Committing offsets failed.
    #[error("commit failed: {0}")]
    Commit(String),

    /// Rewinding for redelivery failed.
    #[error("seek failed: {0}")]
    Seek(String),
}

/// Offsets a batch covers on one partition, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    /// Partition number.
    pub partition: i32,
    /// First offset in the batch.
    pub first_offset: i64,
    /// Last offset in the batch.
    pub last_offset: i64,
}

/// One delivery from the bus.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    /// Topic the records came from.
    pub topic: String,
    /// Decoded envelopes, in delivery order.
    pub events: Vec<MarketDataEvent>,
    /// Offsets covered, including skipped records.
    pub ranges: Vec<PartitionRange>,
    /// Records that could not be decoded.
    pub skipped: usize,
}

impl Batch {
    /// Empty batch for `topic`.
    #[must_use]
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Add a decoded record.
    pub fn push_event(&mut self, partition: i32, offset: i64, event: MarketDataEvent) {
        self.track(partition, offset);
        self.events.push(event);
    }

    /// Account for a record that could not be decoded. It is still covered
    /// by the acknowledgement.
    pub fn push_skipped(&mut self, partition: i32, offset: i64) {
        self.track(partition, offset);
        self.skipped += 1;
    }

    /// Decoded events in the batch.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the batch holds no decoded events.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Total records delivered, decoded or not.
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.events.len() + self.skipped
    }

    /// Identity of the batch across redeliveries: the first offset on each
    /// partition.
    #[must_use]
    pub fn key(&self) -> Vec<(i32, i64)> {
        let mut key: Vec<(i32, i64)> = self
            .ranges
            .iter()
            .map(|r| (r.partition, r.first_offset))
            .collect();
        key.sort_unstable();
        key
    }

    fn track(&mut self, partition: i32, offset: i64) {
        if let Some(range) = self.ranges.iter_mut().find(|r| r.partition == partition) {
            range.first_offset = range.first_offset.min(offset);
            range.last_offset = range.last_offset.max(offset);
        } else {
            self.ranges.push(PartitionRange {
                partition,
                first_offset: offset,
                last_offset: offset,
            });
        }
    }
}

/// Port for batch delivery from the bus.
#[async_trait]
pub trait BatchSourcePort: Send + Sync {
    /// Wait for the next batch. `None` means the source is closed.
    async fn next_batch(&self) -> Result<Option<Batch>, BusError>;

    /// Commit every record in `batch`.
    async fn acknowledge(&self, batch: &Batch) -> Result<(), BusError>;

    /// Arrange for every record in `batch` to be delivered again.
    async fn redeliver(&self, batch: &Batch) -> Result<(), BusError>;
}

/// In-memory batch source for testing.
///
/// Redelivered batches go back to the front of the queue. The source
/// closes once the queue is empty.
#[derive(Debug, Default)]
pub struct InMemoryBatchSource {
    pending: Mutex<VecDeque<Batch>>,
    acknowledged: Mutex<Vec<Batch>>,
    next_offset: AtomicI64,
    deliveries: AtomicUsize,
    redeliveries: AtomicUsize,
}

impl InMemoryBatchSource {
    /// Create an empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `events` as one batch on partition 0 with consecutive offsets.
    pub fn enqueue(&self, events: Vec<MarketDataEvent>) {
        let mut batch = Batch::new("in-memory");
        for event in events {
            let offset = self.next_offset.fetch_add(1, Ordering::Relaxed);
            batch.push_event(0, offset, event);
        }
        self.pending.lock().push_back(batch);
    }

    /// Queue a prepared batch.
    pub fn enqueue_batch(&self, batch: Batch) {
        self.pending.lock().push_back(batch);
    }

    /// Batches acknowledged so far.
    #[must_use]
    pub fn acknowledged(&self) -> Vec<Batch> {
        self.acknowledged.lock().clone()
    }

    /// Batches handed out, redeliveries included.
    #[must_use]
    pub fn deliveries(&self) -> usize {
        self.deliveries.load(Ordering::Relaxed)
    }

    /// Number of redelivery requests.
    #[must_use]
    pub fn redeliveries(&self) -> usize {
        self.redeliveries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BatchSourcePort for InMemoryBatchSource {
    async fn next_batch(&self) -> Result<Option<Batch>, BusError> {
        let batch = self.pending.lock().pop_front();
        if batch.is_some() {
            self.deliveries.fetch_add(1, Ordering::Relaxed);
        }
        Ok(batch)
    }

    async fn acknowledge(&self, batch: &Batch) -> Result<(), BusError> {
        self.acknowledged.lock().push(batch.clone());
        Ok(())
    }

    async fn redeliver(&self, batch: &Batch) -> Result<(), BusError> {
        self.redeliveries.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().push_front(batch.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(n: usize) -> MarketDataEvent {
        MarketDataEvent::new(format!(r#"{{"n":{n}}}"#), "coinbase")
    }

    #[test]
    fn ranges_span_each_partition() {
        let mut batch = Batch::new("t");
        batch.push_event(1, 10, event(0));
        batch.push_event(0, 5, event(1));
        batch.push_skipped(1, 11);
        batch.push_event(1, 12, event(2));

        assert_eq!(batch.len(), 3);
        assert_eq!(batch.record_count(), 4);
        assert_eq!(
            batch.ranges,
            vec![
                PartitionRange {
                    partition: 1,
                    first_offset: 10,
                    last_offset: 12
                },
                PartitionRange {
                    partition: 0,
                    first_offset: 5,
                    last_offset: 5
                },
            ]
        );
        assert_eq!(batch.key(), vec![(0, 5), (1, 10)]);
    }

    #[tokio::test]
    async fn redelivered_batch_comes_back_first() {
        let source = InMemoryBatchSource::new();
        source.enqueue(vec![event(0), event(1)]);
        source.enqueue(vec![event(2)]);

        let first = source.next_batch().await.unwrap().unwrap();
        source.redeliver(&first).await.unwrap();

        let again = source.next_batch().await.unwrap().unwrap();
        assert_eq!(again.key(), first.key());
        assert_eq!(again.events, first.events);

        source.acknowledge(&again).await.unwrap();
        let second = source.next_batch().await.unwrap().unwrap();
        assert_eq!(second.key(), vec![(0, 2)]);

        assert!(source.next_batch().await.unwrap().is_none());
        assert_eq!(source.deliveries(), 3);
        assert_eq!(source.redeliveries(), 1);
        assert_eq!(source.acknowledged().len(), 1);
    }
}
