//! Tick Repository Port (Driven Port)
//!
//! Append-only storage for parsed ticks. No upsert and no deduplication:
//! a redelivered event is stored again.
//!
//! Reads go through the separate [`TickQueryPort`]; every query filters on
//! one product and returns the newest rows first.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::domain::bar::{MinuteBar, minute_of};
use crate::domain::tick::Tick;

/// Errors from tick persistence.
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    /// Database connection error.
    #[error("database connection error: {0}")]
    Connection(String),

    /// Query execution error.
    #[error("query error: {0}")]
    Query(String),

    /// Schema migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

/// Port for storing ticks.
#[async_trait]
pub trait TickRepositoryPort: Send + Sync {
    /// Insert one tick row.
    async fn insert(&self, tick: &Tick) -> Result<(), PersistenceError>;
}

/// Port for reading stored ticks back.
#[async_trait]
pub trait TickQueryPort: Send + Sync {
    /// Newest tick for `product_id` by event time.
    async fn latest(&self, product_id: &str) -> Result<Option<Tick>, PersistenceError>;

    /// Ticks with `from <= time <= to`, newest first.
    async fn between(
        &self,
        product_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Tick>, PersistenceError>;

    /// At most `limit` ticks with `time >= since`, newest first.
    async fn recent(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Tick>, PersistenceError>;

    /// One bar per minute with data since `since`, newest bucket first.
    async fn minute_bars(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MinuteBar>, PersistenceError>;
}

/// In-memory implementation for testing.
#[derive(Debug, Default)]
pub struct InMemoryTickRepository {
    rows: Mutex<Vec<Tick>>,
}

impl InMemoryTickRepository {
    /// Create an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every stored row, in insert order.
    #[must_use]
    pub fn rows(&self) -> Vec<Tick> {
        self.rows.lock().clone()
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Whether nothing has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }

    /// Rows stored for `product_id`.
    #[must_use]
    pub fn rows_for(&self, product_id: &str) -> Vec<Tick> {
        self.rows
            .lock()
            .iter()
            .filter(|t| t.product_id == product_id)
            .cloned()
            .collect()
    }

    /// Rows for `product_id` matching `keep`, newest first.
    fn newest_first(&self, product_id: &str, keep: impl Fn(&Tick) -> bool) -> Vec<Tick> {
        let mut rows: Vec<Tick> = self
            .rows
            .lock()
            .iter()
            .filter(|t| t.product_id == product_id && keep(t))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.time.cmp(&a.time));
        rows
    }
}

#[async_trait]
impl TickRepositoryPort for InMemoryTickRepository {
    async fn insert(&self, tick: &Tick) -> Result<(), PersistenceError> {
        self.rows.lock().push(tick.clone());
        Ok(())
    }
}

#[async_trait]
impl TickQueryPort for InMemoryTickRepository {
    async fn latest(&self, product_id: &str) -> Result<Option<Tick>, PersistenceError> {
        Ok(self.newest_first(product_id, |_| true).into_iter().next())
    }

    async fn between(
        &self,
        product_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Tick>, PersistenceError> {
        Ok(self.newest_first(product_id, |t| t.time >= from && t.time <= to))
    }

    async fn recent(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Tick>, PersistenceError> {
        let mut rows = self.newest_first(product_id, |t| t.time >= since);
        rows.truncate(usize::try_from(limit).unwrap_or(usize::MAX));
        Ok(rows)
    }

    async fn minute_bars(
        &self,
        product_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<MinuteBar>, PersistenceError> {
        let mut buckets: BTreeMap<DateTime<Utc>, Vec<Tick>> = BTreeMap::new();
        for tick in self.newest_first(product_id, |t| t.time >= since) {
            buckets.entry(minute_of(tick.time)).or_default().push(tick);
        }
        Ok(buckets
            .into_iter()
            .rev()
            .map(|(bucket, ticks)| aggregate(bucket, &ticks))
            .collect())
    }
}

fn aggregate(bucket: DateTime<Utc>, ticks: &[Tick]) -> MinuteBar {
    let prices: Vec<Decimal> = ticks.iter().filter_map(|t| t.price).collect();
    let volumes: Vec<Decimal> = ticks.iter().filter_map(|t| t.volume_24h).collect();
    let avg_price = (!prices.is_empty())
        .then(|| prices.iter().sum::<Decimal>() / Decimal::from(prices.len()));

    MinuteBar {
        bucket,
        avg_price,
        max_price: prices.iter().max().copied(),
        min_price: prices.iter().min().copied(),
        total_volume: (!volumes.is_empty()).then(|| volumes.iter().sum()),
        ticks: i64::try_from(ticks.len()).unwrap_or(i64::MAX),
    }
}
