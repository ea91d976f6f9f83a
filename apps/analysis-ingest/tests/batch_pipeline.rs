//! Batch Pipeline Integration Tests
//!
//! Runs bus batches through the consumer loop, batch processor, worker pool
//! and analysis dispatcher against in-memory adapters, and checks what is
//! stored, what is analyzed and what is acknowledged.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use analysis_ingest::{
    AnalysisDispatcher, BatchProcessor, ConsumerLoop, ConsumerStats, InMemoryAnalysis,
    InMemoryBatchSource, InMemoryTickRepository, PersistenceError, RollingWindowAnalyzer, Tick,
    TickRepositoryPort, TickWriter, WorkerPool, WorkerPoolSettings, parse_tick,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use market_events::MarketDataEvent;
use proptest::prelude::*;
use rust_decimal::Decimal;
use tokio_util::sync::CancellationToken;

const DRAIN: Duration = Duration::from_secs(5);

/// The in-memory store plus hooks that fail or slow down inserts.
struct FlakyRepository {
    inner: InMemoryTickRepository,
    reject: Option<&'static str>,
    panic_once: Option<&'static str>,
    panicked: AtomicBool,
    delay: Option<Duration>,
    inserting: AtomicBool,
}

impl FlakyRepository {
    fn new() -> Self {
        Self {
            inner: InMemoryTickRepository::new(),
            reject: None,
            panic_once: None,
            panicked: AtomicBool::new(false),
            delay: None,
            inserting: AtomicBool::new(false),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    fn rejecting(product_id: &'static str) -> Self {
        Self {
            reject: Some(product_id),
            ..Self::new()
        }
    }

    fn panicking_once(product_id: &'static str) -> Self {
        Self {
            panic_once: Some(product_id),
            ..Self::new()
        }
    }
}

#[async_trait]
impl TickRepositoryPort for FlakyRepository {
    async fn insert(&self, tick: &Tick) -> Result<(), PersistenceError> {
        self.inserting.store(true, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.reject == Some(tick.product_id.as_str()) {
            return Err(PersistenceError::Query("duplicate key".to_string()));
        }
        if self.panic_once == Some(tick.product_id.as_str())
            && !self.panicked.swap(true, Ordering::SeqCst)
        {
            panic!("driver crashed on {}", tick.product_id);
        }
        self.inner.insert(tick).await
    }
}

struct Pipeline {
    source: Arc<InMemoryBatchSource>,
    repository: Arc<FlakyRepository>,
    analysis: Arc<InMemoryAnalysis>,
    pool: Arc<WorkerPool>,
    stats: Arc<ConsumerStats>,
}

impl Pipeline {
    fn new(repository: FlakyRepository) -> Self {
        Self {
            source: Arc::new(InMemoryBatchSource::new()),
            repository: Arc::new(repository),
            analysis: Arc::new(InMemoryAnalysis::new()),
            pool: Arc::new(WorkerPool::new(WorkerPoolSettings::default())),
            stats: Arc::new(ConsumerStats::default()),
        }
    }

    fn consumer(&self, max_redeliveries: u32, shutdown: CancellationToken) -> ConsumerLoop {
        let processor = BatchProcessor::new(
            Arc::clone(&self.pool),
            TickWriter::new(self.repository.clone()),
            AnalysisDispatcher::new(Arc::clone(&self.pool), self.analysis.clone()),
        );
        ConsumerLoop::new(
            0,
            self.source.clone(),
            Arc::new(processor),
            max_redeliveries,
            shutdown,
            Arc::clone(&self.stats),
        )
    }

    /// Consume until the source is empty, then drain the pool.
    async fn run(&self, max_redeliveries: u32) {
        self.consumer(max_redeliveries, CancellationToken::new())
            .run()
            .await;

        assert!(self.pool.shutdown_within(DRAIN).await, "pool did not drain");
    }

    fn rows(&self) -> Vec<Tick> {
        self.repository.inner.rows()
    }
}

fn event(message: &str) -> MarketDataEvent {
    MarketDataEvent::new(message, "coinbase")
}

fn ticker(product_id: &str, price: &str) -> MarketDataEvent {
    event(&format!(
        r#"{{"type":"ticker","product_id":"{product_id}","price":"{price}","time":"2024-03-01T12:00:00.000000Z"}}"#
    ))
}

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

#[tokio::test]
async fn ticker_frame_is_stored_exactly_and_analyzed_once() {
    let pipeline = Pipeline::new(FlakyRepository::new());
    pipeline.source.enqueue(vec![event(
        r#"{"type":"ticker","sequence":4294967296,"product_id":"BTC-USD","price":"65000.10","open_24h":64000.00,"volume_24h":"12345.67890123","best_bid":"65000.09","best_ask":"65000.11","side":"buy","time":"2024-03-01T12:00:00.123456Z","trade_id":987654321,"last_size":"0.00100000"}"#,
    )]);

    pipeline.run(9).await;

    let rows = pipeline.rows();
    assert_eq!(rows.len(), 1);
    let tick = &rows[0];
    assert_eq!(tick.product_id, "BTC-USD");
    assert_eq!(tick.source, "coinbase");
    assert_eq!(tick.kind.as_deref(), Some("ticker"));
    assert_eq!(tick.sequence, Some(4_294_967_296));
    assert_eq!(tick.price, Some(dec("65000.10")));
    assert_eq!(tick.open_24h, Some(dec("64000.00")));
    assert_eq!(tick.volume_24h, Some(dec("12345.67890123")));
    assert_eq!(tick.last_size, Some(dec("0.00100000")));
    assert_eq!(tick.trade_id, Some(987_654_321));
    assert_eq!(
        tick.time,
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            + chrono::Duration::microseconds(123_456)
    );

    let analyzed = pipeline.analysis.ticks();
    assert_eq!(analyzed.len(), 1);
    assert_eq!(analyzed[0].id, tick.id);

    assert_eq!(pipeline.source.acknowledged().len(), 1);
    assert_eq!(pipeline.stats.persisted(), 1);
}

#[tokio::test]
async fn unparsable_frame_is_acknowledged_without_rows() {
    let pipeline = Pipeline::new(FlakyRepository::new());
    pipeline.source.enqueue(vec![event("not-json")]);

    pipeline.run(9).await;

    assert!(pipeline.rows().is_empty());
    assert!(pipeline.analysis.is_empty());
    assert_eq!(pipeline.source.acknowledged().len(), 1);
    assert_eq!(pipeline.source.redeliveries(), 0);
}

#[tokio::test]
async fn missing_time_is_stamped_with_ingest_instant() {
    let pipeline = Pipeline::new(FlakyRepository::new());
    pipeline
        .source
        .enqueue(vec![event(r#"{"type":"ticker","product_id":"ETH-USD","price":"3000"}"#)]);

    let before = Utc::now();
    pipeline.run(9).await;

    let rows = pipeline.rows();
    assert_eq!(rows.len(), 1);
    let drift = rows[0].time - before;
    assert!(drift >= chrono::Duration::zero());
    assert!(drift < chrono::Duration::seconds(1));
}

#[tokio::test]
async fn one_rejected_insert_does_not_hold_back_the_batch() {
    let pipeline = Pipeline::new(FlakyRepository::rejecting("P-4"));
    let events = (1..=10).map(|i| ticker(&format!("P-{i}"), "1.5")).collect();
    pipeline.source.enqueue(events);

    pipeline.run(9).await;

    let rows = pipeline.rows();
    assert_eq!(rows.len(), 9);
    assert!(rows.iter().all(|t| t.product_id != "P-4"));
    assert_eq!(pipeline.analysis.len(), 9);
    assert_eq!(pipeline.source.acknowledged().len(), 1);
    assert_eq!(pipeline.source.redeliveries(), 0);
    assert_eq!(pipeline.stats.persisted(), 9);
}

#[tokio::test]
async fn panicking_task_withholds_ack_until_redelivery_succeeds() {
    let pipeline = Pipeline::new(FlakyRepository::panicking_once("P-5"));
    let events = (1..=10).map(|i| ticker(&format!("P-{i}"), "2")).collect();
    pipeline.source.enqueue(events);

    pipeline.run(9).await;

    assert_eq!(pipeline.source.deliveries(), 2);
    assert_eq!(pipeline.source.redeliveries(), 1);
    assert_eq!(pipeline.source.acknowledged().len(), 1);
    assert_eq!(pipeline.stats.redelivered(), 1);
    assert_eq!(pipeline.stats.forced(), 0);

    // The first attempt stored nine rows before it failed; the second stores all ten.
    let rows = pipeline.rows();
    assert!(rows.len() >= 10);
    for i in 1..=10 {
        assert!(
            !pipeline.repository.inner.rows_for(&format!("P-{i}")).is_empty(),
            "P-{i} never stored"
        );
    }
}

#[tokio::test]
async fn redelivered_duplicates_keep_later_batches_flowing() {
    let pipeline = Pipeline::new(FlakyRepository::panicking_once("BTC-USD"));
    pipeline
        .source
        .enqueue(vec![ticker("BTC-USD", "100"), ticker("ETH-USD", "10")]);
    pipeline.source.enqueue(vec![ticker("SOL-USD", "1")]);

    pipeline.run(9).await;

    let acknowledged = pipeline.source.acknowledged();
    assert_eq!(acknowledged.len(), 2);
    assert_eq!(acknowledged[0].key(), vec![(0, 0)]);
    assert_eq!(acknowledged[1].key(), vec![(0, 2)]);
    assert_eq!(pipeline.repository.inner.rows_for("SOL-USD").len(), 1);
    assert_eq!(pipeline.repository.inner.rows_for("BTC-USD").len(), 1);
}

#[tokio::test]
async fn shutdown_mid_batch_finishes_the_batch_first() {
    let pipeline = Pipeline::new(FlakyRepository::slow(Duration::from_millis(50)));
    let first: Vec<_> = (1..=6).map(|i| ticker(&format!("P-{i}"), "3")).collect();
    pipeline.source.enqueue(first);
    pipeline.source.enqueue(vec![ticker("LATE-USD", "4")]);

    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(pipeline.consumer(9, shutdown.clone()).run());

    tokio::time::timeout(DRAIN, async {
        while !pipeline.repository.inserting.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap();
    assert!(pipeline.repository.inner.len() < 6, "batch finished before shutdown");
    shutdown.cancel();

    tokio::time::timeout(DRAIN, handle).await.unwrap().unwrap();
    assert!(pipeline.pool.shutdown_within(DRAIN).await, "pool did not drain");

    assert_eq!(pipeline.rows().len(), 6);
    assert!(pipeline.repository.inner.rows_for("LATE-USD").is_empty());
    let acknowledged = pipeline.source.acknowledged();
    assert_eq!(acknowledged.len(), 1);
    assert_eq!(acknowledged[0].record_count(), 6);
    assert_eq!(pipeline.source.deliveries(), 1);
    assert_eq!(pipeline.stats.running(), 0);
    assert_eq!(pipeline.analysis.len(), 6);
}

#[tokio::test]
async fn analyzer_sees_every_stored_price() {
    let repository = Arc::new(InMemoryTickRepository::new());
    let analyzer = Arc::new(RollingWindowAnalyzer::new(5));
    let pool = Arc::new(WorkerPool::new(WorkerPoolSettings::default()));
    let processor = BatchProcessor::new(
        Arc::clone(&pool),
        TickWriter::new(repository.clone()),
        AnalysisDispatcher::new(Arc::clone(&pool), analyzer.clone()),
    );

    let events: Vec<_> = (1..=8).map(|i| ticker("BTC-USD", &i.to_string())).collect();
    let outcome = processor.process(&events).await.unwrap();
    assert!(pool.shutdown_within(DRAIN).await);

    assert_eq!(outcome.persisted, 8);
    assert_eq!(repository.len(), 8);
    assert_eq!(analyzer.window_len("BTC-USD"), 5);
    assert!(analyzer.snapshot("BTC-USD").is_some());
}

proptest! {
    #[test]
    fn numeric_and_string_prices_parse_identically(
        whole in 0u64..10_000_000,
        fraction in 0u32..100_000_000,
        scale in 0usize..=8,
    ) {
        let digits = format!("{fraction:08}");
        let literal = if scale == 0 {
            whole.to_string()
        } else {
            format!("{whole}.{}", &digits[..scale])
        };

        let as_number = parse_tick(&event(&format!(
            r#"{{"product_id":"BTC-USD","price":{literal}}}"#
        )))
        .unwrap();
        let as_string = parse_tick(&event(&format!(
            r#"{{"product_id":"BTC-USD","price":"{literal}"}}"#
        )))
        .unwrap();

        prop_assert_eq!(as_number.price, as_string.price);
        prop_assert_eq!(as_number.price.map(|p| p.to_string()), Some(literal));
    }
}
