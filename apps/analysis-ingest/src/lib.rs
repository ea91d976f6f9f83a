#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::items_after_statements,
        clippy::float_cmp
    )
)]

//! Analysis Ingest - Bus to Time-Series Store
//!
//! Consumes raw exchange frames from the market data topic in batches,
//! parses each into a tick, stores it, and hands every stored tick to the
//! rolling indicator analyzer.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: ticks, indicator windows, trade signal schema
//! - **Application**: batch source, tick store and analysis ports; parser,
//!   worker pool, batch processor, consumer loop
//! - **Infrastructure**: Kafka batch source, PostgreSQL repository, config,
//!   health, metrics, telemetry
//!
//! # Data Flow
//!
//! ```text
//! topic -> KafkaBatchSource -> ConsumerLoop -> BatchProcessor
//!       -> WorkerPool[parse -> PgTickRepository -> AnalysisDispatcher] -> ack
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure types with no I/O.
pub mod domain;

/// Application layer - Ports and the ingest pipeline.
pub mod application;

/// Infrastructure layer - Adapters and process plumbing.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

pub use domain::bar::MinuteBar;
pub use domain::indicators::{IndicatorSnapshot, PriceWindow};
pub use domain::signal::{SignalError, SignalType, TradeSignal};
pub use domain::tick::Tick;

pub use application::ports::{
    AnalysisError, AnalysisPort, Batch, BatchSourcePort, BusError, InMemoryAnalysis,
    InMemoryBatchSource, InMemoryTickRepository, NoOpAnalysis, PartitionRange, PersistenceError,
    TickQueryPort, TickRepositoryPort,
};
pub use application::services::{
    AnalysisDispatcher, BatchError, BatchOutcome, BatchProcessor, ConsumerLoop, ConsumerStats,
    PoolError, RollingWindowAnalyzer, TickWriter, WorkerPool, WorkerPoolSettings, parse_tick,
    parse_tick_at,
};

pub use infrastructure::config::{ConfigError, IngestConfig};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::kafka::{ConsumerSettings, KafkaBatchSource};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::postgres::{Bucketing, DatabaseSettings, PgTickRepository};
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
