//! Configuration Module
//!
//! # Environment Variables
//!
//! ## Required
//! - `BUS_BOOTSTRAP_SERVERS`: Kafka broker list
//! - `DATABASE_URL`: PostgreSQL connection string
//!
//! ## Optional
//! - `BUS_TOPIC_MARKET_DATA`, `BUS_CONSUMER_GROUP_ID`, `BUS_CONSUMER_LISTENER_THREADS`
//! - `BUS_CONSUMER_MAX_BATCH_SIZE`, `BUS_CONSUMER_MAX_WAIT_MS`, `BUS_CONSUMER_MAX_REDELIVERIES`
//! - `DATABASE_MAX_CONNECTIONS`, `DATABASE_RUN_MIGRATIONS`
//! - `WORKER_POOL_CORE_SIZE`, `WORKER_POOL_MAX_SIZE`, `WORKER_POOL_QUEUE_CAPACITY`,
//!   `WORKER_POOL_TERMINATION_GRACE_SECS`
//! - `ANALYSIS_ENABLED`, `ANALYSIS_WINDOW_SIZE`, `INGEST_HEALTH_PORT`

mod settings;

pub use settings::{AnalysisSettings, ConfigError, IngestConfig, ServerSettings};
