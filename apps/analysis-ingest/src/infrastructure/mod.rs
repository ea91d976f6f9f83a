//! Infrastructure Layer - Adapters
//!
//! Kafka batch source, PostgreSQL tick store and the process plumbing
//! around them.

/// Environment configuration.
pub mod config;

/// Health check HTTP server.
pub mod health;

/// Kafka consumer.
pub mod kafka;

/// Prometheus metrics.
pub mod metrics;

/// PostgreSQL / TimescaleDB tick store.
pub mod postgres;

/// Tracing and OpenTelemetry.
pub mod telemetry;
