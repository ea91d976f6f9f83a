//! Infrastructure Layer - Adapters
//!
//! Concrete implementations of the application ports plus process plumbing
//! (configuration, telemetry, metrics, health).

/// Coinbase WebSocket connector.
pub mod coinbase;

/// Environment configuration.
pub mod config;

/// Health check HTTP server.
pub mod health;

/// Kafka producer.
pub mod kafka;

/// Prometheus metrics.
pub mod metrics;

/// Tracing and OpenTelemetry.
pub mod telemetry;
