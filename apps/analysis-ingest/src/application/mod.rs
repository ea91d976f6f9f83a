//! Application Layer - Ports and the ingest pipeline.
//!
//! The ports define what the ingest needs from the outside world (a batch
//! source, a tick store, an analysis sink); the services drive them.

/// Port interfaces for the bus, the store and analysis.
pub mod ports;

/// Parsing, persistence, dispatch and batch consumption.
pub mod services;
