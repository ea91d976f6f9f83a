//! Application Layer - Ports and orchestration.
//!
//! The ports define what the monitor needs from the outside world (an
//! exchange connection and a bus); the services drive them.

/// Port interfaces for exchange connectors and the bus.
pub mod ports;

/// Streaming orchestration and event forwarding.
pub mod services;
