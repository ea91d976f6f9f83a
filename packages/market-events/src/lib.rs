#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

//! Market Events - Bus Contract
//!
//! The only data that crosses the bus between the monitor and the analysis
//! ingest is [`MarketDataEvent`]: the raw exchange frame plus the name of the
//! exchange that produced it. No parsed fields travel on the topic.
//!
//! The [`kafka`] module carries the client settings (bootstrap servers and
//! optional SASL/TLS) that both services build their producers and consumers
//! from.

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

/// Bus envelope.
pub mod event;

/// Kafka client settings.
pub mod kafka;

pub use event::{EventCodecError, MarketDataEvent};
pub use kafka::{BusSecurity, BusSettings, BusSettingsError, DEFAULT_MARKET_DATA_TOPIC};
