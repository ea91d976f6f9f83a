//! Kafka Bus Adapter
//!
//! Consumer side of the market data topic.

mod consumer;

pub use consumer::{ConsumerSettings, KafkaBatchSource};
