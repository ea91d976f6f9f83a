//! Kafka Bus Adapter
//!
//! Producer side of the market data topic.

mod producer;

pub use producer::{KafkaEventPublisher, ProducerSettings};
