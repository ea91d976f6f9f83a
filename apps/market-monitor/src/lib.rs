#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::items_after_statements
    )
)]

//! Market Monitor - Exchange Feed to Bus
//!
//! Holds the streaming WebSocket connection to the exchange ticker feed and
//! forwards every raw frame onto the market data topic.
//!
//! # Layers (inside -> outside)
//!
//! - **Domain**: connection state machine, symbol sets
//! - **Application**: connector and publisher ports, streaming orchestrator,
//!   event forwarder
//! - **Infrastructure**: Coinbase connector, Kafka producer, config, health,
//!   metrics, telemetry
//!
//! # Data Flow
//!
//! ```text
//! exchange WS -> CoinbaseConnector -> mpsc -> EventForwarder -> KafkaEventPublisher -> topic
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Pure types with no I/O.
pub mod domain;

/// Application layer - Ports and orchestration.
pub mod application;

/// Infrastructure layer - Adapters and process plumbing.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

pub use domain::connection::ConnectionState;
pub use domain::symbols::SymbolSet;

pub use application::ports::{
    ConnectorError, EventPublisherPort, ExchangeConnectorPort, InMemoryEventPublisher,
    PublishError,
};
pub use application::services::{EventForwarder, OrchestratorError, StreamingOrchestrator};

pub use infrastructure::coinbase::{
    ApiCredentials, CoinbaseConfig, CoinbaseConnector, ReconnectPolicy, SubscribeRequest,
};
pub use infrastructure::config::{ConfigError, MonitorConfig};
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};
pub use infrastructure::kafka::{KafkaEventPublisher, ProducerSettings};
pub use infrastructure::metrics::init_metrics;
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
