//! Port Interfaces
//!
//! ## Driven Ports (Outbound)
//!
//! - `ExchangeConnectorPort`: a streaming connection to one exchange
//! - `EventPublisherPort`: publication of raw frames onto the bus

mod event_publisher_port;
mod exchange_connector_port;

pub use event_publisher_port::{EventPublisherPort, InMemoryEventPublisher, PublishError};
pub use exchange_connector_port::{ConnectorError, ExchangeConnectorPort};
