//! Exchange Connector Port (Driven Port)
//!
//! Capability set every exchange connector offers. Coinbase is the only
//! variant today; others plug in behind the same trait.

use async_trait::async_trait;

use crate::domain::connection::ConnectionState;
use crate::domain::symbols::SymbolSet;

/// Connector errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// Refused to subscribe to an empty product list.
    #[error("refusing to subscribe: symbol list is empty")]
    EmptySymbols,

    /// Operation not allowed in the current state.
    #[error("invalid connection state transition: {from} -> {to}")]
    InvalidState {
        /// State the connector was in.
        from: ConnectionState,
        /// State the operation needed to move to.
        to: ConnectionState,
    },

    /// No live socket.
    #[error("not connected")]
    NotConnected,

    /// WebSocket handshake failed.
    #[error("WebSocket connection failed: {0}")]
    Connection(String),

    /// Sending a frame failed.
    #[error("failed to send frame: {0}")]
    Send(String),

    /// Building the authenticated subscribe frame failed.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Frame serialization failed.
    #[error("frame serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A streaming connection to one exchange.
#[async_trait]
pub trait ExchangeConnectorPort: Send + Sync {
    /// Open the socket and subscribe to `symbols`.
    ///
    /// Only legal from `Disconnected`. Fails with
    /// [`ConnectorError::EmptySymbols`] before touching the network when
    /// `symbols` is empty.
    async fn connect(&self, symbols: &SymbolSet) -> Result<(), ConnectorError>;

    /// Close the socket. Only legal from `Open` or `Subscribed`.
    async fn disconnect(&self) -> Result<(), ConnectorError>;

    /// Stop streaming from any state.
    ///
    /// Closes a live socket like [`disconnect`](Self::disconnect) and also
    /// cancels a pending reconnect or handshake. Leaves the connector
    /// `Disconnected`; `connect` may be called again afterwards.
    async fn stop(&self) -> Result<(), ConnectorError> {
        if self.is_connected() {
            self.disconnect().await
        } else {
            Ok(())
        }
    }

    /// Send a raw text frame on the live socket.
    async fn send_message(&self, message: &str) -> Result<(), ConnectorError>;

    /// Advisory connectivity check; may be stale.
    fn is_connected(&self) -> bool {
        self.state().is_connected()
    }

    /// Current lifecycle state.
    fn state(&self) -> ConnectionState;

    /// Exchange name stamped on every forwarded event.
    fn exchange_name(&self) -> &str;
}
