//! Streaming Orchestrator
//!
//! Owns the exchange connectors for the life of the process. Started once
//! the service is up; stopped on the shutdown signal.

use std::sync::Arc;

use tokio::sync::oneshot;

use crate::application::ports::{ConnectorError, ExchangeConnectorPort};
use crate::domain::symbols::SymbolSet;

/// Orchestrator errors.
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// Nothing to start.
    #[error("no exchange connectors registered")]
    NoConnectors,

    /// A connector failed to start.
    #[error("{exchange} failed to start streaming: {source}")]
    Connect {
        /// Exchange that failed.
        exchange: String,
        /// Cause.
        #[source]
        source: ConnectorError,
    },

    /// The start task ended without reporting.
    #[error("streaming start task was dropped")]
    Dropped,
}

/// Drives every configured connector with one symbol set.
pub struct StreamingOrchestrator {
    connectors: Vec<Arc<dyn ExchangeConnectorPort>>,
    symbols: SymbolSet,
}

impl StreamingOrchestrator {
    /// Create an orchestrator streaming `symbols`.
    #[must_use]
    pub const fn new(symbols: SymbolSet) -> Self {
        Self {
            connectors: Vec::new(),
            symbols,
        }
    }

    /// Register a connector.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn ExchangeConnectorPort>) -> Self {
        self.connectors.push(connector);
        self
    }

    /// Registered connectors.
    #[must_use]
    pub fn connectors(&self) -> &[Arc<dyn ExchangeConnectorPort>] {
        &self.connectors
    }

    /// Connect every connector in the background.
    ///
    /// The receiver resolves once all connectors have been tried. Every
    /// connector is attempted even if an earlier one fails; the first
    /// failure is reported. Failures are logged and never stop the process.
    pub fn start_streaming(&self) -> oneshot::Receiver<Result<(), OrchestratorError>> {
        let (tx, rx) = oneshot::channel();
        let connectors = self.connectors.clone();
        let symbols = self.symbols.clone();

        tokio::spawn(async move {
            let result = connect_all(&connectors, &symbols).await;
            let _ = tx.send(result);
        });

        rx
    }

    /// Stop every connector, including ones waiting to reconnect.
    pub async fn stop_streaming(&self) {
        for connector in &self.connectors {
            let exchange = connector.exchange_name();
            tracing::debug!(exchange, state = %connector.state(), "Stopping connector");
            if let Err(e) = connector.stop().await {
                tracing::warn!(exchange, error = %e, "Failed to stop streaming");
            }
        }
        tracing::info!("Streaming stopped");
    }
}

async fn connect_all(
    connectors: &[Arc<dyn ExchangeConnectorPort>],
    symbols: &SymbolSet,
) -> Result<(), OrchestratorError> {
    if connectors.is_empty() {
        tracing::error!("No exchange connectors registered");
        return Err(OrchestratorError::NoConnectors);
    }

    let mut first_error = None;
    for connector in connectors {
        let exchange = connector.exchange_name().to_string();
        match connector.connect(symbols).await {
            Ok(()) => {
                tracing::info!(exchange = %exchange, symbols = symbols.len(), "Streaming started");
            }
            Err(source) => {
                tracing::error!(exchange = %exchange, error = %source, "Streaming failed to start");
                first_error.get_or_insert(OrchestratorError::Connect { exchange, source });
            }
        }
    }

    first_error.map_or(Ok(()), Err)
}
