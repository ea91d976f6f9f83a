//! Coinbase WebSocket Connector
//!
//! Owns one streaming conversation with the Coinbase ticker feed.
//!
//! # Lifecycle
//!
//! `connect` opens the socket (private URL when credentials are configured,
//! public otherwise), sends a single subscribe frame and hands the read half
//! to a reader task. The reader wraps every text frame into a
//! [`MarketDataEvent`] and pushes it down a bounded channel to the
//! forwarder; it never parses the frame.
//!
//! A remote close or transport error drops the connector back to
//! `Disconnected`. If the reconnect policy is enabled the reader task
//! re-runs the connect/subscribe sequence with the same symbols.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use market_events::MarketDataEvent;
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::auth::{ApiCredentials, unix_timestamp};
use super::messages::SubscribeRequest;
use super::reconnect::ReconnectPolicy;
use crate::application::ports::{ConnectorError, ExchangeConnectorPort};
use crate::domain::connection::ConnectionState;
use crate::domain::symbols::SymbolSet;
use crate::infrastructure::metrics;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, Message>;
type WsReader = SplitStream<WsStream>;

/// Default Coinbase Exchange feed.
pub const DEFAULT_COINBASE_WS_URL: &str = "wss://ws-feed.exchange.coinbase.com";

// =============================================================================
// Configuration
// =============================================================================

/// Connector configuration.
#[derive(Debug, Clone)]
pub struct CoinbaseConfig {
    /// Source label stamped on every event.
    pub exchange_name: String,
    /// Endpoint used without credentials.
    pub public_url: String,
    /// Endpoint used with credentials.
    pub private_url: String,
    /// Auth triple, `None` for unauthenticated streaming.
    pub credentials: Option<ApiCredentials>,
    /// Reconnection behaviour after a dropped feed.
    pub reconnect: ReconnectPolicy,
}

impl Default for CoinbaseConfig {
    fn default() -> Self {
        Self {
            exchange_name: "coinbase".to_string(),
            public_url: DEFAULT_COINBASE_WS_URL.to_string(),
            private_url: DEFAULT_COINBASE_WS_URL.to_string(),
            credentials: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl CoinbaseConfig {
    /// Unauthenticated configuration against `url`.
    #[must_use]
    pub fn public(url: impl Into<String>) -> Self {
        let url = url.into();
        Self {
            public_url: url.clone(),
            private_url: url,
            ..Self::default()
        }
    }

    /// Endpoint the next connection will use.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        if self.credentials.is_some() {
            &self.private_url
        } else {
            &self.public_url
        }
    }
}

// =============================================================================
// Connector
// =============================================================================

/// Coinbase ticker feed connector.
pub struct CoinbaseConnector {
    inner: Arc<Inner>,
}

struct Inner {
    config: CoinbaseConfig,
    state: RwLock<ConnectionState>,
    authenticated: AtomicBool,
    symbols: RwLock<SymbolSet>,
    writer: tokio::sync::Mutex<Option<WsWriter>>,
    event_tx: mpsc::Sender<MarketDataEvent>,
    shutdown: CancellationToken,
    session: Mutex<CancellationToken>,
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// Why the reader loop returned.
enum ReadEnd {
    /// Local disconnect or shutdown.
    Stopped,
    /// Remote close frame or end of stream.
    Closed(String),
    /// Transport error.
    Failed(String),
}

impl CoinbaseConnector {
    /// Create a connector that sends events down `event_tx`.
    ///
    /// `shutdown` stops the reader and any pending reconnect.
    #[must_use]
    pub fn new(
        config: CoinbaseConfig,
        event_tx: mpsc::Sender<MarketDataEvent>,
        shutdown: CancellationToken,
    ) -> Self {
        let session = shutdown.child_token();
        let inner = Inner {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            authenticated: AtomicBool::new(false),
            symbols: RwLock::new(SymbolSet::default()),
            writer: tokio::sync::Mutex::new(None),
            event_tx,
            shutdown,
            session: Mutex::new(session),
            reader: Mutex::new(None),
        };
        metrics::set_connection_state(&inner.config.exchange_name, ConnectionState::Disconnected);
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Whether the current connection sent a signed subscribe frame.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.authenticated.load(Ordering::Acquire)
    }

    /// Symbols captured by the last `connect`.
    #[must_use]
    pub fn symbols(&self) -> SymbolSet {
        self.inner.symbols.read().clone()
    }
}

impl std::fmt::Debug for CoinbaseConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoinbaseConnector")
            .field("exchange", &self.inner.config.exchange_name)
            .field("state", &*self.inner.state.read())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl ExchangeConnectorPort for CoinbaseConnector {
    async fn connect(&self, symbols: &SymbolSet) -> Result<(), ConnectorError> {
        let exchange = self.inner.config.exchange_name.as_str();

        if symbols.is_empty() {
            tracing::error!(exchange, "Refusing to subscribe with an empty symbol list");
            return Err(ConnectorError::EmptySymbols);
        }

        self.inner.transition(ConnectionState::Connecting)?;
        *self.inner.symbols.write() = symbols.clone();

        let session = {
            let mut guard = self.inner.session.lock();
            if guard.is_cancelled() {
                *guard = self.inner.shutdown.child_token();
            }
            guard.clone()
        };

        match self.inner.establish().await {
            Ok(reader) => {
                let inner = Arc::clone(&self.inner);
                let handle = tokio::spawn(inner.supervise(reader, session));
                *self.inner.reader.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                tracing::error!(exchange, error = %e, "Failed to connect to exchange feed");
                self.inner.drop_writer().await;
                self.inner.settle_disconnected(true);
                Err(e)
            }
        }
    }

    async fn disconnect(&self) -> Result<(), ConnectorError> {
        let exchange = self.inner.config.exchange_name.as_str();
        self.inner.transition(ConnectionState::Closing)?;

        self.inner.session.lock().cancel();

        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            if let Err(e) = writer.send(Message::Close(None)).await {
                tracing::debug!(exchange, error = %e, "Close frame not sent");
            }
            let _ = writer.close().await;
        }

        let reader = self.inner.reader.lock().take();
        if let Some(handle) = reader
            && let Err(e) = handle.await
        {
            tracing::warn!(exchange, error = %e, "Reader task ended abnormally");
        }

        self.inner.authenticated.store(false, Ordering::Release);
        self.inner.transition(ConnectionState::Disconnected)?;
        tracing::info!(exchange, "Disconnected from exchange feed");
        Ok(())
    }

    async fn stop(&self) -> Result<(), ConnectorError> {
        if self.is_connected() {
            return self.disconnect().await;
        }

        let exchange = self.inner.config.exchange_name.as_str();
        self.inner.session.lock().cancel();

        // The reader may be mid-handshake inside a reconnect; that await is
        // not cancel-aware, so abort instead of joining.
        let reader = self.inner.reader.lock().take();
        if let Some(handle) = reader {
            handle.abort();
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                tracing::warn!(exchange, error = %e, "Reader task ended abnormally");
            }
        }

        self.inner.drop_writer().await;
        self.inner.settle_disconnected(false);
        self.inner.authenticated.store(false, Ordering::Release);
        tracing::info!(exchange, state = %self.state(), "Stopped exchange feed");
        Ok(())
    }

    async fn send_message(&self, message: &str) -> Result<(), ConnectorError> {
        if !self.is_connected() {
            return Err(ConnectorError::NotConnected);
        }
        self.inner.send_text(message.to_string()).await
    }

    fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    fn exchange_name(&self) -> &str {
        &self.inner.config.exchange_name
    }
}

// =============================================================================
// Connection internals
// =============================================================================

impl Inner {
    fn exchange(&self) -> &str {
        &self.config.exchange_name
    }

    /// Apply a checked state transition.
    fn transition(&self, next: ConnectionState) -> Result<(), ConnectorError> {
        let mut state = self.state.write();
        let from = *state;
        if !from.can_transition_to(next) {
            return Err(ConnectorError::InvalidState { from, to: next });
        }
        *state = next;
        drop(state);

        tracing::debug!(exchange = self.exchange(), %from, to = %next, "Connection state changed");
        metrics::set_connection_state(self.exchange(), next);
        Ok(())
    }

    /// Drop to `Disconnected` after a failure, via `Error` when `errored`.
    ///
    /// A no-op while a local close owns the state.
    fn settle_disconnected(&self, errored: bool) {
        let state = *self.state.read();
        if matches!(
            state,
            ConnectionState::Closing | ConnectionState::Disconnected
        ) {
            return;
        }
        if errored {
            let _ = self.transition(ConnectionState::Error);
        }
        let _ = self.transition(ConnectionState::Disconnected);
        self.authenticated.store(false, Ordering::Release);
    }

    /// Open the socket and subscribe. Expects state `Connecting`.
    async fn establish(&self) -> Result<WsReader, ConnectorError> {
        let url = self.config.endpoint();
        tracing::info!(exchange = self.exchange(), url, "Connecting to exchange feed");

        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| ConnectorError::Connection(e.to_string()))?;
        let (write, read) = stream.split();
        *self.writer.lock().await = Some(write);
        self.transition(ConnectionState::Open)?;

        let symbols = self.symbols.read().to_vec();
        let mut request = SubscribeRequest::ticker(symbols.clone());
        if let Some(credentials) = &self.config.credentials {
            let auth = credentials
                .signed_auth(&unix_timestamp())
                .map_err(|e| ConnectorError::Auth(e.to_string()))?;
            request = request.signed(auth);
        }
        let signed = request.is_signed();

        self.send_text(request.to_json()?).await?;
        self.authenticated.store(signed, Ordering::Release);
        self.transition(ConnectionState::Subscribed)?;

        tracing::info!(
            exchange = self.exchange(),
            symbols = ?symbols,
            authenticated = signed,
            "Subscribed to ticker channel"
        );
        Ok(read)
    }

    async fn send_text(&self, text: String) -> Result<(), ConnectorError> {
        let mut writer = self.writer.lock().await;
        let Some(sink) = writer.as_mut() else {
            return Err(ConnectorError::NotConnected);
        };
        sink.send(Message::Text(text.into())).await.map_err(|e| {
            tracing::error!(exchange = self.exchange(), error = %e, "Failed to send frame");
            ConnectorError::Send(e.to_string())
        })
    }

    /// Reader task: pump frames, then reconnect if the policy allows.
    async fn supervise(self: Arc<Self>, mut reader: WsReader, session: CancellationToken) {
        loop {
            match self.pump(&mut reader, &session).await {
                ReadEnd::Stopped => return,
                ReadEnd::Closed(reason) => {
                    tracing::error!(exchange = self.exchange(), reason = %reason, "Exchange feed closed");
                    self.drop_writer().await;
                    self.settle_disconnected(false);
                }
                ReadEnd::Failed(error) => {
                    tracing::error!(exchange = self.exchange(), error = %error, "Exchange feed failed");
                    self.drop_writer().await;
                    self.settle_disconnected(true);
                }
            }

            match self.reconnect(&session).await {
                Some(next) => reader = next,
                None => return,
            }
        }
    }

    async fn pump(&self, reader: &mut WsReader, session: &CancellationToken) -> ReadEnd {
        loop {
            let frame = tokio::select! {
                () = session.cancelled() => return ReadEnd::Stopped,
                frame = reader.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => self.forward(text.as_str()).await,
                Some(Ok(Message::Ping(data))) => {
                    let mut writer = self.writer.lock().await;
                    if let Some(sink) = writer.as_mut()
                        && let Err(e) = sink.send(Message::Pong(data)).await
                    {
                        tracing::debug!(exchange = self.exchange(), error = %e, "Pong not sent");
                    }
                }
                Some(Ok(Message::Binary(data))) => {
                    tracing::trace!(exchange = self.exchange(), len = data.len(), "Ignoring binary frame");
                }
                Some(Ok(Message::Close(frame))) => {
                    let reason = frame.map_or_else(
                        || "close frame".to_string(),
                        |f| format!("close frame {}: {}", f.code, f.reason),
                    );
                    return ReadEnd::Closed(reason);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return ReadEnd::Failed(e.to_string()),
                None => return ReadEnd::Closed("stream ended".to_string()),
            }
        }
    }

    async fn forward(&self, text: &str) {
        metrics::record_frame_received(self.exchange());
        let event = MarketDataEvent::new(text, self.exchange());
        if self.event_tx.send(event).await.is_err() {
            tracing::warn!(exchange = self.exchange(), "Event channel closed, frame dropped");
        }
    }

    async fn drop_writer(&self) {
        self.writer.lock().await.take();
    }

    /// Back off and reconnect. `None` when disabled, exhausted or stopped.
    async fn reconnect(&self, session: &CancellationToken) -> Option<WsReader> {
        let mut backoff = self.config.reconnect.backoff();

        loop {
            let Some(delay) = backoff.next_delay() else {
                if self.config.reconnect.enabled {
                    tracing::error!(
                        exchange = self.exchange(),
                        attempts = backoff.attempts(),
                        "Giving up on reconnection"
                    );
                }
                return None;
            };

            tracing::info!(
                exchange = self.exchange(),
                attempt = backoff.attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Reconnecting to exchange feed"
            );
            metrics::record_reconnect(self.exchange());

            tokio::select! {
                () = session.cancelled() => return None,
                () = tokio::time::sleep(delay) => {}
            }

            if self.transition(ConnectionState::Connecting).is_err() {
                return None;
            }
            match self.establish().await {
                Ok(reader) => return Some(reader),
                Err(e) => {
                    tracing::warn!(exchange = self.exchange(), error = %e, "Reconnection attempt failed");
                    self.drop_writer().await;
                    self.settle_disconnected(true);
                }
            }
        }
    }
}
