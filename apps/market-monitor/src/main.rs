//! Market Monitor Binary
//!
//! Streams the exchange ticker feed onto the market data topic.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-monitor
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BUS_BOOTSTRAP_SERVERS`: Kafka broker list
//!
//! ## Optional
//! - `EXCHANGE_NAME`: source label (default: coinbase)
//! - `EXCHANGE_WS_PUBLIC_URL` / `EXCHANGE_WS_PRIVATE_URL`: feed endpoints
//! - `EXCHANGE_API_KEY` / `EXCHANGE_API_SECRET` / `EXCHANGE_API_PASSPHRASE`: enable signed subscribe
//! - `EXCHANGE_RECONNECT_ENABLED`: reconnect after a dropped feed (default: false)
//! - `MARKET_DATA_SYMBOLS`: comma separated products (default: BTC-USD)
//! - `BUS_TOPIC_MARKET_DATA`: topic (default: coinbase-market-data)
//! - `BUS_PRODUCER_KEY_BY_SYMBOL`: key records by product id (default: false)
//! - `MONITOR_HEALTH_PORT`: health HTTP port (default: 8083)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, `RUST_LOG`

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use market_monitor::infrastructure::telemetry;
use market_monitor::{
    CoinbaseConnector, EventForwarder, EventPublisherPort, ExchangeConnectorPort, HealthServer,
    HealthServerState, KafkaEventPublisher, MonitorConfig, OrchestratorError,
    StreamingOrchestrator, init_metrics,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bound on draining the forwarder after the feed is closed.
const FORWARDER_DRAIN_TIMEOUT: Duration = Duration::from_secs(15);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Market Monitor");

    init_metrics().context("failed to install Prometheus recorder")?;

    let config = MonitorConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let publisher: Arc<dyn EventPublisherPort> = Arc::new(
        KafkaEventPublisher::new(&config.bus, config.producer.clone())
            .context("failed to create Kafka producer")?,
    );

    let (event_tx, event_rx) = mpsc::channel(config.server.event_channel_capacity);
    let forwarder = tokio::spawn(EventForwarder::new(event_rx, publisher).run());

    let connector: Arc<dyn ExchangeConnectorPort> = Arc::new(CoinbaseConnector::new(
        config.exchange.connector_config(),
        event_tx,
        shutdown_token.clone(),
    ));
    let orchestrator =
        StreamingOrchestrator::new(config.symbols.clone()).with_connector(Arc::clone(&connector));

    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        orchestrator.connectors().to_vec(),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    let started = orchestrator.start_streaming();
    tokio::spawn(async move {
        match started.await.unwrap_or(Err(OrchestratorError::Dropped)) {
            Ok(()) => tracing::info!("Market monitor streaming"),
            Err(e) => tracing::error!(error = %e, "Streaming did not start; service stays up"),
        }
    });

    await_shutdown(shutdown_token).await;

    orchestrator.stop_streaming().await;
    // Dropping the last sender lets the forwarder drain and flush.
    drop(orchestrator);
    drop(connector);

    match tokio::time::timeout(FORWARDER_DRAIN_TIMEOUT, forwarder).await {
        Ok(Ok(forwarded)) => tracing::info!(forwarded, "Forwarder drained"),
        Ok(Err(e)) => tracing::error!(error = %e, "Forwarder task failed"),
        Err(_) => tracing::warn!("Forwarder did not drain in time"),
    }

    tracing::info!("Market monitor stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &MonitorConfig) {
    tracing::info!(
        exchange = %config.exchange.name,
        symbols = ?config.symbols.as_slice(),
        topic = %config.producer.topic,
        authenticated = config.exchange.credentials.is_some(),
        reconnect = config.exchange.reconnect.enabled,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        public_url = %config.exchange.public_url,
        private_url = %config.exchange.private_url,
        "Exchange endpoints"
    );
}

/// Load .env from the current directory or the nearest ancestor that has one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for SIGINT or SIGTERM, then cancel `shutdown_token`.
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Ctrl+C handler failed");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "SIGTERM handler failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl+C, initiating shutdown"),
        () = terminate => tracing::info!("Received SIGTERM, initiating shutdown"),
    }

    shutdown_token.cancel();
}
