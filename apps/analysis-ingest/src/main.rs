//! Analysis Ingest Binary
//!
//! Consumes the market data topic and persists every ticker update.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin analysis-ingest
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `BUS_BOOTSTRAP_SERVERS`: Kafka broker list
//! - `DATABASE_URL`: PostgreSQL connection string
//!
//! ## Optional
//! - `BUS_TOPIC_MARKET_DATA`: topic (default: coinbase-market-data)
//! - `BUS_CONSUMER_GROUP_ID`: consumer group (default: analysis-service-group)
//! - `BUS_CONSUMER_LISTENER_THREADS`: consumer loops (default: 3)
//! - `BUS_CONSUMER_MAX_BATCH_SIZE` / `BUS_CONSUMER_MAX_WAIT_MS`: batching (default: 100 / 500)
//! - `BUS_CONSUMER_MAX_REDELIVERIES`: retries of a failing batch, 0 for unlimited (default: 9)
//! - `DATABASE_MAX_CONNECTIONS` / `DATABASE_RUN_MIGRATIONS`: store pool (default: 10 / true)
//! - `WORKER_POOL_CORE_SIZE` / `WORKER_POOL_MAX_SIZE` / `WORKER_POOL_QUEUE_CAPACITY`
//! - `WORKER_POOL_TERMINATION_GRACE_SECS`: drain bound at shutdown (default: 60)
//! - `ANALYSIS_ENABLED`: run the rolling analyzer (default: true)
//! - `ANALYSIS_WINDOW_SIZE`: prices kept per product (default: 50)
//! - `INGEST_HEALTH_PORT`: health HTTP port (default: 8084)
//! - `OTEL_ENABLED`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `OTEL_SERVICE_NAME`, `RUST_LOG`

use std::sync::Arc;

use analysis_ingest::infrastructure::telemetry;
use analysis_ingest::{
    AnalysisDispatcher, AnalysisPort, BatchProcessor, BatchSourcePort, ConsumerLoop,
    ConsumerStats, HealthServer, HealthServerState, IngestConfig, KafkaBatchSource, NoOpAnalysis,
    PgTickRepository, RollingWindowAnalyzer, TickRepositoryPort, TickWriter, WorkerPool,
    init_metrics,
};
use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;

fn main() -> anyhow::Result<()> {
    load_dotenv();

    let config = IngestConfig::from_env()?;

    // Runtime workers track the pool's core size.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.pool.core_workers)
        .thread_name("analysis-ingest")
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: IngestConfig) -> anyhow::Result<()> {
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Analysis Ingest");

    init_metrics().context("failed to install Prometheus recorder")?;
    log_config(&config);

    let repository = PgTickRepository::connect(&config.database)
        .await
        .context("failed to connect to the tick store")?;
    if config.database.run_migrations {
        repository
            .migrate()
            .await
            .context("failed to apply database migrations")?;
    }

    let shutdown_token = CancellationToken::new();

    let pool = Arc::new(WorkerPool::new(config.pool.clone()));
    let store: Arc<dyn TickRepositoryPort> = Arc::new(repository.clone());
    let analysis: Arc<dyn AnalysisPort> = if config.analysis.enabled {
        Arc::new(RollingWindowAnalyzer::new(config.analysis.window))
    } else {
        Arc::new(NoOpAnalysis)
    };
    let processor = Arc::new(BatchProcessor::new(
        Arc::clone(&pool),
        TickWriter::new(store),
        AnalysisDispatcher::new(Arc::clone(&pool), analysis),
    ));
    let stats = Arc::new(ConsumerStats::default());

    let listeners = config.consumer.listener_threads;
    let mut consumers = Vec::with_capacity(listeners);
    for id in 0..listeners {
        let source: Arc<dyn BatchSourcePort> = Arc::new(
            KafkaBatchSource::new(&config.bus, config.consumer.clone(), shutdown_token.clone())
                .context("failed to create Kafka consumer")?,
        );
        let consumer = ConsumerLoop::new(
            id,
            source,
            Arc::clone(&processor),
            config.consumer.max_redeliveries,
            shutdown_token.clone(),
            Arc::clone(&stats),
        );
        consumers.push(tokio::spawn(consumer.run()));
    }

    let health_state = Arc::new(
        HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            listeners,
            Arc::clone(&stats),
            Arc::clone(&pool),
        )
        .with_repository(repository.clone())
        .with_queries(Arc::new(repository.clone())),
    );
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

    tracing::info!(listeners, "Analysis ingest consuming");

    await_shutdown(shutdown_token).await;

    // Loops finish their in-flight batch before returning.
    for consumer in consumers {
        if let Err(e) = consumer.await {
            tracing::error!(error = %e, "Consumer loop task failed");
        }
    }

    if !pool.shutdown().await {
        tracing::warn!("Worker pool aborted tasks at shutdown");
    }
    repository.pool().close().await;

    tracing::info!(
        batches = stats.batches(),
        persisted = stats.persisted(),
        "Analysis ingest stopped"
    );
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        topic = %config.consumer.topic,
        group_id = %config.consumer.group_id,
        listeners = config.consumer.listener_threads,
        max_batch_size = config.consumer.max_batch_size,
        max_redeliveries = config.consumer.max_redeliveries,
        core_workers = config.pool.core_workers,
        max_workers = config.pool.max_workers,
        queue_capacity = config.pool.queue_capacity,
        analysis_enabled = config.analysis.enabled,
        analysis_window = config.analysis.window,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(database = %config.database.redacted_url(), "Tick store");
}

/// Load .env from the current directory or the nearest ancestor that has one.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let Ok(cwd) = std::env::current_dir() else {
        return;
    };
    for dir in cwd.ancestors().skip(1) {
        let env_path = dir.join(".env");
        if env_path.exists() {
            let _ = dotenvy::from_path(&env_path);
            return;
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
