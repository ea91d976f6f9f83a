//! Ingest Configuration Settings
//!
//! Loaded from environment variables at startup. [`IngestConfig::from_lookup`]
//! takes any key lookup so tests can load from a map or a `.env` file
//! without touching the process environment.

use std::str::FromStr;
use std::time::Duration;

use market_events::{BusSettings, BusSettingsError};

use crate::application::services::{DEFAULT_WINDOW, WorkerPoolSettings};
use crate::infrastructure::kafka::ConsumerSettings;
use crate::infrastructure::postgres::DatabaseSettings;

/// Analysis settings.
#[derive(Debug, Clone)]
pub struct AnalysisSettings {
    /// Run the rolling analyzer. When off, persisted ticks are dispatched
    /// to a no-op sink.
    pub enabled: bool,
    /// Prices kept per product by the rolling analyzer.
    pub window: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            window: DEFAULT_WINDOW,
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8084 }
    }
}

/// Complete ingest configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Broker connection.
    pub bus: BusSettings,
    /// Consumer group, topic and batching.
    pub consumer: ConsumerSettings,
    /// Tick store.
    pub database: DatabaseSettings,
    /// Worker pool sizing.
    pub pool: WorkerPoolSettings,
    /// Rolling analyzer.
    pub analysis: AnalysisSettings,
    /// HTTP settings.
    pub server: ServerSettings,
}

impl IngestConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BUS_BOOTSTRAP_SERVERS` or `DATABASE_URL` is
    /// missing, or a sizing value is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration through `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`Self::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bus = BusSettings::from_lookup(&lookup)?;

        let consumer_defaults = ConsumerSettings::default();
        let consumer = ConsumerSettings {
            topic: env_or(&lookup, "BUS_TOPIC_MARKET_DATA", &consumer_defaults.topic),
            group_id: env_or(&lookup, "BUS_CONSUMER_GROUP_ID", &consumer_defaults.group_id),
            listener_threads: parse_env(
                &lookup,
                "BUS_CONSUMER_LISTENER_THREADS",
                consumer_defaults.listener_threads,
            ),
            max_batch_size: parse_env(
                &lookup,
                "BUS_CONSUMER_MAX_BATCH_SIZE",
                consumer_defaults.max_batch_size,
            ),
            max_batch_wait: parse_env_duration_millis(
                &lookup,
                "BUS_CONSUMER_MAX_WAIT_MS",
                consumer_defaults.max_batch_wait,
            ),
            max_redeliveries: parse_env(
                &lookup,
                "BUS_CONSUMER_MAX_REDELIVERIES",
                consumer_defaults.max_redeliveries,
            ),
        };

        let database_url = lookup("DATABASE_URL")
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("DATABASE_URL".to_string()))?;
        let database_defaults = DatabaseSettings::new(String::new());
        let database = DatabaseSettings {
            url: database_url,
            max_connections: parse_env(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                database_defaults.max_connections,
            ),
            run_migrations: parse_env_bool(
                &lookup,
                "DATABASE_RUN_MIGRATIONS",
                database_defaults.run_migrations,
            ),
        };

        let pool_defaults = WorkerPoolSettings::default();
        let pool = WorkerPoolSettings {
            core_workers: parse_env(&lookup, "WORKER_POOL_CORE_SIZE", pool_defaults.core_workers),
            max_workers: parse_env(&lookup, "WORKER_POOL_MAX_SIZE", pool_defaults.max_workers),
            queue_capacity: parse_env(
                &lookup,
                "WORKER_POOL_QUEUE_CAPACITY",
                pool_defaults.queue_capacity,
            ),
            termination_grace: parse_env_duration_secs(
                &lookup,
                "WORKER_POOL_TERMINATION_GRACE_SECS",
                pool_defaults.termination_grace,
            ),
        };

        let analysis = AnalysisSettings {
            enabled: parse_env_bool(&lookup, "ANALYSIS_ENABLED", true),
            window: parse_env(&lookup, "ANALYSIS_WINDOW_SIZE", DEFAULT_WINDOW),
        };

        let server = ServerSettings {
            health_port: parse_env(
                &lookup,
                "INGEST_HEALTH_PORT",
                ServerSettings::default().health_port,
            ),
        };

        let config = Self {
            bus,
            consumer,
            database,
            pool,
            analysis,
            server,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("BUS_CONSUMER_LISTENER_THREADS", self.consumer.listener_threads),
            ("BUS_CONSUMER_MAX_BATCH_SIZE", self.consumer.max_batch_size),
            ("WORKER_POOL_CORE_SIZE", self.pool.core_workers),
            ("WORKER_POOL_MAX_SIZE", self.pool.max_workers),
            ("ANALYSIS_WINDOW_SIZE", self.analysis.window),
        ];
        for (key, value) in positive {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    key: key.to_string(),
                    reason: "must be at least 1".to_string(),
                });
            }
        }
        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid {
                key: "DATABASE_MAX_CONNECTIONS".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Bus settings are missing or invalid.
    #[error(transparent)]
    Bus(#[from] BusSettingsError),

    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    /// A value is out of range.
    #[error("invalid value for {key}: {reason}")]
    Invalid {
        /// Variable name.
        key: String,
        /// What is wrong with it.
        reason: String,
    },
}

fn env_or<F>(lookup: &F, key: &str, default: &str) -> String
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_env_bool<F>(lookup: &F, key: &str, default: bool) -> bool
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_duration_secs<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis<F>(lookup: &F, key: &str, default: Duration) -> Duration
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::io::Write;

    use super::*;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 2] = [
        ("BUS_BOOTSTRAP_SERVERS", "localhost:9092"),
        ("DATABASE_URL", "postgres://centinel@localhost/market"),
    ];

    #[test]
    fn defaults_match_documented_values() {
        let config = IngestConfig::from_lookup(lookup(&REQUIRED)).unwrap();

        assert_eq!(config.consumer.topic, "coinbase-market-data");
        assert_eq!(config.consumer.group_id, "analysis-service-group");
        assert_eq!(config.consumer.listener_threads, 3);
        assert_eq!(config.consumer.max_batch_size, 100);
        assert_eq!(config.consumer.max_batch_wait, Duration::from_millis(500));
        assert_eq!(config.consumer.max_redeliveries, 9);
        assert_eq!(config.database.max_connections, 10);
        assert!(config.database.run_migrations);
        assert_eq!(config.pool.core_workers, 10);
        assert_eq!(config.pool.max_workers, 50);
        assert_eq!(config.pool.queue_capacity, 100);
        assert_eq!(config.pool.termination_grace, Duration::from_secs(60));
        assert!(config.analysis.enabled);
        assert_eq!(config.analysis.window, 50);
        assert_eq!(config.server.health_port, 8084);
    }

    #[test]
    fn database_url_is_required() {
        let err = IngestConfig::from_lookup(lookup(&[("BUS_BOOTSTRAP_SERVERS", "b:9092")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref key) if key == "DATABASE_URL"));
    }

    #[test]
    fn bootstrap_servers_are_required() {
        let err = IngestConfig::from_lookup(lookup(&[("DATABASE_URL", "postgres://x")])).unwrap_err();
        assert!(matches!(err, ConfigError::Bus(_)));
    }

    #[test]
    fn zero_listeners_rejected() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("BUS_CONSUMER_LISTENER_THREADS", "0"));
        let err = IngestConfig::from_lookup(lookup(&pairs)).unwrap_err();
        assert!(err.to_string().contains("BUS_CONSUMER_LISTENER_THREADS"));
    }

    #[test]
    fn unparsable_values_fall_back_to_defaults() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("WORKER_POOL_MAX_SIZE", "lots"));
        pairs.push(("DATABASE_RUN_MIGRATIONS", "maybe"));
        pairs.push(("ANALYSIS_ENABLED", "off"));
        let config = IngestConfig::from_lookup(lookup(&pairs)).unwrap();
        assert_eq!(config.pool.max_workers, 50);
        assert!(config.database.run_migrations);
        assert!(!config.analysis.enabled);
    }

    #[test]
    fn loads_from_dotenv_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "BUS_BOOTSTRAP_SERVERS=broker-1:9092,broker-2:9092").unwrap();
        writeln!(file, "DATABASE_URL=postgres://centinel:secret@db/market").unwrap();
        writeln!(file, "BUS_CONSUMER_GROUP_ID=ingest-replay").unwrap();
        writeln!(file, "BUS_CONSUMER_MAX_REDELIVERIES=0").unwrap();
        writeln!(file, "WORKER_POOL_TERMINATION_GRACE_SECS=5").unwrap();
        writeln!(file, "INGEST_HEALTH_PORT=9184").unwrap();
        drop(file);

        let vars: HashMap<String, String> = dotenvy::from_path_iter(&path)
            .unwrap()
            .map(Result::unwrap)
            .collect();
        let config = IngestConfig::from_lookup(|key| vars.get(key).cloned()).unwrap();

        assert_eq!(config.bus.bootstrap_servers, "broker-1:9092,broker-2:9092");
        assert_eq!(config.consumer.group_id, "ingest-replay");
        assert_eq!(config.consumer.max_redeliveries, 0);
        assert_eq!(config.pool.termination_grace, Duration::from_secs(5));
        assert_eq!(config.server.health_port, 9184);
        assert!(!format!("{:?}", config.database).contains("secret"));
    }
}
