//! Monitor Configuration Settings
//!
//! Loaded from environment variables at startup.

use std::time::Duration;

use market_events::{BusSettings, BusSettingsError};

use crate::domain::symbols::SymbolSet;
use crate::infrastructure::coinbase::{
    ApiCredentials, CoinbaseConfig, DEFAULT_COINBASE_WS_URL, ReconnectPolicy,
};
use crate::infrastructure::kafka::ProducerSettings;

/// Symbols streamed when `MARKET_DATA_SYMBOLS` is unset.
const DEFAULT_SYMBOLS: &str = "BTC-USD";

/// Exchange connection settings.
#[derive(Debug, Clone)]
pub struct ExchangeSettings {
    /// Source label, e.g. `coinbase`.
    pub name: String,
    /// Unauthenticated endpoint.
    pub public_url: String,
    /// Authenticated endpoint.
    pub private_url: String,
    /// Auth triple when fully configured.
    pub credentials: Option<ApiCredentials>,
    /// Reconnection behaviour.
    pub reconnect: ReconnectPolicy,
}

impl Default for ExchangeSettings {
    fn default() -> Self {
        Self {
            name: "coinbase".to_string(),
            public_url: DEFAULT_COINBASE_WS_URL.to_string(),
            private_url: DEFAULT_COINBASE_WS_URL.to_string(),
            credentials: None,
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ExchangeSettings {
    /// Connector configuration for these settings.
    #[must_use]
    pub fn connector_config(&self) -> CoinbaseConfig {
        CoinbaseConfig {
            exchange_name: self.name.clone(),
            public_url: self.public_url.clone(),
            private_url: self.private_url.clone(),
            credentials: self.credentials.clone(),
            reconnect: self.reconnect.clone(),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port.
    pub health_port: u16,
    /// Capacity of the connector -> forwarder channel.
    pub event_channel_capacity: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            health_port: 8083,
            event_channel_capacity: 4096,
        }
    }
}

/// Complete monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Exchange connection.
    pub exchange: ExchangeSettings,
    /// Products to subscribe to.
    pub symbols: SymbolSet,
    /// Broker connection.
    pub bus: BusSettings,
    /// Producer tuning and topic.
    pub producer: ProducerSettings,
    /// HTTP and channel settings.
    pub server: ServerSettings,
}

impl MonitorConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BUS_BOOTSTRAP_SERVERS` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let bus = BusSettings::from_env()?;

        let credentials = ApiCredentials::from_parts(
            &env_or("EXCHANGE_API_KEY", ""),
            &env_or("EXCHANGE_API_SECRET", ""),
            &env_or("EXCHANGE_API_PASSPHRASE", ""),
        );

        let defaults = ReconnectPolicy::default();
        let reconnect = ReconnectPolicy {
            enabled: parse_env_bool("EXCHANGE_RECONNECT_ENABLED", defaults.enabled),
            initial_delay: parse_env_duration_millis(
                "EXCHANGE_RECONNECT_DELAY_INITIAL_MS",
                defaults.initial_delay,
            ),
            max_delay: parse_env_duration_secs(
                "EXCHANGE_RECONNECT_DELAY_MAX_SECS",
                defaults.max_delay,
            ),
            multiplier: parse_env_f64("EXCHANGE_RECONNECT_DELAY_MULTIPLIER", defaults.multiplier),
            jitter: defaults.jitter,
            max_attempts: parse_env_u32("EXCHANGE_RECONNECT_MAX_ATTEMPTS", defaults.max_attempts),
        };

        let exchange = ExchangeSettings {
            name: env_or("EXCHANGE_NAME", "coinbase"),
            public_url: env_or("EXCHANGE_WS_PUBLIC_URL", DEFAULT_COINBASE_WS_URL),
            private_url: env_or("EXCHANGE_WS_PRIVATE_URL", DEFAULT_COINBASE_WS_URL),
            credentials,
            reconnect,
        };

        let symbols = SymbolSet::parse_csv(&env_or("MARKET_DATA_SYMBOLS", DEFAULT_SYMBOLS));

        let producer_defaults = ProducerSettings::default();
        let producer = ProducerSettings {
            topic: env_or("BUS_TOPIC_MARKET_DATA", &producer_defaults.topic),
            key_by_symbol: parse_env_bool(
                "BUS_PRODUCER_KEY_BY_SYMBOL",
                producer_defaults.key_by_symbol,
            ),
            ..producer_defaults
        };

        let server = ServerSettings {
            health_port: parse_env_u16("MONITOR_HEALTH_PORT", ServerSettings::default().health_port),
            event_channel_capacity: parse_env_usize(
                "MONITOR_EVENT_CHANNEL_CAPACITY",
                ServerSettings::default().event_channel_capacity,
            ),
        };

        Ok(Self {
            exchange,
            symbols,
            bus,
            producer,
            server,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Bus settings are missing or invalid.
    #[error(transparent)]
    Bus(#[from] BusSettingsError),
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .and_then(|v| match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
