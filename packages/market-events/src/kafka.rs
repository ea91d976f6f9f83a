//! Kafka Client Settings
//!
//! Connection settings shared by the producer in the monitor and the
//! consumers in the analysis ingest.
//!
//! # Environment Variables
//!
//! - `BUS_BOOTSTRAP_SERVERS`: Broker list (required)
//! - `BUS_SECURITY_PROTOCOL`: e.g. `SASL_SSL` (optional)
//! - `BUS_SASL_MECHANISM`: e.g. `SCRAM-SHA-256` (optional)
//! - `BUS_SASL_USERNAME` / `BUS_SASL_PASSWORD` (optional)

use rdkafka::ClientConfig;

/// Default topic carrying raw market data envelopes.
pub const DEFAULT_MARKET_DATA_TOPIC: &str = "coinbase-market-data";

/// Bus settings error.
#[derive(Debug, thiserror::Error)]
pub enum BusSettingsError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Optional SASL/TLS settings for hosted brokers.
#[derive(Clone, Default)]
pub struct BusSecurity {
    /// `security.protocol`, e.g. `SASL_SSL`.
    pub protocol: String,
    /// `sasl.mechanisms`, e.g. `SCRAM-SHA-256`.
    pub sasl_mechanism: Option<String>,
    /// SASL username.
    pub sasl_username: Option<String>,
    /// SASL password.
    pub sasl_password: Option<String>,
}

impl std::fmt::Debug for BusSecurity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusSecurity")
            .field("protocol", &self.protocol)
            .field("sasl_mechanism", &self.sasl_mechanism)
            .field("sasl_username", &self.sasl_username)
            .field("sasl_password", &self.sasl_password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Broker connection settings.
#[derive(Debug, Clone)]
pub struct BusSettings {
    /// Comma-separated broker list.
    pub bootstrap_servers: String,
    /// SASL/TLS settings, `None` for plaintext.
    pub security: Option<BusSecurity>,
}

impl BusSettings {
    /// Plaintext settings for the given brokers.
    #[must_use]
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            security: None,
        }
    }

    /// Load settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `BUS_BOOTSTRAP_SERVERS` is missing or empty.
    pub fn from_env() -> Result<Self, BusSettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through `lookup`, which maps a variable name to its value.
    ///
    /// # Errors
    ///
    /// Returns an error if `BUS_BOOTSTRAP_SERVERS` is missing or empty.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, BusSettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bootstrap_servers = lookup("BUS_BOOTSTRAP_SERVERS")
            .ok_or_else(|| BusSettingsError::MissingEnvVar("BUS_BOOTSTRAP_SERVERS".to_string()))?;

        if bootstrap_servers.trim().is_empty() {
            return Err(BusSettingsError::EmptyValue(
                "BUS_BOOTSTRAP_SERVERS".to_string(),
            ));
        }

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let security = non_empty("BUS_SECURITY_PROTOCOL").map(|protocol| BusSecurity {
            protocol,
            sasl_mechanism: non_empty("BUS_SASL_MECHANISM"),
            sasl_username: non_empty("BUS_SASL_USERNAME"),
            sasl_password: non_empty("BUS_SASL_PASSWORD"),
        });

        Ok(Self {
            bootstrap_servers: bootstrap_servers.trim().to_string(),
            security,
        })
    }

    /// Base client config with brokers and security applied.
    ///
    /// Producers and consumers layer their own settings on top.
    #[must_use]
    pub fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.bootstrap_servers);

        if let Some(security) = &self.security
            && security.protocol != "PLAINTEXT"
        {
            cfg.set("security.protocol", &security.protocol);

            // only set SASL bits if provided
            if let Some(mechanism) = &security.sasl_mechanism {
                cfg.set("sasl.mechanisms", mechanism);
            }
            if let Some(username) = &security.sasl_username {
                cfg.set("sasl.username", username);
            }
            if let Some(password) = &security.sasl_password {
                cfg.set("sasl.password", password);
            }
        }

        cfg
    }
}
