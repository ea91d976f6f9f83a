//! Telemetry Defaults
//!
//! Service name and log filter for this binary; subscriber and exporter
//! setup is shared with the other services.

pub use telemetry::{TelemetryConfig, TelemetryGuard};

/// Service name attached to spans unless `OTEL_SERVICE_NAME` is set.
pub const SERVICE_NAME: &str = "analysis-ingest";

/// Filter directives used unless `RUST_LOG` is set.
pub const DEFAULT_FILTER: &str = "analysis_ingest=info,market_events=info,rdkafka=warn,sqlx=warn";

/// Configuration from the environment with this service's defaults.
#[must_use]
pub fn config() -> TelemetryConfig {
    TelemetryConfig::from_env(SERVICE_NAME, DEFAULT_FILTER)
}

/// Initialize telemetry. Keep the returned guard alive for the life of the
/// process.
#[must_use]
pub fn init() -> TelemetryGuard {
    telemetry::init(&config())
}
