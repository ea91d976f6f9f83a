//! Prometheus Metrics Module
//!
//! # Metrics
//!
//! - `market_monitor_frames_received_total{exchange}`: text frames read off the socket
//! - `market_monitor_events_published_total{exchange}`: events accepted by the producer
//! - `market_monitor_publish_failures_total{exchange,stage}`: enqueue or delivery failures
//! - `market_monitor_connection_state{exchange}`: 0 disconnected .. 5 error
//! - `market_monitor_reconnects_total{exchange}`: reconnection attempts
//!
//! Exposed at `/metrics` on the health server port.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::connection::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder and describe all metrics.
///
/// Later calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Prometheus handle for rendering, `None` before [`init_metrics`].
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "market_monitor_frames_received_total",
        "Text frames received from exchange feeds"
    );
    describe_counter!(
        "market_monitor_events_published_total",
        "Events accepted by the bus producer"
    );
    describe_counter!(
        "market_monitor_publish_failures_total",
        "Events the bus producer failed to enqueue or deliver"
    );
    describe_gauge!(
        "market_monitor_connection_state",
        "Exchange connection state (0=disconnected 1=connecting 2=open 3=subscribed 4=closing 5=error)"
    );
    describe_counter!(
        "market_monitor_reconnects_total",
        "Exchange reconnection attempts"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Stage at which a publish failed.
#[derive(Debug, Clone, Copy)]
pub enum PublishStage {
    /// Producer refused the record.
    Enqueue,
    /// Broker did not acknowledge the record.
    Delivery,
}

impl PublishStage {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Enqueue => "enqueue",
            Self::Delivery => "delivery",
        }
    }
}

/// Record a text frame read from an exchange.
pub fn record_frame_received(exchange: &str) {
    counter!(
        "market_monitor_frames_received_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Record an event accepted by the producer.
pub fn record_event_published(exchange: &str) {
    counter!(
        "market_monitor_events_published_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Record a failed publish.
pub fn record_publish_failure(exchange: &str, stage: PublishStage) {
    counter!(
        "market_monitor_publish_failures_total",
        "exchange" => exchange.to_string(),
        "stage" => stage.as_str()
    )
    .increment(1);
}

/// Publish the current connection state.
pub fn set_connection_state(exchange: &str, state: ConnectionState) {
    gauge!(
        "market_monitor_connection_state",
        "exchange" => exchange.to_string()
    )
    .set(state.as_gauge());
}

/// Record a reconnection attempt.
pub fn record_reconnect(exchange: &str) {
    counter!(
        "market_monitor_reconnects_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}
