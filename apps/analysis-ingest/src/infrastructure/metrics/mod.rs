//! Prometheus Metrics Module
//!
//! # Metrics
//!
//! - `analysis_ingest_batches_received_total`: batches pulled from the bus
//! - `analysis_ingest_records_received_total`: records in those batches
//! - `analysis_ingest_batches_total{result}`: acknowledged, redelivered or forced
//! - `analysis_ingest_batch_duration_seconds`: time to process one batch
//! - `analysis_ingest_records_skipped_total`: undecodable bus records
//! - `analysis_ingest_bus_errors_total`: receive, commit and seek failures
//! - `analysis_ingest_parse_failures_total{reason}`: rejected frames and bad fields
//! - `analysis_ingest_ticks_persisted_total{source}`: rows stored
//! - `analysis_ingest_persist_failures_total{source}`: rows the store rejected
//! - `analysis_ingest_dispatches_total{outcome}`: analysis hand-offs
//! - `analysis_ingest_pool_caller_runs_total`: tasks run on the submitter
//! - `analysis_ingest_pool_overflow_total`: detached tasks queued past capacity
//!
//! Exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

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
        "analysis_ingest_batches_received_total",
        "Batches pulled from the bus"
    );
    describe_counter!(
        "analysis_ingest_records_received_total",
        "Bus records in received batches"
    );
    describe_counter!(
        "analysis_ingest_batches_total",
        "Batch results (acknowledged, redelivered, forced)"
    );
    describe_histogram!(
        "analysis_ingest_batch_duration_seconds",
        "Time to parse, persist and dispatch one batch"
    );
    describe_counter!(
        "analysis_ingest_records_skipped_total",
        "Bus records that were not valid envelopes"
    );
    describe_counter!(
        "analysis_ingest_bus_errors_total",
        "Bus receive, commit and seek failures"
    );
    describe_counter!(
        "analysis_ingest_parse_failures_total",
        "Rejected frames and malformed fields"
    );
    describe_counter!(
        "analysis_ingest_ticks_persisted_total",
        "Ticks stored"
    );
    describe_counter!(
        "analysis_ingest_persist_failures_total",
        "Ticks the store rejected"
    );
    describe_counter!(
        "analysis_ingest_dispatches_total",
        "Analysis hand-offs by outcome"
    );
    describe_counter!(
        "analysis_ingest_pool_caller_runs_total",
        "Tasks run on the submitter because the worker pool was full"
    );
    describe_counter!(
        "analysis_ingest_pool_overflow_total",
        "Detached tasks queued past capacity because the worker pool was full"
    );
}

// =============================================================================
// Label Types
// =============================================================================

/// Final state of a processed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchResult {
    /// Processed and committed.
    Acknowledged,
    /// Failed and rewound.
    Redelivered,
    /// Committed after exhausting redeliveries.
    Forced,
}

impl BatchResult {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Acknowledged => "acknowledged",
            Self::Redelivered => "redelivered",
            Self::Forced => "forced",
        }
    }
}

/// Why the parser dropped a frame or a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFailure {
    /// Blank message.
    Blank,
    /// Not a JSON object.
    Json,
    /// No `product_id`.
    MissingProduct,
    /// One field was malformed and left empty.
    Field,
}

impl ParseFailure {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Blank => "blank",
            Self::Json => "json",
            Self::MissingProduct => "missing_product",
            Self::Field => "field",
        }
    }
}

/// Result of an analysis hand-off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Analysis returned normally.
    Completed,
    /// Analysis returned an error or panicked.
    Failed,
    /// The worker pool refused the task.
    Rejected,
}

impl DispatchOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Rejected => "rejected",
        }
    }
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a batch pulled from the bus.
pub fn record_batch_received(records: usize) {
    counter!("analysis_ingest_batches_received_total").increment(1);
    counter!("analysis_ingest_records_received_total").increment(records as u64);
}

/// Record how a batch ended.
pub fn record_batch_result(result: BatchResult) {
    counter!("analysis_ingest_batches_total", "result" => result.as_str()).increment(1);
}

/// Record batch processing time.
pub fn record_batch_duration(elapsed: Duration) {
    histogram!("analysis_ingest_batch_duration_seconds").record(elapsed.as_secs_f64());
}

/// Record an undecodable bus record.
pub fn record_record_skipped() {
    counter!("analysis_ingest_records_skipped_total").increment(1);
}

/// Record a bus failure.
pub fn record_bus_error() {
    counter!("analysis_ingest_bus_errors_total").increment(1);
}

/// Record a parse rejection.
pub fn record_parse_failure(reason: ParseFailure) {
    counter!("analysis_ingest_parse_failures_total", "reason" => reason.as_str()).increment(1);
}

/// Record a stored tick.
pub fn record_tick_persisted(source: &str) {
    counter!(
        "analysis_ingest_ticks_persisted_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record a rejected insert.
pub fn record_persist_failure(source: &str) {
    counter!(
        "analysis_ingest_persist_failures_total",
        "source" => source.to_string()
    )
    .increment(1);
}

/// Record an analysis hand-off.
pub fn record_dispatch(outcome: DispatchOutcome) {
    counter!("analysis_ingest_dispatches_total", "outcome" => outcome.as_str()).increment(1);
}

/// Record a task run on the submitter.
pub fn record_caller_runs() {
    counter!("analysis_ingest_pool_caller_runs_total").increment(1);
}

/// Record a detached task queued past capacity.
pub fn record_pool_overflow() {
    counter!("analysis_ingest_pool_overflow_total").increment(1);
}
