//! Minute Bars
//!
//! Per-minute aggregate over stored ticks for one product.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

/// Aggregate of the ticks whose `time` falls in one UTC minute.
///
/// Price statistics skip ticks without a price; `ticks` counts every row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MinuteBar {
    /// Start of the minute.
    pub bucket: DateTime<Utc>,
    /// Mean price.
    pub avg_price: Option<Decimal>,
    /// Highest price.
    pub max_price: Option<Decimal>,
    /// Lowest price.
    pub min_price: Option<Decimal>,
    /// Sum of the 24 hour volume column.
    pub total_volume: Option<Decimal>,
    /// Rows in the bucket.
    pub ticks: i64,
}

/// Start of the UTC minute containing `time`.
#[must_use]
pub fn minute_of(time: DateTime<Utc>) -> DateTime<Utc> {
    let secs = time.timestamp();
    DateTime::from_timestamp(secs - secs.rem_euclid(60), 0).unwrap_or(time)
}
