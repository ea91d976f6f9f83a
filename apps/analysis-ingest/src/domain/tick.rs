//! Tick
//!
//! One ticker update from one exchange for one product, as stored in the
//! `market_data` table. Ticks are created by the parser, inserted once and
//! never updated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

/// A parsed ticker update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tick {
    /// Row identifier, generated at parse time.
    pub id: Uuid,
    /// Exchange-issued tick identifier, if the frame carried one.
    pub tick_id: Option<Uuid>,
    /// Frame type, e.g. `ticker`.
    pub kind: Option<String>,
    /// Feed sequence number.
    pub sequence: Option<i64>,
    /// Instrument, e.g. `BTC-USD`.
    pub product_id: String,
    /// Last trade price.
    pub price: Option<Decimal>,
    /// Price 24 hours ago.
    pub open_24h: Option<Decimal>,
    /// Traded volume over 24 hours.
    pub volume_24h: Option<Decimal>,
    /// 24 hour low.
    pub low_24h: Option<Decimal>,
    /// 24 hour high.
    pub high_24h: Option<Decimal>,
    /// Traded volume over 30 days.
    pub volume_30d: Option<Decimal>,
    /// Best bid price.
    pub best_bid: Option<Decimal>,
    /// Best ask price.
    pub best_ask: Option<Decimal>,
    /// Size at the best bid.
    pub best_bid_size: Option<Decimal>,
    /// Size at the best ask.
    pub best_ask_size: Option<Decimal>,
    /// Aggressor side, `buy` or `sell`.
    pub side: Option<String>,
    /// Event time reported by the feed, or the ingest instant if absent.
    pub time: DateTime<Utc>,
    /// Last trade identifier.
    pub trade_id: Option<i64>,
    /// Size of the last trade.
    pub last_size: Option<Decimal>,
    /// Exchange the frame came from. Always taken from the envelope.
    pub source: String,
    /// Ingest instant.
    pub created_at: DateTime<Utc>,
}

impl Tick {
    /// A tick with only the required fields set.
    #[must_use]
    pub fn new(
        product_id: impl Into<String>,
        source: impl Into<String>,
        time: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tick_id: None,
            kind: None,
            sequence: None,
            product_id: product_id.into(),
            price: None,
            open_24h: None,
            volume_24h: None,
            low_24h: None,
            high_24h: None,
            volume_30d: None,
            best_bid: None,
            best_ask: None,
            best_bid_size: None,
            best_ask_size: None,
            side: None,
            time,
            trade_id: None,
            last_size: None,
            source: source.into(),
            created_at,
        }
    }

    /// Equality on market content, ignoring the row id and ingest instant.
    #[must_use]
    pub fn same_market_data(&self, other: &Self) -> bool {
        Self {
            id: other.id,
            created_at: other.created_at,
            ..self.clone()
        } == *other
    }
}
