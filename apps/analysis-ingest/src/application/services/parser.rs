//! Tick Parser
//!
//! Turns an envelope's raw exchange frame into a [`Tick`]. Field reads are
//! lenient and isolated: a malformed field is logged and left empty, the
//! rest of the frame is kept.
//!
//! Fields are read from the raw JSON text, so a numeric literal reaches
//! [`Decimal`] exactly as it was written on the wire and never passes
//! through `f64`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use market_events::MarketDataEvent;
use rust_decimal::Decimal;
use serde_json::value::RawValue;
use uuid::Uuid;

use crate::domain::tick::Tick;
use crate::infrastructure::metrics::{ParseFailure, record_parse_failure};

/// Parse `event`, stamping the current instant as ingest time.
#[must_use]
pub fn parse_tick(event: &MarketDataEvent) -> Option<Tick> {
    parse_tick_at(event, Utc::now())
}

/// Parse `event` with an explicit ingest instant.
///
/// Returns `None` for blank frames, frames that are not JSON objects, and
/// frames without a `product_id`.
#[must_use]
pub fn parse_tick_at(event: &MarketDataEvent, now: DateTime<Utc>) -> Option<Tick> {
    if event.is_blank() {
        tracing::error!(source = %event.source, "Blank market data message");
        record_parse_failure(ParseFailure::Blank);
        return None;
    }

    let fields: HashMap<String, &RawValue> = match serde_json::from_str(&event.message) {
        Ok(fields) => fields,
        Err(e) => {
            tracing::error!(
                source = %event.source,
                error = %e,
                payload = %event.message,
                "Unparsable market data message"
            );
            record_parse_failure(ParseFailure::Json);
            return None;
        }
    };
    let frame = Frame { fields: &fields };

    let Some(product_id) = frame.text("product_id").filter(|p| !p.trim().is_empty()) else {
        let kind = frame.text("type");
        tracing::warn!(
            source = %event.source,
            kind = kind.as_deref().unwrap_or("unknown"),
            "Frame has no product_id, skipping"
        );
        record_parse_failure(ParseFailure::MissingProduct);
        return None;
    };

    let time = frame.time("time").unwrap_or(now);

    Some(Tick {
        id: Uuid::new_v4(),
        tick_id: frame.uuid("tick_id"),
        kind: frame.text("type"),
        sequence: frame.integer("sequence"),
        product_id,
        price: frame.decimal("price"),
        open_24h: frame.decimal("open_24h"),
        volume_24h: frame.decimal("volume_24h"),
        low_24h: frame.decimal("low_24h"),
        high_24h: frame.decimal("high_24h"),
        volume_30d: frame.decimal("volume_30d"),
        best_bid: frame.decimal("best_bid"),
        best_ask: frame.decimal("best_ask"),
        best_bid_size: frame.decimal("best_bid_size"),
        best_ask_size: frame.decimal("best_ask_size"),
        side: frame.text("side"),
        time,
        trade_id: frame.integer("trade_id"),
        last_size: frame.decimal("last_size"),
        source: event.source.clone(),
        created_at: now,
    })
}

// =============================================================================
// Field Access
// =============================================================================

/// A field's JSON value, classified without interpreting it.
enum Field<'a> {
    Missing,
    Null,
    Text(String),
    Number(&'a str),
    Other(&'a str),
}

struct Frame<'f, 'a> {
    fields: &'f HashMap<String, &'a RawValue>,
}

impl<'a> Frame<'_, 'a> {
    fn field(&self, name: &str) -> Field<'a> {
        let Some(raw) = self.fields.get(name).copied() else {
            return Field::Missing;
        };
        let text = raw.get().trim();
        match text.as_bytes().first() {
            Some(b'"') => {
                serde_json::from_str::<String>(text).map_or(Field::Other(text), Field::Text)
            }
            Some(b'-' | b'0'..=b'9') => Field::Number(text),
            _ if text == "null" => Field::Null,
            _ => Field::Other(text),
        }
    }

    fn text(&self, name: &str) -> Option<String> {
        match self.field(name) {
            Field::Text(s) => Some(s),
            Field::Number(n) => Some(n.to_string()),
            Field::Missing | Field::Null => None,
            Field::Other(raw) => {
                invalid_field(name, raw, "expected a string");
                None
            }
        }
    }

    fn integer(&self, name: &str) -> Option<i64> {
        let (raw, literal) = match self.field(name) {
            Field::Missing | Field::Null => return None,
            Field::Text(s) => (s.trim().to_string(), false),
            Field::Number(n) => (n.to_string(), true),
            Field::Other(raw) => {
                invalid_field(name, raw, "expected an integer");
                return None;
            }
        };

        match raw.parse::<i64>() {
            Ok(value) => Some(value),
            Err(e) => {
                let digits = raw.strip_prefix('-').unwrap_or(&raw);
                let integral = !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit());
                let reason = if integral {
                    "integer out of 64-bit range"
                } else if literal {
                    "not an integer"
                } else {
                    "non-numeric string"
                };
                tracing::warn!(field = name, value = %raw, error = %e, "{reason}");
                record_parse_failure(ParseFailure::Field);
                None
            }
        }
    }

    fn decimal(&self, name: &str) -> Option<Decimal> {
        let raw = match self.field(name) {
            Field::Missing | Field::Null => return None,
            Field::Text(s) => s,
            Field::Number(n) => n.to_string(),
            Field::Other(raw) => {
                invalid_field(name, raw, "expected a decimal");
                return None;
            }
        };

        match parse_decimal(raw.trim()) {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(
                    field = name,
                    value = %raw,
                    error = %e,
                    "Non-numeric decimal field"
                );
                record_parse_failure(ParseFailure::Field);
                None
            }
        }
    }

    fn time(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.field(name) {
            Field::Text(s) => match DateTime::parse_from_rfc3339(s.trim()) {
                Ok(t) => Some(t.with_timezone(&Utc)),
                Err(e) => {
                    tracing::warn!(
                        field = name,
                        value = %s,
                        error = %e,
                        "Unparsable time, using ingest time"
                    );
                    record_parse_failure(ParseFailure::Field);
                    None
                }
            },
            Field::Missing | Field::Null => {
                tracing::debug!(field = name, "No time in frame, using ingest time");
                None
            }
            Field::Number(raw) | Field::Other(raw) => {
                invalid_field(name, raw, "expected an ISO-8601 string");
                None
            }
        }
    }

    fn uuid(&self, name: &str) -> Option<Uuid> {
        let s = self.text(name)?;
        match Uuid::parse_str(s.trim()) {
            Ok(id) => Some(id),
            Err(e) => {
                tracing::warn!(field = name, value = %s, error = %e, "Invalid UUID");
                record_parse_failure(ParseFailure::Field);
                None
            }
        }
    }
}

fn invalid_field(name: &str, raw: &str, expected: &str) {
    tracing::warn!(field = name, value = %raw, "Unexpected field type: {expected}");
    record_parse_failure(ParseFailure::Field);
}

/// Parse a decimal literal, accepting exponent notation.
///
/// Errors instead of rounding when the literal does not fit.
fn parse_decimal(raw: &str) -> Result<Decimal, rust_decimal::Error> {
    if raw.contains(['e', 'E']) {
        Decimal::from_scientific(raw)
    } else {
        Decimal::from_str_exact(raw)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;
    use chrono::TimeZone;
    use test_case::test_case;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn parse(message: &str) -> Option<Tick> {
        parse_tick_at(&MarketDataEvent::new(message, "coinbase"), now())
    }

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn full_ticker_frame() {
        let tick = parse(
            r#"{"type":"ticker","sequence":37475248783,"product_id":"BTC-USD","price":"65000.12345678",
                "open_24h":"64000.00","volume_24h":"1234.56789012","low_24h":"63000.5","high_24h":"66000.25",
                "volume_30d":"40000.1","best_bid":"65000.10","best_ask":"65000.20","best_bid_size":"0.5",
                "best_ask_size":"0.25","side":"buy","time":"2024-01-02T03:04:05.123Z","trade_id":583447853,
                "last_size":"0.0001"}"#,
        )
        .unwrap();

        assert_eq!(tick.product_id, "BTC-USD");
        assert_eq!(tick.kind.as_deref(), Some("ticker"));
        assert_eq!(tick.sequence, Some(37_475_248_783));
        assert_eq!(tick.trade_id, Some(583_447_853));
        assert_eq!(tick.price, Some(dec("65000.12345678")));
        assert_eq!(tick.best_bid.unwrap().to_string(), "65000.10");
        assert_eq!(tick.volume_24h, Some(dec("1234.56789012")));
        assert_eq!(tick.last_size, Some(dec("0.0001")));
        assert_eq!(tick.side.as_deref(), Some("buy"));
        assert_eq!(
            tick.time,
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap() + chrono::Duration::milliseconds(123)
        );
        assert_eq!(tick.source, "coinbase");
        assert_eq!(tick.created_at, now());
    }

    #[test_case("" ; "empty")]
    #[test_case("   " ; "whitespace")]
    #[test_case("not-json" ; "garbage")]
    #[test_case("[1,2,3]" ; "array")]
    #[test_case(r#""ticker""# ; "bare string")]
    fn rejected_frames(message: &str) {
        assert!(parse(message).is_none());
    }

    #[test_case(r#"{"type":"subscriptions","channels":[]}"# ; "control frame")]
    #[test_case(r#"{"type":"ticker","product_id":null}"# ; "null product")]
    #[test_case(r#"{"type":"ticker","product_id":"  "}"# ; "blank product")]
    fn frames_without_product_are_rejected(message: &str) {
        assert!(parse(message).is_none());
    }

    #[test]
    fn source_comes_from_envelope() {
        let event = MarketDataEvent::new(r#"{"product_id":"BTC-USD","source":"spoofed"}"#, "coinbase");
        assert_eq!(parse_tick_at(&event, now()).unwrap().source, "coinbase");
    }

    #[test_case(r#"{"product_id":"ETH-USD"}"# ; "missing")]
    #[test_case(r#"{"product_id":"ETH-USD","time":null}"# ; "null")]
    #[test_case(r#"{"product_id":"ETH-USD","time":"yesterday"}"# ; "unparsable")]
    #[test_case(r#"{"product_id":"ETH-USD","time":1700000000}"# ; "epoch number")]
    fn time_falls_back_to_ingest_instant(message: &str) {
        assert_eq!(parse(message).unwrap().time, now());
    }

    #[test]
    fn offset_times_normalise_to_utc() {
        let tick = parse(r#"{"product_id":"BTC-USD","time":"2024-01-02T05:04:05+02:00"}"#).unwrap();
        assert_eq!(tick.time, Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap());
    }

    #[test_case(r#""65000.10""#, "65000.10" ; "string")]
    #[test_case("65000.10", "65000.10" ; "number keeps trailing zero")]
    #[test_case(r#"" 1.5 ""#, "1.5" ; "padded string")]
    #[test_case("1.5e3", "1500" ; "exponent")]
    #[test_case("-0.00000001", "-0.00000001" ; "negative tiny")]
    fn decimal_forms(raw: &str, expected: &str) {
        let tick = parse(&format!(r#"{{"product_id":"BTC-USD","price":{raw}}}"#)).unwrap();
        assert_eq!(tick.price, Some(dec(expected)));
    }

    #[test]
    fn number_and_string_prices_are_identical() {
        let a = parse(r#"{"product_id":"BTC-USD","price":65000.12345678}"#).unwrap();
        let b = parse(r#"{"product_id":"BTC-USD","price":"65000.12345678"}"#).unwrap();
        assert_eq!(a.price, b.price);
        assert_eq!(a.price.unwrap().to_string(), b.price.unwrap().to_string());
    }

    #[test]
    fn bad_decimal_keeps_other_fields() {
        let tick = parse(r#"{"product_id":"BTC-USD","price":"abc","best_bid":"1.25","volume_24h":true}"#).unwrap();
        assert_eq!(tick.price, None);
        assert_eq!(tick.volume_24h, None);
        assert_eq!(tick.best_bid, Some(dec("1.25")));
    }

    #[test_case(r#""42""#, Some(42) ; "numeric string")]
    #[test_case("4294967296", Some(4_294_967_296) ; "beyond 32 bits")]
    #[test_case("-7", Some(-7) ; "negative")]
    #[test_case("99999999999999999999", None ; "beyond 64 bits")]
    #[test_case("1.5", None ; "fractional")]
    #[test_case(r#""seven""#, None ; "non numeric string")]
    #[test_case("{}", None ; "object")]
    fn integer_forms(raw: &str, expected: Option<i64>) {
        let tick = parse(&format!(r#"{{"product_id":"BTC-USD","sequence":{raw},"price":"1"}}"#)).unwrap();
        assert_eq!(tick.sequence, expected);
        assert_eq!(tick.price, Some(Decimal::ONE));
    }

    #[test]
    fn bad_trade_id_keeps_price() {
        let tick = parse(r#"{"product_id":"BTC-USD","trade_id":"x","price":"10.5"}"#).unwrap();
        assert_eq!(tick.trade_id, None);
        assert_eq!(tick.price, Some(dec("10.5")));
    }

    #[test]
    fn tick_id_accepts_uuid_strings_only() {
        let id = Uuid::new_v4();
        let tick = parse(&format!(r#"{{"product_id":"BTC-USD","tick_id":"{id}"}}"#)).unwrap();
        assert_eq!(tick.tick_id, Some(id));

        let tick = parse(r#"{"product_id":"BTC-USD","tick_id":"not-a-uuid"}"#).unwrap();
        assert_eq!(tick.tick_id, None);
    }

    #[test]
    fn escaped_strings_are_unescaped() {
        let tick = parse(r#"{"product_id":"BTC-USD","side":"se\"ll"}"#).unwrap();
        assert_eq!(tick.product_id, "BTC-USD");
        assert_eq!(tick.side.as_deref(), Some("se\"ll"));
    }

    #[test]
    fn reparsing_is_stable() {
        let message = r#"{"type":"ticker","product_id":"BTC-USD","price":"65000.12345678","time":"2024-01-02T03:04:05.123Z"}"#;
        let first = parse(message).unwrap();
        let second = parse_tick_at(&MarketDataEvent::new(message, "coinbase"), Utc::now()).unwrap();
        assert!(first.same_market_data(&second));
    }
}
