//! Trade Signals
//!
//! Schema types for the `trade_signals` table. Signals are produced
//! downstream of the ingest; the ingest only owns the shape.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::indicators::IndicatorSnapshot;

/// Direction of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SignalType {
    /// Open or add to a long position.
    Buy,
    /// Close or go short.
    Sell,
    /// No action.
    Hold,
}

impl SignalType {
    /// Stored column value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = SignalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BUY" => Ok(Self::Buy),
            "SELL" => Ok(Self::Sell),
            "HOLD" => Ok(Self::Hold),
            _ => Err(SignalError::UnknownType(s.to_string())),
        }
    }
}

/// Signal validation errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SignalError {
    /// Confidence outside `[0, 1]`.
    #[error("confidence {0} is outside [0, 1]")]
    ConfidenceOutOfRange(f64),

    /// Unrecognised signal type.
    #[error("unknown signal type: {0}")]
    UnknownType(String),
}

/// A trading signal with the indicator values that triggered it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TradeSignal {
    /// Instrument.
    pub product_id: String,
    /// Direction.
    pub signal_type: SignalType,
    /// Strategy tag.
    pub strategy: String,
    /// Price when the signal fired.
    pub current_price: Decimal,
    /// Target exit price.
    pub target_price: Option<Decimal>,
    /// Stop loss price.
    pub stop_loss: Option<Decimal>,
    /// Take profit price.
    pub take_profit: Option<Decimal>,
    confidence: f64,
    /// Free-form explanation.
    pub reasoning: Option<String>,
    /// When the signal fired.
    pub timestamp: DateTime<Utc>,
    /// Exchange of the underlying ticks.
    pub source: String,
    /// Indicator values frozen at signal time.
    pub indicators: IndicatorSnapshot,
}

impl TradeSignal {
    /// Build a signal, rejecting confidence outside `[0, 1]`.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::ConfidenceOutOfRange`] for a bad confidence.
    pub fn new(
        product_id: impl Into<String>,
        signal_type: SignalType,
        strategy: impl Into<String>,
        current_price: Decimal,
        confidence: f64,
        source: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, SignalError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(SignalError::ConfidenceOutOfRange(confidence));
        }

        Ok(Self {
            product_id: product_id.into(),
            signal_type,
            strategy: strategy.into(),
            current_price,
            target_price: None,
            stop_loss: None,
            take_profit: None,
            confidence,
            reasoning: None,
            timestamp,
            source: source.into(),
            indicators: IndicatorSnapshot::default(),
        })
    }

    /// Confidence in `[0, 1]`.
    #[must_use]
    pub const fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Attach the indicator values.
    #[must_use]
    pub const fn with_indicators(mut self, indicators: IndicatorSnapshot) -> Self {
        self.indicators = indicators;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0.0 ; "lower bound")]
    #[test_case(0.75 ; "inside")]
    #[test_case(1.0 ; "upper bound")]
    fn accepts_confidence_in_range(confidence: f64) {
        let signal = TradeSignal::new(
            "BTC-USD",
            SignalType::Buy,
            "sma-cross",
            Decimal::new(6_500_000, 2),
            confidence,
            "coinbase",
            Utc::now(),
        )
        .unwrap();
        assert!((signal.confidence() - confidence).abs() < f64::EPSILON);
    }

    #[test_case(-0.01 ; "negative")]
    #[test_case(1.5 ; "above one")]
    #[test_case(f64::NAN ; "nan")]
    fn rejects_confidence_out_of_range(confidence: f64) {
        let err = TradeSignal::new(
            "BTC-USD",
            SignalType::Sell,
            "sma-cross",
            Decimal::ONE,
            confidence,
            "coinbase",
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, SignalError::ConfidenceOutOfRange(_)));
    }

    #[test]
    fn signal_type_round_trips_through_column_value() {
        for kind in [SignalType::Buy, SignalType::Sell, SignalType::Hold] {
            assert_eq!(kind.as_str().parse::<SignalType>().unwrap(), kind);
        }
        assert_eq!("hold".parse::<SignalType>().unwrap(), SignalType::Hold);
        assert!("short".parse::<SignalType>().is_err());
    }

    #[test]
    fn serializes_uppercase() {
        assert_eq!(serde_json::to_string(&SignalType::Buy).unwrap(), "\"BUY\"");
    }
}
