//! Market Data Event Envelope
//!
//! Wire format on the topic:
//!
//! ```json
//! {"message": "<raw exchange frame>", "source": "coinbase"}
//! ```
//!
//! The `message` is kept verbatim; the monitor never parses it and the
//! analysis ingest is the only place that decodes it.

use serde::{Deserialize, Deserializer, Serialize};

/// Errors encoding or decoding the envelope.
#[derive(Debug, thiserror::Error)]
pub enum EventCodecError {
    /// JSON encoding/decoding failed.
    #[error("envelope JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record value was not valid UTF-8.
    #[error("envelope is not valid UTF-8")]
    InvalidUtf8,
}

/// A raw exchange frame tagged with the exchange it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketDataEvent {
    /// Raw JSON frame as received from the exchange.
    ///
    /// A `null` or missing value decodes to an empty string; the parser
    /// rejects blank messages.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub message: String,
    /// Exchange identifier, e.g. `coinbase`.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub source: String,
}

impl MarketDataEvent {
    /// Wrap a raw frame.
    #[must_use]
    pub fn new(message: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
        }
    }

    /// Serialize the envelope to its JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, EventCodecError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode an envelope from a bus record value.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not UTF-8 or not a JSON envelope.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, EventCodecError> {
        let text = std::str::from_utf8(bytes).map_err(|_| EventCodecError::InvalidUtf8)?;
        Ok(serde_json::from_str(text)?)
    }

    /// Whether the raw frame is missing or whitespace only.
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.message.trim().is_empty()
    }

    /// Best-effort lookup of the frame's `product_id`, used as a record key.
    ///
    /// Returns `None` if the frame is not a JSON object or has no string
    /// `product_id`.
    #[must_use]
    pub fn product_id_hint(&self) -> Option<String> {
        #[derive(Deserialize)]
        struct Probe {
            product_id: Option<String>,
        }

        serde_json::from_str::<Probe>(&self.message)
            .ok()
            .and_then(|probe| probe.product_id)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
