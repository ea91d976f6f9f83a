//! Exchange Wire Messages
//!
//! Outbound frames only. Inbound frames are forwarded verbatim and never
//! decoded by the monitor.

use serde::Serialize;

/// Channel the monitor subscribes to.
pub const TICKER_CHANNEL: &str = "ticker";

/// Subscribe frame.
///
/// ```json
/// {"type":"subscribe","channels":[{"name":"ticker","product_ids":["BTC-USD"]}]}
/// ```
///
/// When signed, `signature`, `key`, `passphrase` and `timestamp` are added at
/// the top level.
#[derive(Debug, Clone, Serialize)]
pub struct SubscribeRequest {
    #[serde(rename = "type")]
    kind: &'static str,
    channels: Vec<ChannelSubscription>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    auth: Option<SignedAuth>,
}

/// One channel entry in a subscribe frame.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSubscription {
    /// Channel name.
    pub name: String,
    /// Products to stream on the channel.
    pub product_ids: Vec<String>,
}

/// Authentication fields merged into a signed subscribe frame.
#[derive(Debug, Clone, Serialize)]
pub struct SignedAuth {
    /// Base64 HMAC-SHA256 signature.
    pub signature: String,
    /// API key.
    pub key: String,
    /// API passphrase.
    pub passphrase: String,
    /// Unix seconds the signature was computed for.
    pub timestamp: String,
}

impl SubscribeRequest {
    /// Unsigned ticker subscription for `product_ids`.
    #[must_use]
    pub fn ticker(product_ids: Vec<String>) -> Self {
        Self {
            kind: "subscribe",
            channels: vec![ChannelSubscription {
                name: TICKER_CHANNEL.to_string(),
                product_ids,
            }],
            auth: None,
        }
    }

    /// Attach authentication fields.
    #[must_use]
    pub fn signed(mut self, auth: SignedAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Whether the frame carries authentication.
    #[must_use]
    pub const fn is_signed(&self) -> bool {
        self.auth.is_some()
    }

    /// Serialize to the JSON text frame.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn unsigned_frame_shape() {
        let frame = SubscribeRequest::ticker(vec!["BTC-USD".into(), "ETH-USD".into()]);
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "subscribe",
                "channels": [{"name": "ticker", "product_ids": ["BTC-USD", "ETH-USD"]}]
            })
        );
        assert!(!frame.is_signed());
    }

    #[test]
    fn signed_frame_flattens_auth() {
        let frame = SubscribeRequest::ticker(vec!["BTC-USD".into()]).signed(SignedAuth {
            signature: "sig".into(),
            key: "k".into(),
            passphrase: "p".into(),
            timestamp: "1700000000".into(),
        });
        let value: Value = serde_json::from_str(&frame.to_json().unwrap()).unwrap();
        assert_eq!(value["type"], "subscribe");
        assert_eq!(value["signature"], "sig");
        assert_eq!(value["key"], "k");
        assert_eq!(value["passphrase"], "p");
        assert_eq!(value["timestamp"], "1700000000");
        assert_eq!(value["channels"][0]["product_ids"], json!(["BTC-USD"]));
    }
}
