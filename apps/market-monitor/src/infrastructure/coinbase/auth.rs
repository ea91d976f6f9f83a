//! Exchange Authentication
//!
//! Signs the subscribe frame for authenticated feeds.
//!
//! # Signature
//!
//! ```text
//! prehash   = timestamp + "GET" + "/users/self/verify"
//! signature = base64(HMAC-SHA256(base64_decode(secret), prehash))
//! ```
//!
//! Authentication is enabled only when key, secret and passphrase are all
//! non-empty.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::messages::SignedAuth;

type HmacSha256 = Hmac<Sha256>;

/// Method component of the signed prehash.
const VERIFY_METHOD: &str = "GET";

/// Path component of the signed prehash.
const VERIFY_PATH: &str = "/users/self/verify";

/// Authentication errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// API secret is not valid base64.
    #[error("API secret is not valid base64: {0}")]
    InvalidSecret(String),
}

/// API credentials for the authenticated feed.
#[derive(Clone)]
pub struct ApiCredentials {
    key: String,
    secret: String,
    passphrase: String,
}

impl ApiCredentials {
    /// Build credentials from the configured triple.
    ///
    /// Returns `None` unless all three parts are non-empty.
    #[must_use]
    pub fn from_parts(key: &str, secret: &str, passphrase: &str) -> Option<Self> {
        let (key, secret, passphrase) = (key.trim(), secret.trim(), passphrase.trim());
        if key.is_empty() || secret.is_empty() || passphrase.is_empty() {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            secret: secret.to_string(),
            passphrase: passphrase.to_string(),
        })
    }

    /// API key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Compute the base64 signature for `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidSecret`] if the secret does not decode.
    pub fn sign(&self, timestamp: &str) -> Result<String, AuthError> {
        let secret = STANDARD
            .decode(&self.secret)
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;

        let mut mac = HmacSha256::new_from_slice(&secret)
            .map_err(|e| AuthError::InvalidSecret(e.to_string()))?;
        mac.update(timestamp.as_bytes());
        mac.update(VERIFY_METHOD.as_bytes());
        mac.update(VERIFY_PATH.as_bytes());

        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Auth fields for a subscribe frame signed at `timestamp`.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn signed_auth(&self, timestamp: &str) -> Result<SignedAuth, AuthError> {
        Ok(SignedAuth {
            signature: self.sign(timestamp)?,
            key: self.key.clone(),
            passphrase: self.passphrase.clone(),
            timestamp: timestamp.to_string(),
        })
    }
}

impl std::fmt::Debug for ApiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiCredentials")
            .field("key", &"[REDACTED]")
            .field("secret", &"[REDACTED]")
            .field("passphrase", &"[REDACTED]")
            .finish()
    }
}

/// Current unix time in whole seconds, as sent in the `timestamp` field.
#[must_use]
pub fn unix_timestamp() -> String {
    chrono::Utc::now().timestamp().to_string()
}
