//! Coinbase Exchange Adapter
//!
//! - [`client`]: WebSocket connector implementing `ExchangeConnectorPort`
//! - [`auth`]: HMAC request signing
//! - [`messages`]: outbound subscribe frames
//! - [`reconnect`]: optional backoff after a dropped feed

pub mod auth;
pub mod client;
pub mod messages;
pub mod reconnect;

pub use auth::{ApiCredentials, AuthError};
pub use client::{CoinbaseConfig, CoinbaseConnector, DEFAULT_COINBASE_WS_URL};
pub use messages::SubscribeRequest;
pub use reconnect::ReconnectPolicy;
