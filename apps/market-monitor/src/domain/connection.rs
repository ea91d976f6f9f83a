//! Connection State Machine
//!
//! ```text
//! DISCONNECTED -> CONNECTING -> OPEN -> SUBSCRIBED -> CLOSING -> DISCONNECTED
//!                      |          |         |
//!                      +----------+---------+--> ERROR -> DISCONNECTED
//! ```
//!
//! Remote close and transport failure drop straight back to `Disconnected`
//! from any live state.

use std::fmt;

/// Lifecycle state of an exchange connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No socket.
    #[default]
    Disconnected,
    /// Handshake in progress.
    Connecting,
    /// Handshake done, subscribe frame not yet sent.
    Open,
    /// Subscribe frame sent; frames are flowing.
    Subscribed,
    /// Local close in progress.
    Closing,
    /// Transport failed; about to drop to `Disconnected`.
    Error,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Closing, Connecting, Disconnected, Error, Open, Subscribed};

        matches!(
            (self, next),
            (Disconnected, Connecting)
                | (Connecting, Open | Error | Disconnected)
                | (Open, Subscribed | Closing | Error | Disconnected)
                | (Subscribed, Closing | Error | Disconnected)
                | (Closing | Error, Disconnected)
        )
    }

    /// Whether a socket is up (`Open` or `Subscribed`).
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open | Self::Subscribed)
    }

    /// Lowercase name used in logs, metrics and the health endpoint.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Subscribed => "subscribed",
            Self::Closing => "closing",
            Self::Error => "error",
        }
    }

    /// Numeric encoding for the connection-state gauge.
    #[must_use]
    pub const fn as_gauge(self) -> f64 {
        match self {
            Self::Disconnected => 0.0,
            Self::Connecting => 1.0,
            Self::Open => 2.0,
            Self::Subscribed => 3.0,
            Self::Closing => 4.0,
            Self::Error => 5.0,
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::{self, *};
    use test_case::test_case;

    #[test_case(Disconnected, Connecting ; "connect")]
    #[test_case(Connecting, Open ; "handshake")]
    #[test_case(Open, Subscribed ; "subscribe")]
    #[test_case(Subscribed, Closing ; "local close")]
    #[test_case(Closing, Disconnected ; "closed")]
    #[test_case(Subscribed, Disconnected ; "remote close")]
    #[test_case(Open, Error ; "transport error")]
    #[test_case(Error, Disconnected ; "error settles")]
    fn legal(from: ConnectionState, to: ConnectionState) {
        assert!(from.can_transition_to(to));
    }

    #[test_case(Disconnected, Subscribed ; "skip handshake")]
    #[test_case(Subscribed, Connecting ; "reconnect while live")]
    #[test_case(Disconnected, Closing ; "close when down")]
    #[test_case(Connecting, Closing ; "close mid handshake")]
    #[test_case(Closing, Open ; "reopen while closing")]
    fn illegal(from: ConnectionState, to: ConnectionState) {
        assert!(!from.can_transition_to(to));
    }

    #[test]
    fn connected_states() {
        assert!(Open.is_connected());
        assert!(Subscribed.is_connected());
        assert!(!Disconnected.is_connected());
        assert!(!Connecting.is_connected());
        assert!(!Closing.is_connected());
    }

    #[test]
    fn display_matches_as_str() {
        assert_eq!(Subscribed.to_string(), "subscribed");
        assert_eq!(ConnectionState::default(), Disconnected);
    }
}
