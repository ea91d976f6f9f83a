//! Domain Layer - Connection lifecycle and symbol sets.
//!
//! Pure types with no I/O: the connector state machine and the
//! configured product list.

/// Exchange connection state machine.
pub mod connection;

/// Product symbol sets.
pub mod symbols;
