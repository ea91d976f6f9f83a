//! Configuration Module
//!
//! Environment-driven configuration for the monitor service.

mod settings;

pub use settings::{ConfigError, ExchangeSettings, MonitorConfig, ServerSettings};
