//! PostgreSQL / TimescaleDB tick store.

mod repository;

pub use repository::{Bucketing, DatabaseSettings, PgTickRepository};
