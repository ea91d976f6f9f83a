//! Port Interfaces
//!
//! ## Driving Ports (Inbound)
//!
//! - `BatchSourcePort`: batches of bus records with manual acknowledgement
//!
//! ## Driven Ports (Outbound)
//!
//! - `TickRepositoryPort`: append-only tick storage
//! - `TickQueryPort`: latest, range and per-minute reads of stored ticks
//! - `AnalysisPort`: downstream analysis of persisted ticks

mod analysis_port;
mod batch_source_port;
mod tick_repository_port;

pub use analysis_port::{AnalysisError, AnalysisPort, InMemoryAnalysis, NoOpAnalysis};
pub use batch_source_port::{Batch, BatchSourcePort, BusError, InMemoryBatchSource, PartitionRange};
pub use tick_repository_port::{
    InMemoryTickRepository, PersistenceError, TickQueryPort, TickRepositoryPort,
};
