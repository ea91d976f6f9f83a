//! Application Services

mod forwarder;
mod streaming;

pub use forwarder::EventForwarder;
pub use streaming::{OrchestratorError, StreamingOrchestrator};
