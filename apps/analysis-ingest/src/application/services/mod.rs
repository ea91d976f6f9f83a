//! Application Services
//!
//! The per-event pipeline (parse, persist, dispatch), the batch processor
//! that fans it out on the worker pool, and the consumer loop that
//! acknowledges or redelivers each batch.

mod analyzer;
mod batch;
mod consumer;
mod dispatcher;
mod parser;
mod persistence;
mod worker_pool;

pub use analyzer::{DEFAULT_WINDOW, RollingWindowAnalyzer};
pub use batch::{BatchError, BatchOutcome, BatchProcessor};
pub use consumer::{ConsumerLoop, ConsumerStats};
pub use dispatcher::AnalysisDispatcher;
pub use parser::{parse_tick, parse_tick_at};
pub use persistence::TickWriter;
pub use worker_pool::{PoolError, PoolTask, WorkerPool, WorkerPoolSettings};
