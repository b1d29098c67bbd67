//! Client-side ingestion: per-destination batching, deduplication and writes.

pub mod config;
pub mod counters;
pub mod ingestor;
pub mod pipeline;
pub(crate) mod plan;
pub mod queue;

pub use config::IngestorConfig;
pub use counters::{CounterSnapshot, IngestCounters};
pub use ingestor::{Ingestor, InsertOutcome};
pub use pipeline::IngestPipeline;
pub use queue::{QueueInsert, WorkerQueue};
