// ============================================================================
// Shardline: multi-head ingestion client
// ============================================================================

//! Routes records straight to the worker that owns their shard instead of
//! funnelling every write through the head node.
//!
//! ```no_run
//! use shardline::{ClusterHandle, InMemoryCluster, Ingestor, IngestorConfig, Record};
//! use std::sync::Arc;
//!
//! # async fn run(cluster: Arc<InMemoryCluster>) -> shardline::Result<()> {
//! let handle = ClusterHandle::in_memory(cluster);
//! let mut ingestor = Ingestor::connect(&handle, "orders", IngestorConfig::new().batch_size(500)).await?;
//!
//! ingestor.insert(Record::new().with("id", 1).with("region", "eu")).await?;
//! ingestor.flush().await?;
//! # Ok(())
//! # }
//! ```

pub mod cluster;
pub mod codec;
pub mod core;
pub mod ingest;
pub mod key;
pub mod routing;

// Re-export main types for convenience
pub use cluster::{
    ClusterHandle, Destination, InMemoryCluster, InsertOptions, SchemaIntrospector, Topology,
    TopologyProvider, Transport, WriteResponse,
};
pub use codec::{MessagePackCodec, RecordCodec};
pub use core::{
    ColumnProperty, ColumnSpec, ColumnType, DestinationFailure, IngestError, Record, Result,
    TableSchema, Value,
};
pub use ingest::{
    CounterSnapshot, IngestPipeline, Ingestor, IngestorConfig, InsertOutcome, QueueInsert,
    WorkerQueue,
};
pub use key::{KeyBuilder, KeyHasher, KeyKind, Murmur3KeyHasher, RecordKey};
pub use routing::{Router, RoutingTable};
