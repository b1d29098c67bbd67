//! Boundary with the database cluster: schema introspection, topology discovery
//! and the per-worker batch write. Implementations own their own retry/backoff.

mod in_memory;

pub use in_memory::{InMemoryCluster, ReceivedBatch};

use crate::codec::{MessagePackCodec, RecordCodec};
use crate::core::{IngestError, Result, TableSchema};
use crate::key::{KeyHasher, Murmur3KeyHasher};
use crate::routing::RoutingTable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// One server process that accepts writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Destination {
    pub index: usize,
    pub endpoint: String,
}

/// Worker layout reported by the cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Coordinating node; receives every write when multi-head is off.
    pub head_endpoint: String,
    pub worker_endpoints: Vec<String>,
    /// Destination index (into `worker_endpoints`) for each shard bucket.
    pub routing_table: Vec<usize>,
    pub multi_head_enabled: bool,
    pub version: u64,
}

impl Topology {
    /// Cluster that only accepts writes through its head node.
    pub fn single(head_endpoint: impl Into<String>) -> Self {
        Self {
            head_endpoint: head_endpoint.into(),
            worker_endpoints: Vec::new(),
            routing_table: Vec::new(),
            multi_head_enabled: false,
            version: 0,
        }
    }

    /// Multi-head cluster whose buckets are spread round-robin over the workers.
    pub fn multi_head(
        head_endpoint: impl Into<String>,
        worker_endpoints: Vec<String>,
        bucket_count: usize,
        version: u64,
    ) -> Self {
        let workers = worker_endpoints.len().max(1);
        Self {
            head_endpoint: head_endpoint.into(),
            routing_table: (0..bucket_count).map(|b| b % workers).collect(),
            worker_endpoints,
            multi_head_enabled: true,
            version,
        }
    }

    /// Destinations and routing table to use for ingestion.
    ///
    /// Falls back to the head node only when multi-head is disabled by the server or
    /// by the caller; an enabled but incomplete topology is an error.
    pub fn resolve(&self, multi_head_requested: bool) -> Result<(Vec<Destination>, RoutingTable)> {
        if !self.multi_head_enabled || !multi_head_requested {
            if self.head_endpoint.trim().is_empty() {
                return Err(IngestError::TopologyUnavailable(
                    "head endpoint is empty".to_string(),
                ));
            }
            let head = Destination {
                index: 0,
                endpoint: self.head_endpoint.clone(),
            };
            return Ok((vec![head], RoutingTable::single()));
        }

        if self.worker_endpoints.is_empty() {
            return Err(IngestError::TopologyUnavailable(
                "multi-head is enabled but no worker endpoints were reported".to_string(),
            ));
        }
        let table = RoutingTable::new(
            self.routing_table.clone(),
            self.worker_endpoints.len(),
            self.version,
        )?;
        let destinations = self
            .worker_endpoints
            .iter()
            .enumerate()
            .map(|(index, endpoint)| Destination {
                index,
                endpoint: endpoint.clone(),
            })
            .collect();
        Ok((destinations, table))
    }
}

/// Options forwarded with every batch write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertOptions {
    pub update_on_existing_pk: bool,
    pub ignore_existing_pk: bool,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

/// Server acknowledgement of one batch write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteResponse {
    pub count_inserted: u64,
    pub count_updated: u64,
}

#[async_trait]
pub trait SchemaIntrospector: Send + Sync {
    /// Fails with `TableNotFound` or `SchemaError`.
    async fn table_schema(&self, table_name: &str) -> Result<TableSchema>;
}

#[async_trait]
pub trait TopologyProvider: Send + Sync {
    async fn topology(&self) -> Result<Topology>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn write_batch(
        &self,
        destination: &Destination,
        table_name: &str,
        records: &[&[u8]],
        options: &InsertOptions,
    ) -> Result<WriteResponse>;
}

/// Collaborators an ingestor is built from, plus the codec and key hash strategy.
#[derive(Clone)]
pub struct ClusterHandle {
    schemas: Arc<dyn SchemaIntrospector>,
    topology: Arc<dyn TopologyProvider>,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn RecordCodec>,
    hasher: Arc<dyn KeyHasher>,
}

impl ClusterHandle {
    pub fn new(
        schemas: Arc<dyn SchemaIntrospector>,
        topology: Arc<dyn TopologyProvider>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            schemas,
            topology,
            transport,
            codec: Arc::new(MessagePackCodec::new()),
            hasher: Arc::new(Murmur3KeyHasher::default()),
        }
    }

    /// Uses one in-process cluster for all three collaborators.
    pub fn in_memory(cluster: Arc<InMemoryCluster>) -> Self {
        Self::new(cluster.clone(), cluster.clone(), cluster)
    }

    pub fn with_codec(mut self, codec: Arc<dyn RecordCodec>) -> Self {
        self.codec = codec;
        self
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn KeyHasher>) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn schemas(&self) -> &Arc<dyn SchemaIntrospector> {
        &self.schemas
    }

    pub fn topology(&self) -> &Arc<dyn TopologyProvider> {
        &self.topology
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn codec(&self) -> &Arc<dyn RecordCodec> {
        &self.codec
    }

    pub fn hasher(&self) -> &Arc<dyn KeyHasher> {
        &self.hasher
    }
}
