use super::{
    Destination, InsertOptions, SchemaIntrospector, Topology, TopologyProvider, Transport,
    WriteResponse,
};
use crate::core::{IngestError, Result, TableSchema};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{Mutex, RwLock};

/// A batch as received by one in-memory endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedBatch {
    pub table_name: String,
    pub records: Vec<Vec<u8>>,
    pub options: InsertOptions,
}

#[derive(Debug, Default)]
struct EndpointState {
    batches: Vec<ReceivedBatch>,
    failure: Option<String>,
    attempts: usize,
}

/// An in-process cluster implementing schema lookup, topology and transport.
///
/// Every endpoint accepts writes until a failure is injected with
/// [`fail_endpoint`](Self::fail_endpoint).
#[derive(Debug)]
pub struct InMemoryCluster {
    schemas: RwLock<HashMap<String, TableSchema>>,
    topology: RwLock<Topology>,
    endpoints: Mutex<HashMap<String, EndpointState>>,
}

impl InMemoryCluster {
    pub fn new(topology: Topology) -> Self {
        Self {
            schemas: RwLock::new(HashMap::new()),
            topology: RwLock::new(topology),
            endpoints: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a table before the cluster is shared.
    pub fn with_table(mut self, schema: TableSchema) -> Self {
        self.schemas.get_mut().insert(schema.name.clone(), schema);
        self
    }

    pub async fn register_table(&self, schema: TableSchema) {
        let mut schemas = self.schemas.write().await;
        schemas.insert(schema.name.clone(), schema);
    }

    /// Replaces the reported topology, e.g. to simulate a failover.
    pub async fn set_topology(&self, topology: Topology) {
        *self.topology.write().await = topology;
    }

    /// Makes every subsequent write to `endpoint` fail with `reason`.
    pub async fn fail_endpoint(&self, endpoint: &str, reason: impl Into<String>) {
        let mut endpoints = self.endpoints.lock().await;
        endpoints.entry(endpoint.to_string()).or_default().failure = Some(reason.into());
    }

    pub async fn heal_endpoint(&self, endpoint: &str) {
        let mut endpoints = self.endpoints.lock().await;
        if let Some(state) = endpoints.get_mut(endpoint) {
            state.failure = None;
        }
    }

    pub async fn batches_for(&self, endpoint: &str) -> Vec<ReceivedBatch> {
        let endpoints = self.endpoints.lock().await;
        endpoints
            .get(endpoint)
            .map(|state| state.batches.clone())
            .unwrap_or_default()
    }

    /// Number of records successfully written to `endpoint`.
    pub async fn record_count(&self, endpoint: &str) -> usize {
        let endpoints = self.endpoints.lock().await;
        endpoints
            .get(endpoint)
            .map(|state| state.batches.iter().map(|b| b.records.len()).sum())
            .unwrap_or(0)
    }

    /// Number of write attempts, successful or not, against `endpoint`.
    pub async fn attempts_for(&self, endpoint: &str) -> usize {
        let endpoints = self.endpoints.lock().await;
        endpoints.get(endpoint).map(|state| state.attempts).unwrap_or(0)
    }

    pub async fn total_records(&self) -> usize {
        let endpoints = self.endpoints.lock().await;
        endpoints
            .values()
            .flat_map(|state| &state.batches)
            .map(|batch| batch.records.len())
            .sum()
    }
}

#[async_trait]
impl SchemaIntrospector for InMemoryCluster {
    async fn table_schema(&self, table_name: &str) -> Result<TableSchema> {
        let schemas = self.schemas.read().await;
        schemas
            .get(table_name)
            .cloned()
            .ok_or_else(|| IngestError::TableNotFound(table_name.to_string()))
    }
}

#[async_trait]
impl TopologyProvider for InMemoryCluster {
    async fn topology(&self) -> Result<Topology> {
        Ok(self.topology.read().await.clone())
    }
}

#[async_trait]
impl Transport for InMemoryCluster {
    async fn write_batch(
        &self,
        destination: &Destination,
        table_name: &str,
        records: &[&[u8]],
        options: &InsertOptions,
    ) -> Result<WriteResponse> {
        if !self.schemas.read().await.contains_key(table_name) {
            return Err(IngestError::TableNotFound(table_name.to_string()));
        }

        let mut endpoints = self.endpoints.lock().await;
        let state = endpoints.entry(destination.endpoint.clone()).or_default();
        state.attempts += 1;
        if let Some(reason) = &state.failure {
            return Err(IngestError::Transport(format!(
                "{}: {}",
                destination.endpoint, reason
            )));
        }

        state.batches.push(ReceivedBatch {
            table_name: table_name.to_string(),
            records: records.iter().map(|r| r.to_vec()).collect(),
            options: options.clone(),
        });
        Ok(WriteResponse {
            count_inserted: records.len() as u64,
            count_updated: 0,
        })
    }
}
