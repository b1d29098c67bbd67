use super::config::IngestorConfig;
use super::counters::{CounterSnapshot, IngestCounters};
use super::plan::{KeyPlan, PendingRecord};
use super::queue::{QueueInsert, WorkerQueue};
use crate::cluster::{ClusterHandle, Destination, InsertOptions};
use crate::core::{DestinationFailure, IngestError, Record, Result, TableSchema};
use crate::routing::{Router, RoutingTable};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What happened to a record offered to [`Ingestor::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Added to its destination's batch.
    Queued,
    /// Overwrote a buffered record with the same primary key.
    Replaced,
    /// Dropped because its primary key is already buffered and upserts are off.
    Rejected,
}

/// Records that were in flight when one destination's write failed.
pub(crate) struct FailedWrite {
    pub failure: DestinationFailure,
    pub records: Vec<Record>,
}

impl FailedWrite {
    pub fn into_error(self) -> IngestError {
        IngestError::DestinationWriteFailed {
            failures: vec![self.failure],
            records: self.records,
        }
    }
}

pub(crate) fn new_queue(plan: &KeyPlan, config: &IngestorConfig) -> WorkerQueue<PendingRecord> {
    WorkerQueue::new(
        config.batch_size,
        plan.has_primary_key(),
        config.update_on_existing_pk,
    )
}

pub(crate) fn new_router(table: RoutingTable, config: &IngestorConfig) -> Router {
    match config.routing_seed {
        Some(seed) => Router::with_seed(table, seed),
        None => Router::new(table),
    }
}

/// Multi-head ingestor for one table.
///
/// Records are keyed, routed to the worker that owns their shard and buffered per
/// worker. A worker's batch is written as soon as it reaches `batch_size`; call
/// [`flush`](Self::flush) before dropping the ingestor or buffered records are lost.
///
/// Writes happen one destination at a time on the caller's task. See
/// [`IngestPipeline`](super::IngestPipeline) for a task-per-destination variant.
pub struct Ingestor {
    cluster: ClusterHandle,
    config: IngestorConfig,
    options: InsertOptions,
    plan: KeyPlan,
    router: Router,
    destinations: Vec<Destination>,
    queues: Vec<WorkerQueue<PendingRecord>>,
    counters: IngestCounters,
}

impl Ingestor {
    /// Fetches the table schema and worker topology, then builds the ingestor.
    pub async fn connect(
        cluster: &ClusterHandle,
        table_name: &str,
        config: IngestorConfig,
    ) -> Result<Self> {
        config.validate().map_err(IngestError::Config)?;
        let schema = cluster.schemas().table_schema(table_name).await?;
        let topology = cluster.topology().topology().await?;
        let (destinations, routing_table) = topology.resolve(config.multi_head)?;
        Self::from_parts(
            cluster.clone(),
            Arc::new(schema),
            destinations,
            routing_table,
            config,
        )
    }

    /// Builds an ingestor from an already acquired schema and topology.
    pub fn from_parts(
        cluster: ClusterHandle,
        schema: Arc<TableSchema>,
        destinations: Vec<Destination>,
        routing_table: RoutingTable,
        config: IngestorConfig,
    ) -> Result<Self> {
        config.validate().map_err(IngestError::Config)?;
        if destinations.len() != routing_table.destination_count() {
            return Err(IngestError::TopologyUnavailable(format!(
                "{} destinations but the routing table addresses {}",
                destinations.len(),
                routing_table.destination_count()
            )));
        }

        let plan = KeyPlan::new(schema, cluster.codec().clone(), cluster.hasher().clone())?;
        let queues = destinations.iter().map(|_| new_queue(&plan, &config)).collect();
        let router = new_router(routing_table, &config);

        info!(
            table = %plan.schema().name,
            destinations = destinations.len(),
            batch_size = config.batch_size,
            primary_key = plan.has_primary_key(),
            distinct_shard_key = plan.has_distinct_shard_key(),
            "ingestor ready"
        );

        Ok(Self {
            options: config.insert_options(),
            cluster,
            config,
            plan,
            router,
            destinations,
            queues,
            counters: IngestCounters::new(),
        })
    }

    pub fn table_name(&self) -> &str {
        &self.plan.schema().name
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        self.plan.schema()
    }

    pub fn config(&self) -> &IngestorConfig {
        &self.config
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Queues one record, writing its destination's batch if that fills it.
    ///
    /// Schema and encoding errors leave every queue untouched. A failed write returns
    /// `DestinationWriteFailed` carrying the records that were in that batch.
    pub async fn insert(&mut self, record: Record) -> Result<InsertOutcome> {
        let prepared = self.plan.prepare(record, &self.router)?;
        let destination = prepared.destination;

        let outcome = match self.queues[destination].insert(prepared.entry, prepared.primary_key) {
            QueueInsert::Appended => InsertOutcome::Queued,
            QueueInsert::Replaced => InsertOutcome::Replaced,
            QueueInsert::Rejected => {
                self.counters.record_rejected();
                debug!(table = %self.table_name(), destination, "duplicate primary key rejected");
                if self.config.error_on_duplicate_pk {
                    return Err(IngestError::DuplicateKeyRejected(self.table_name().to_string()));
                }
                return Ok(InsertOutcome::Rejected);
            }
        };

        if self.queues[destination].is_full() {
            self.write_destination(destination)
                .await
                .map_err(FailedWrite::into_error)?;
        }
        Ok(outcome)
    }

    /// Inserts records in order.
    ///
    /// If a destination write fails, the error carries that destination's batch
    /// followed by every input record not yet processed. Records already written,
    /// and records still buffered for other destinations, are not included.
    ///
    /// Any other error (schema, encoding, duplicate rejection) stops at the offending
    /// record and drops the rest of the iterator. Records before it stay buffered, so
    /// `pending_count()` grows by the number accepted; pass a borrowed iterator
    /// (`iter.by_ref()`) to keep the unprocessed tail.
    pub async fn insert_many<I>(&mut self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = Record>,
    {
        let mut remaining = records.into_iter();
        while let Some(record) = remaining.next() {
            match self.insert(record).await {
                Ok(_) => {}
                Err(IngestError::DestinationWriteFailed {
                    failures,
                    records: mut carried,
                }) => {
                    carried.extend(remaining.by_ref());
                    return Err(IngestError::DestinationWriteFailed {
                        failures,
                        records: carried,
                    });
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    /// Writes every non-empty batch.
    ///
    /// All destinations are attempted; the error carries the union of the failed
    /// destinations' batches.
    pub async fn flush(&mut self) -> Result<()> {
        let mut failures = Vec::new();
        let mut carried = Vec::new();
        for destination in 0..self.queues.len() {
            if let Err(failed) = self.write_destination(destination).await {
                failures.push(failed.failure);
                carried.extend(failed.records);
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(IngestError::DestinationWriteFailed {
                failures,
                records: carried,
            })
        }
    }

    /// Writes one destination's batch and clears it once the write is confirmed.
    ///
    /// The queue is only cleared after the transport returns, so dropping this
    /// future mid-write leaves the batch intact.
    async fn write_destination(&mut self, destination: usize) -> std::result::Result<(), FailedWrite> {
        let queue = &self.queues[destination];
        if queue.is_empty() {
            return Ok(());
        }

        let target = &self.destinations[destination];
        let batch_len = queue.len();
        let result = {
            let batch: Vec<&[u8]> = queue.pending().iter().map(|e| e.encoded.as_slice()).collect();
            debug!(
                table = %self.plan.schema().name,
                endpoint = %target.endpoint,
                records = batch_len,
                "writing batch"
            );
            self.cluster
                .transport()
                .write_batch(target, &self.plan.schema().name, &batch, &self.options)
                .await
        };

        match result {
            Ok(response) => {
                self.counters.record_write(&response);
                self.queues[destination].flush();
                Ok(())
            }
            Err(err) => {
                let endpoint = self.destinations[destination].endpoint.clone();
                warn!(
                    table = %self.plan.schema().name,
                    endpoint = %endpoint,
                    records = batch_len,
                    error = %err,
                    "batch write failed"
                );
                let records = self.queues[destination]
                    .flush()
                    .into_iter()
                    .map(|entry| entry.record)
                    .collect();
                Err(FailedWrite {
                    failure: DestinationFailure {
                        destination,
                        endpoint,
                        reason: err.to_string(),
                    },
                    records,
                })
            }
        }
    }

    /// Re-reads the topology and applies it.
    ///
    /// A new routing table for the same workers is swapped in atomically. If the worker
    /// set changed, pending batches are flushed to the old workers first and the queues
    /// are rebuilt. Returns whether anything changed.
    pub async fn refresh_topology(&mut self) -> Result<bool> {
        let topology = self.cluster.topology().topology().await?;
        let (destinations, routing_table) = topology.resolve(self.config.multi_head)?;

        if destinations == self.destinations {
            if *self.router.table()? == routing_table {
                return Ok(false);
            }
            self.router.replace_table(routing_table)?;
            info!(table = %self.table_name(), version = topology.version, "routing table refreshed");
            return Ok(true);
        }

        self.flush().await?;
        self.queues = destinations
            .iter()
            .map(|_| new_queue(&self.plan, &self.config))
            .collect();
        info!(
            table = %self.table_name(),
            previous = self.destinations.len(),
            current = destinations.len(),
            version = topology.version,
            "worker set changed"
        );
        self.destinations = destinations;
        self.router.replace_table(routing_table)?;
        Ok(true)
    }

    /// Destination a record would be routed to, or `None` for keyless records
    /// spread at random over several destinations.
    pub fn destination_for(&self, record: &Record) -> Result<Option<usize>> {
        match self.plan.routing_key(record)? {
            Some(key) => Ok(Some(self.router.route(Some(&key))?)),
            None if self.destinations.len() == 1 => Ok(Some(0)),
            None => Ok(None),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.queues.iter().map(WorkerQueue::len).sum()
    }

    pub fn pending_for(&self, destination: usize) -> usize {
        self.queues.get(destination).map(WorkerQueue::len).unwrap_or(0)
    }

    /// Buffered records, grouped by destination in batch order.
    pub fn pending_records(&self) -> Vec<&Record> {
        self.queues
            .iter()
            .flat_map(|queue| queue.pending().iter().map(|entry| &entry.record))
            .collect()
    }

    pub fn count_inserted(&self) -> u64 {
        self.counters.inserted()
    }

    pub fn count_updated(&self) -> u64 {
        self.counters.updated()
    }

    pub fn count_rejected(&self) -> u64 {
        self.counters.rejected()
    }

    pub fn counters(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }
}

impl Drop for Ingestor {
    fn drop(&mut self) {
        let pending = self.pending_count();
        if pending > 0 {
            warn!(
                table = %self.table_name(),
                pending,
                "ingestor dropped with unflushed records"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{InMemoryCluster, Topology};
    use crate::core::{ColumnSpec, ColumnType, Value};

    fn events_cluster() -> Arc<InMemoryCluster> {
        Arc::new(
            InMemoryCluster::new(Topology::single("head")).with_table(TableSchema::new(
                "events",
                vec![
                    ColumnSpec::new("id", ColumnType::Long).primary_key(),
                    ColumnSpec::new("v", ColumnType::String),
                ],
            )),
        )
    }

    #[tokio::test]
    async fn test_connect_unknown_table_fails() {
        let handle = ClusterHandle::in_memory(events_cluster());
        let err = Ingestor::connect(&handle, "missing", IngestorConfig::default())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IngestError::TableNotFound(_)));
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let handle = ClusterHandle::in_memory(events_cluster());
        let err = Ingestor::connect(&handle, "events", IngestorConfig::new().batch_size(0))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, IngestError::Config(_)));
    }

    #[tokio::test]
    async fn test_schema_error_leaves_queues_untouched() {
        let handle = ClusterHandle::in_memory(events_cluster());
        let mut ingestor = Ingestor::connect(&handle, "events", IngestorConfig::new().batch_size(4))
            .await
            .unwrap();

        ingestor
            .insert(Record::new().with("id", 1).with("v", "a"))
            .await
            .unwrap();
        let err = ingestor
            .insert(Record::new().with("id", Value::Null).with("v", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidValue { .. }));
        assert_eq!(ingestor.pending_count(), 1);
        ingestor.flush().await.unwrap();
    }

    #[tokio::test]
    async fn test_duplicate_can_be_reported_as_error() {
        let handle = ClusterHandle::in_memory(events_cluster());
        let config = IngestorConfig::new().batch_size(4).error_on_duplicate_pk(true);
        let mut ingestor = Ingestor::connect(&handle, "events", config).await.unwrap();

        ingestor
            .insert(Record::new().with("id", 1).with("v", "a"))
            .await
            .unwrap();
        let err = ingestor
            .insert(Record::new().with("id", 1).with("v", "b"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::DuplicateKeyRejected(_)));
        assert_eq!(ingestor.count_rejected(), 1);
        ingestor.flush().await.unwrap();
    }

    #[test]
    fn test_from_parts_checks_destination_count() {
        let cluster = events_cluster();
        let schema = Arc::new(TableSchema::new(
            "events",
            vec![ColumnSpec::new("id", ColumnType::Long)],
        ));
        let destinations = vec![Destination {
            index: 0,
            endpoint: "w0".to_string(),
        }];
        let table = RoutingTable::uniform(4, 2, 1).unwrap();
        let result = Ingestor::from_parts(
            ClusterHandle::in_memory(cluster),
            schema,
            destinations,
            table,
            IngestorConfig::default(),
        );
        assert!(matches!(result, Err(IngestError::TopologyUnavailable(_))));
    }
}
