use super::config::IngestorConfig;
use super::counters::{CounterSnapshot, IngestCounters};
use super::ingestor::{new_queue, new_router};
use super::plan::{KeyPlan, PendingRecord};
use super::queue::{QueueInsert, WorkerQueue};
use crate::cluster::{ClusterHandle, Destination, InsertOptions, TopologyProvider, Transport};
use crate::core::{DestinationFailure, IngestError, Record, Result, TableSchema};
use crate::key::RecordKey;
use crate::routing::{Router, RoutingTable};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, interval_at};
use tracing::{debug, info, warn};

enum WorkerCommand {
    Insert {
        entry: PendingRecord,
        primary_key: Option<RecordKey>,
    },
    Flush(oneshot::Sender<WorkerReport>),
}

/// Failures a destination task accumulated since it last reported.
#[derive(Debug, Default)]
struct WorkerReport {
    failures: Vec<DestinationFailure>,
    records: Vec<Record>,
}

impl WorkerReport {
    fn absorb(&mut self, other: WorkerReport) {
        self.failures.extend(other.failures);
        self.records.extend(other.records);
    }

    fn into_result(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(IngestError::DestinationWriteFailed {
                failures: self.failures,
                records: self.records,
            })
        }
    }
}

/// State owned by one destination's task.
struct DestinationWorker {
    destination: Destination,
    table_name: String,
    queue: WorkerQueue<PendingRecord>,
    transport: Arc<dyn Transport>,
    options: InsertOptions,
    counters: Arc<IngestCounters>,
    report: WorkerReport,
}

impl DestinationWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<WorkerCommand>,
        flush_interval: Option<Duration>,
    ) -> WorkerReport {
        let mut ticker = flush_interval.map(|period| {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker
        });

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(WorkerCommand::Insert { entry, primary_key }) => {
                        self.insert(entry, primary_key).await;
                    }
                    Some(WorkerCommand::Flush(reply)) => {
                        self.write_pending().await;
                        let _ = reply.send(std::mem::take(&mut self.report));
                    }
                    None => break,
                },
                _ = next_tick(&mut ticker) => self.write_pending().await,
            }
        }

        self.write_pending().await;
        debug!(endpoint = %self.destination.endpoint, "destination task stopped");
        self.report
    }

    async fn insert(&mut self, entry: PendingRecord, primary_key: Option<RecordKey>) {
        if self.queue.insert(entry, primary_key) == QueueInsert::Rejected {
            self.counters.record_rejected();
            debug!(endpoint = %self.destination.endpoint, "duplicate primary key rejected");
        }
        if self.queue.is_full() {
            self.write_pending().await;
        }
    }

    async fn write_pending(&mut self) {
        if self.queue.is_empty() {
            return;
        }

        let batch_len = self.queue.len();
        let result = {
            let batch: Vec<&[u8]> = self
                .queue
                .pending()
                .iter()
                .map(|e| e.encoded.as_slice())
                .collect();
            debug!(
                table = %self.table_name,
                endpoint = %self.destination.endpoint,
                records = batch_len,
                "writing batch"
            );
            self.transport
                .write_batch(&self.destination, &self.table_name, &batch, &self.options)
                .await
        };

        match result {
            Ok(response) => {
                self.counters.record_write(&response);
                self.queue.flush();
            }
            Err(err) => {
                warn!(
                    table = %self.table_name,
                    endpoint = %self.destination.endpoint,
                    records = batch_len,
                    error = %err,
                    "batch write failed"
                );
                self.report.failures.push(DestinationFailure {
                    destination: self.destination.index,
                    endpoint: self.destination.endpoint.clone(),
                    reason: err.to_string(),
                });
                self.report
                    .records
                    .extend(self.queue.flush().into_iter().map(|entry| entry.record));
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Ingestion with one tokio task per destination.
///
/// The caller's task validates, keys and routes records, then hands them to the owning
/// destination task over a bounded channel; a full channel makes `insert` wait. Writes
/// to different destinations proceed concurrently.
///
/// Write failures are kept by the destination task and reported by the next
/// [`flush`](Self::flush) or [`shutdown`](Self::shutdown). Dropping the pipeline
/// without calling either aborts the tasks and loses buffered records.
pub struct IngestPipeline {
    plan: KeyPlan,
    router: Router,
    destinations: Vec<Destination>,
    senders: Vec<mpsc::Sender<WorkerCommand>>,
    workers: Vec<JoinHandle<WorkerReport>>,
    topology: Arc<dyn TopologyProvider>,
    counters: Arc<IngestCounters>,
    config: IngestorConfig,
}

impl IngestPipeline {
    /// Fetches schema and topology and spawns one task per destination.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn connect(
        cluster: &ClusterHandle,
        table_name: &str,
        config: IngestorConfig,
    ) -> Result<Self> {
        config.validate().map_err(IngestError::Config)?;
        let schema = cluster.schemas().table_schema(table_name).await?;
        let topology = cluster.topology().topology().await?;
        let (destinations, routing_table) = topology.resolve(config.multi_head)?;
        Self::spawn(
            cluster,
            Arc::new(schema),
            destinations,
            routing_table,
            config,
        )
    }

    /// Spawns the destination tasks for an already acquired schema and topology.
    pub fn spawn(
        cluster: &ClusterHandle,
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
        let counters = Arc::new(IngestCounters::new());
        let options = config.insert_options();

        let mut senders = Vec::with_capacity(destinations.len());
        let mut workers = Vec::with_capacity(destinations.len());
        for destination in &destinations {
            let (tx, rx) = mpsc::channel(config.channel_capacity);
            let worker = DestinationWorker {
                destination: destination.clone(),
                table_name: plan.schema().name.clone(),
                queue: new_queue(&plan, &config),
                transport: cluster.transport().clone(),
                options: options.clone(),
                counters: counters.clone(),
                report: WorkerReport::default(),
            };
            senders.push(tx);
            workers.push(tokio::spawn(worker.run(rx, config.flush_interval)));
        }

        info!(
            table = %plan.schema().name,
            destinations = destinations.len(),
            batch_size = config.batch_size,
            channel_capacity = config.channel_capacity,
            "ingest pipeline started"
        );

        Ok(Self {
            router: new_router(routing_table, &config),
            plan,
            destinations,
            senders,
            workers,
            topology: cluster.topology().clone(),
            counters,
            config,
        })
    }

    pub fn table_name(&self) -> &str {
        &self.plan.schema().name
    }

    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Routes a record to its destination task.
    ///
    /// Waits while that task's channel is full. Duplicate rejections happen inside
    /// the task and only show up in [`count_rejected`](Self::count_rejected).
    pub async fn insert(&self, record: Record) -> Result<()> {
        let prepared = self.plan.prepare(record, &self.router)?;
        let destination = prepared.destination;
        let sender = self
            .senders
            .get(destination)
            .ok_or(IngestError::WorkerStopped(destination))?;
        sender
            .send(WorkerCommand::Insert {
                entry: prepared.entry,
                primary_key: prepared.primary_key,
            })
            .await
            .map_err(|_| IngestError::WorkerStopped(destination))
    }

    /// Inserts records in order, stopping at the first error.
    pub async fn insert_many<I>(&self, records: I) -> Result<()>
    where
        I: IntoIterator<Item = Record>,
    {
        for record in records {
            self.insert(record).await?;
        }
        Ok(())
    }

    /// Asks every destination task to write its batch and waits for all of them.
    ///
    /// The error carries every failure recorded since the previous report, including
    /// failures of writes triggered by full batches or the flush timer.
    pub async fn flush(&self) -> Result<()> {
        let mut replies = Vec::with_capacity(self.senders.len());
        for (destination, sender) in self.senders.iter().enumerate() {
            let (tx, rx) = oneshot::channel();
            sender
                .send(WorkerCommand::Flush(tx))
                .await
                .map_err(|_| IngestError::WorkerStopped(destination))?;
            replies.push(rx);
        }

        let mut report = WorkerReport::default();
        for (destination, reply) in join_all(replies).await.into_iter().enumerate() {
            report.absorb(reply.map_err(|_| IngestError::WorkerStopped(destination))?);
        }
        report.into_result()
    }

    /// Closes the channels, lets every task write what it holds and waits for them.
    ///
    /// Returns the final counters.
    pub async fn shutdown(mut self) -> Result<CounterSnapshot> {
        self.senders.clear();
        let workers = std::mem::take(&mut self.workers);

        let mut report = WorkerReport::default();
        let mut stopped = None;
        for (destination, joined) in join_all(workers).await.into_iter().enumerate() {
            match joined {
                Ok(worker_report) => report.absorb(worker_report),
                Err(err) => {
                    warn!(destination, error = %err, "destination task did not finish");
                    stopped.get_or_insert(destination);
                }
            }
        }

        info!(
            table = %self.table_name(),
            inserted = self.counters.inserted(),
            updated = self.counters.updated(),
            rejected = self.counters.rejected(),
            "ingest pipeline stopped"
        );

        report.into_result()?;
        match stopped {
            Some(destination) => Err(IngestError::WorkerStopped(destination)),
            None => Ok(self.counters.snapshot()),
        }
    }

    /// Re-reads the topology and swaps in its routing table.
    ///
    /// Destination tasks are fixed for the pipeline's lifetime, so a changed worker
    /// set fails with `TopologyChanged` and the pipeline must be rebuilt.
    pub async fn refresh_topology(&self) -> Result<bool> {
        let topology = self.topology.topology().await?;
        let (destinations, routing_table) = topology.resolve(self.config.multi_head)?;

        if destinations != self.destinations {
            return Err(IngestError::TopologyChanged {
                previous: self.destinations.len(),
                current: destinations.len(),
            });
        }
        if *self.router.table()? == routing_table {
            return Ok(false);
        }

        self.router.replace_table(routing_table)?;
        info!(table = %self.table_name(), version = topology.version, "routing table refreshed");
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

impl Drop for IngestPipeline {
    fn drop(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        warn!(
            table = %self.table_name(),
            "ingest pipeline dropped without shutdown; buffered records are discarded"
        );
        for worker in &self.workers {
            worker.abort();
        }
    }
}
