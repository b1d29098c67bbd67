use anyhow::{Context, Result, anyhow, bail};
use clap::{Parser, Subcommand};
use shardline::{
    ClusterHandle, CounterSnapshot, InMemoryCluster, IngestPipeline, Ingestor, IngestorConfig,
    KeyBuilder, KeyKind, Murmur3KeyHasher, Record, TableSchema, Topology,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "shardline")]
#[command(about = "Replay records against a simulated multi-head cluster")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Ingest a JSONL file into an in-memory cluster and report where records landed
    Simulate {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        records: PathBuf,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 64)]
        buckets: usize,
        /// JSON ingestor configuration
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
        /// Use one task per worker instead of the sequential ingestor
        #[arg(long)]
        pipeline: bool,
    },
    /// Print the routing hash and destination of every record
    Route {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        records: PathBuf,
        #[arg(long, default_value_t = 4)]
        workers: usize,
        #[arg(long, default_value_t = 64)]
        buckets: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Simulate {
            schema,
            records,
            workers,
            buckets,
            config,
            batch_size,
            seed,
            pipeline,
        } => {
            let schema = load_schema(&schema)?;
            let records = load_records(&records)?;
            let mut config = match config {
                Some(path) => {
                    let raw = fs::read_to_string(&path)
                        .with_context(|| format!("failed to read {}", path.display()))?;
                    IngestorConfig::from_json(&raw).map_err(|e| anyhow!("invalid config: {e}"))?
                }
                None => IngestorConfig::default(),
            };
            if let Some(batch_size) = batch_size {
                config.batch_size = batch_size;
            }
            if let Some(seed) = seed {
                config.routing_seed = Some(seed);
            }
            simulate(schema, records, workers, buckets, config, pipeline).await
        }
        Command::Route {
            schema,
            records,
            workers,
            buckets,
        } => {
            let schema = load_schema(&schema)?;
            let records = load_records(&records)?;
            route(schema, &records, workers, buckets)
        }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shardline=info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_schema(path: &Path) -> Result<TableSchema> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read schema {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("invalid schema in {}", path.display()))
}

fn load_records(path: &Path) -> Result<Vec<Record>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read records {}", path.display()))?;
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(number, line)| {
            let json: serde_json::Value = serde_json::from_str(line)
                .with_context(|| format!("line {}: invalid JSON", number + 1))?;
            Record::from_json(&json).with_context(|| format!("line {}", number + 1))
        })
        .collect()
}

fn worker_topology(workers: usize, buckets: usize) -> Result<Topology> {
    if workers == 0 || buckets == 0 {
        bail!("--workers and --buckets must be at least 1");
    }
    let endpoints = (0..workers).map(|i| format!("worker-{i}")).collect();
    Ok(Topology::multi_head("head", endpoints, buckets, 1))
}

async fn simulate(
    schema: TableSchema,
    records: Vec<Record>,
    workers: usize,
    buckets: usize,
    config: IngestorConfig,
    pipeline: bool,
) -> Result<()> {
    let topology = worker_topology(workers, buckets)?;
    let table_name = schema.name.clone();
    let cluster = Arc::new(InMemoryCluster::new(topology.clone()).with_table(schema));
    let handle = ClusterHandle::in_memory(cluster.clone());
    let total = records.len();

    info!(table = %table_name, records = total, workers, pipeline, "starting simulation");

    let counters: CounterSnapshot = if pipeline {
        let pipeline = IngestPipeline::connect(&handle, &table_name, config).await?;
        pipeline.insert_many(records).await?;
        pipeline.shutdown().await?
    } else {
        let mut ingestor = Ingestor::connect(&handle, &table_name, config).await?;
        ingestor.insert_many(records).await?;
        ingestor.flush().await?;
        ingestor.counters()
    };

    println!("{:<16} {:>10}", "worker", "records");
    for endpoint in &topology.worker_endpoints {
        println!("{:<16} {:>10}", endpoint, cluster.record_count(endpoint).await);
    }
    println!();
    println!("offered   {total}");
    println!("inserted  {}", counters.inserted);
    println!("updated   {}", counters.updated);
    println!("rejected  {}", counters.rejected);
    Ok(())
}

fn route(schema: TableSchema, records: &[Record], workers: usize, buckets: usize) -> Result<()> {
    let topology = worker_topology(workers, buckets)?;
    let (destinations, table) = topology.resolve(true)?;
    let schema = Arc::new(schema);
    let hasher = Arc::new(Murmur3KeyHasher::default());

    let mut builder = KeyBuilder::new(schema.clone(), KeyKind::Shard, hasher.clone())?;
    if !builder.has_key() {
        builder = KeyBuilder::new(schema, KeyKind::Primary, hasher)?;
    }

    for (number, record) in records.iter().enumerate() {
        match builder.build(record)? {
            Some(key) => {
                let destination = table.destination_for(key.routing_hash());
                println!(
                    "{}\t{}\t{}\t{}",
                    number + 1,
                    key.routing_hash(),
                    table.bucket_for(key.routing_hash()),
                    destinations[destination].endpoint
                );
            }
            None => println!("{}\t-\t-\t(random)", number + 1),
        }
    }
    Ok(())
}
