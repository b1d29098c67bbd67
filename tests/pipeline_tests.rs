use shardline::{
    ClusterHandle, ColumnSpec, ColumnType, InMemoryCluster, IngestError, IngestPipeline,
    IngestorConfig, Record, TableSchema, Topology,
};
use std::sync::Arc;

fn cluster(worker_count: usize) -> Arc<InMemoryCluster> {
    let endpoints = (0..worker_count).map(|i| format!("w{i}")).collect();
    Arc::new(
        InMemoryCluster::new(Topology::multi_head("head", endpoints, 32, 1)).with_table(
            TableSchema::new(
                "metrics",
                vec![
                    ColumnSpec::new("host", ColumnType::Char16).primary_key().shard_key(),
                    ColumnSpec::new("ts", ColumnType::Timestamp).primary_key(),
                    ColumnSpec::new("value", ColumnType::Double),
                ],
            ),
        ),
    )
}

fn sample(host: usize, ts: i64) -> Record {
    Record::new()
        .with("host", format!("host-{host}"))
        .with("ts", ts)
        .with("value", 0.5)
}

#[tokio::test]
async fn test_flush_writes_every_destination() {
    let cluster = cluster(3);
    let handle = ClusterHandle::in_memory(cluster.clone());
    let pipeline = IngestPipeline::connect(&handle, "metrics", IngestorConfig::new().batch_size(1_000))
        .await
        .unwrap();

    let records: Vec<Record> = (0..12)
        .flat_map(|host| (0..5).map(move |ts| sample(host, ts)))
        .collect();
    pipeline.insert_many(records).await.unwrap();
    pipeline.flush().await.unwrap();

    assert_eq!(cluster.total_records().await, 60);
    assert_eq!(pipeline.count_inserted(), 60);

    // every sample of a host shares its shard key
    for host in 0..12 {
        let destinations: Vec<_> = (0..5)
            .map(|ts| pipeline.destination_for(&sample(host, ts)).unwrap())
            .collect();
        assert!(destinations.iter().all(|d| *d == destinations[0]));
    }
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_background_failures_are_reported_on_flush() {
    let cluster = cluster(1);
    let handle = ClusterHandle::in_memory(cluster.clone());
    cluster.fail_endpoint("w0", "disk full").await;
    let pipeline = IngestPipeline::connect(&handle, "metrics", IngestorConfig::new().batch_size(2))
        .await
        .unwrap();

    let records: Vec<Record> = (0..4).map(|ts| sample(0, ts)).collect();
    pipeline.insert_many(records.clone()).await.unwrap();

    let err = pipeline.flush().await.unwrap_err();
    assert!(matches!(err, IngestError::DestinationWriteFailed { .. }));
    assert_eq!(err.failures().len(), 2);
    assert_eq!(err.carried_records(), records.as_slice());

    cluster.heal_endpoint("w0").await;
    pipeline.flush().await.unwrap();
    pipeline.insert_many(err.into_carried_records()).await.unwrap();
    let counters = pipeline.shutdown().await.unwrap();
    assert_eq!(counters.inserted, 4);
    assert_eq!(cluster.record_count("w0").await, 4);
}

#[tokio::test]
async fn test_duplicates_are_counted_by_the_owning_task() {
    let cluster = cluster(2);
    let handle = ClusterHandle::in_memory(cluster.clone());
    let pipeline = IngestPipeline::connect(&handle, "metrics", IngestorConfig::new().batch_size(100))
        .await
        .unwrap();

    pipeline.insert(sample(1, 1)).await.unwrap();
    pipeline.insert(sample(1, 1)).await.unwrap();
    pipeline.flush().await.unwrap();

    assert_eq!(pipeline.count_rejected(), 1);
    assert_eq!(cluster.total_records().await, 1);
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_small_channels_apply_backpressure_without_loss() {
    let cluster = cluster(2);
    let handle = ClusterHandle::in_memory(cluster.clone());
    let config = IngestorConfig::new().batch_size(3).channel_capacity(1);
    let pipeline = IngestPipeline::connect(&handle, "metrics", config).await.unwrap();

    pipeline
        .insert_many((0..50).map(|ts| sample(ts as usize % 7, ts)))
        .await
        .unwrap();
    let counters = pipeline.shutdown().await.unwrap();

    assert_eq!(counters.inserted, 50);
    assert_eq!(cluster.total_records().await, 50);
}

#[tokio::test]
async fn test_refresh_topology() {
    let cluster = cluster(2);
    let handle = ClusterHandle::in_memory(cluster.clone());
    let pipeline = IngestPipeline::connect(&handle, "metrics", IngestorConfig::default())
        .await
        .unwrap();

    let endpoints: Vec<String> = vec!["w0".into(), "w1".into()];
    let mut same_workers = Topology::multi_head("head", endpoints, 32, 2);
    same_workers.routing_table = vec![0; 32];
    cluster.set_topology(same_workers).await;
    assert!(pipeline.refresh_topology().await.unwrap());
    assert_eq!(pipeline.destination_for(&sample(3, 0)).unwrap(), Some(0));

    let grown = (0..3).map(|i| format!("w{i}")).collect();
    cluster
        .set_topology(Topology::multi_head("head", grown, 32, 3))
        .await;
    let err = pipeline.refresh_topology().await.unwrap_err();
    assert!(matches!(
        err,
        IngestError::TopologyChanged {
            previous: 2,
            current: 3
        }
    ));
    pipeline.shutdown().await.unwrap();
}
