use crate::codec::RecordCodec;
use crate::core::{Record, Result, TableSchema};
use crate::key::{KeyBuilder, KeyHasher, KeyKind, RecordKey};
use crate::routing::Router;
use std::sync::Arc;

/// A buffered record together with its wire encoding.
#[derive(Debug, Clone)]
pub(crate) struct PendingRecord {
    pub record: Record,
    pub encoded: Vec<u8>,
}

/// A record that has been keyed, encoded and routed but not yet queued.
#[derive(Debug)]
pub(crate) struct PreparedRecord {
    pub destination: usize,
    pub primary_key: Option<RecordKey>,
    pub entry: PendingRecord,
}

/// Per-table key extraction shared by the ingestor and the pipeline.
///
/// When the shard key covers the same columns as the primary key only the
/// primary key is built and it is used for both routing and deduplication.
#[derive(Debug, Clone)]
pub(crate) struct KeyPlan {
    schema: Arc<TableSchema>,
    primary: Option<KeyBuilder>,
    shard: Option<KeyBuilder>,
    codec: Arc<dyn RecordCodec>,
}

impl KeyPlan {
    pub fn new(
        schema: Arc<TableSchema>,
        codec: Arc<dyn RecordCodec>,
        hasher: Arc<dyn KeyHasher>,
    ) -> Result<Self> {
        let primary = KeyBuilder::new(schema.clone(), KeyKind::Primary, hasher.clone())?;
        let shard = KeyBuilder::new(schema.clone(), KeyKind::Shard, hasher)?;

        let primary = primary.has_key().then_some(primary);
        let shard = match (&primary, shard.has_key()) {
            (_, false) => None,
            (Some(pk), true) if pk.descriptor().same_columns(shard.descriptor()) => None,
            (_, true) => Some(shard),
        };

        Ok(Self {
            schema,
            primary,
            shard,
            codec,
        })
    }

    pub fn schema(&self) -> &Arc<TableSchema> {
        &self.schema
    }

    pub fn has_primary_key(&self) -> bool {
        self.primary.is_some()
    }

    pub fn has_distinct_shard_key(&self) -> bool {
        self.shard.is_some()
    }

    /// Primary key and routing key of a validated record.
    fn keys(&self, record: &Record) -> Result<(Option<RecordKey>, Option<RecordKey>)> {
        let primary_key = match &self.primary {
            Some(builder) => builder.build_validated(record)?,
            None => None,
        };
        let routing_key = match &self.shard {
            Some(builder) => builder.build_validated(record)?,
            None => primary_key.clone(),
        };
        Ok((primary_key, routing_key))
    }

    /// Key used for routing `record`, if the table has one.
    pub fn routing_key(&self, record: &Record) -> Result<Option<RecordKey>> {
        self.schema.validate_record(record)?;
        Ok(self.keys(record)?.1)
    }

    /// Validates, keys, encodes and routes a record without touching any queue.
    pub fn prepare(&self, record: Record, router: &Router) -> Result<PreparedRecord> {
        self.schema.validate_record(&record)?;
        let (primary_key, routing_key) = self.keys(&record)?;
        let encoded = self.codec.encode(&self.schema, &record)?;
        let destination = router.route(routing_key.as_ref())?;
        Ok(PreparedRecord {
            destination,
            primary_key,
            entry: PendingRecord { record, encoded },
        })
    }
}
