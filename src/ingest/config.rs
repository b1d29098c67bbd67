use crate::cluster::InsertOptions;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Ingestion configuration
///
/// Shared by [`Ingestor`](super::Ingestor) and [`IngestPipeline`](super::IngestPipeline).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestorConfig {
    /// Records buffered per destination before a write is issued
    pub batch_size: usize,

    /// Overwrite rows whose primary key already exists (locally and on the server)
    pub update_on_existing_pk: bool,

    /// Ask the server to silently skip rows whose primary key already exists
    pub ignore_existing_pk: bool,

    /// Report locally rejected duplicates as errors instead of an outcome
    pub error_on_duplicate_pk: bool,

    /// Write directly to workers when the server supports it
    pub multi_head: bool,

    /// Bounded channel size per destination worker task
    pub channel_capacity: usize,

    /// Flush partially filled batches on this interval (pipeline only)
    pub flush_interval: Option<Duration>,

    /// Seed for keyless record placement
    pub routing_seed: Option<u64>,

    /// Extra options forwarded to the server with every write
    pub options: BTreeMap<String, String>,
}

impl IngestorConfig {
    pub fn new() -> Self {
        Self {
            batch_size: 10_000,
            update_on_existing_pk: false,
            ignore_existing_pk: false,
            error_on_duplicate_pk: false,
            multi_head: true,
            channel_capacity: 1024,
            flush_interval: None,
            routing_seed: None,
            options: BTreeMap::new(),
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn update_on_existing_pk(mut self, enabled: bool) -> Self {
        self.update_on_existing_pk = enabled;
        self
    }

    pub fn ignore_existing_pk(mut self, enabled: bool) -> Self {
        self.ignore_existing_pk = enabled;
        self
    }

    pub fn error_on_duplicate_pk(mut self, enabled: bool) -> Self {
        self.error_on_duplicate_pk = enabled;
        self
    }

    pub fn multi_head(mut self, enabled: bool) -> Self {
        self.multi_head = enabled;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = Some(interval);
        self
    }

    pub fn routing_seed(mut self, seed: u64) -> Self {
        self.routing_seed = Some(seed);
        self
    }

    pub fn option(mut self, key: &str, value: &str) -> Self {
        self.options.insert(key.to_string(), value.to_string());
        self
    }

    /// Parse from a JSON document; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, String> {
        let config: Self = serde_json::from_str(json).map_err(|e| e.to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.batch_size == 0 {
            return Err("batch_size must be > 0".to_string());
        }

        if self.channel_capacity == 0 {
            return Err("channel_capacity must be > 0".to_string());
        }

        if self.update_on_existing_pk && self.ignore_existing_pk {
            return Err(
                "update_on_existing_pk and ignore_existing_pk are mutually exclusive".to_string(),
            );
        }

        if let Some(interval) = self.flush_interval {
            if interval.is_zero() {
                return Err("flush_interval must be non-zero".to_string());
            }
        }

        Ok(())
    }

    /// Options sent with each batch write
    pub fn insert_options(&self) -> InsertOptions {
        InsertOptions {
            update_on_existing_pk: self.update_on_existing_pk,
            ignore_existing_pk: self.ignore_existing_pk,
            extra: self.options.clone(),
        }
    }
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self::new()
    }
}
