use crate::core::{IngestError, Result};
use serde::{Deserialize, Serialize};

/// Server-provided mapping from shard bucket to destination index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutingTable {
    buckets: Vec<usize>,
    destination_count: usize,
    version: u64,
}

impl RoutingTable {
    /// Creates a table; every bucket must point at an existing destination.
    pub fn new(buckets: Vec<usize>, destination_count: usize, version: u64) -> Result<Self> {
        let table = Self {
            buckets,
            destination_count,
            version,
        };
        table.validate()?;
        Ok(table)
    }

    /// Table for a cluster that accepts every write on one destination.
    pub fn single() -> Self {
        Self {
            buckets: vec![0],
            destination_count: 1,
            version: 0,
        }
    }

    /// Assigns `bucket_count` buckets to destinations in round-robin order.
    pub fn uniform(bucket_count: usize, destination_count: usize, version: u64) -> Result<Self> {
        if destination_count == 0 {
            return Err(IngestError::TopologyUnavailable(
                "routing table needs at least one destination".to_string(),
            ));
        }
        let buckets = (0..bucket_count).map(|b| b % destination_count).collect();
        Self::new(buckets, destination_count, version)
    }

    pub fn validate(&self) -> Result<()> {
        if self.destination_count == 0 {
            return Err(IngestError::TopologyUnavailable(
                "routing table needs at least one destination".to_string(),
            ));
        }
        if self.buckets.is_empty() {
            return Err(IngestError::TopologyUnavailable(
                "routing table has no shard buckets".to_string(),
            ));
        }
        if let Some(bad) = self.buckets.iter().find(|&&d| d >= self.destination_count) {
            return Err(IngestError::TopologyUnavailable(format!(
                "routing table references destination {} but only {} exist",
                bad, self.destination_count
            )));
        }
        Ok(())
    }

    pub fn buckets(&self) -> &[usize] {
        &self.buckets
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn destination_count(&self) -> usize {
        self.destination_count
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Bucket for a routing hash: `|hash rem len|`, as the server computes it.
    pub fn bucket_for(&self, routing_hash: i64) -> usize {
        (routing_hash % self.buckets.len() as i64).unsigned_abs() as usize
    }

    pub fn destination_for(&self, routing_hash: i64) -> usize {
        self.buckets[self.bucket_for(routing_hash)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uniform_assignment() {
        let table = RoutingTable::uniform(6, 3, 1).unwrap();
        assert_eq!(table.buckets(), &[0, 1, 2, 0, 1, 2]);
        assert_eq!(table.destination_for(4), 1);
    }

    #[test]
    fn test_negative_hashes_use_absolute_remainder() {
        let table = RoutingTable::new(vec![0, 1, 2, 3, 4], 5, 1).unwrap();
        assert_eq!(table.bucket_for(-7), 2);
        assert_eq!(table.bucket_for(i64::MIN), (i64::MIN % 5).unsigned_abs() as usize);
    }

    #[test]
    fn test_validation() {
        assert!(RoutingTable::new(vec![0, 2], 2, 1).is_err());
        assert!(RoutingTable::new(vec![], 2, 1).is_err());
        assert!(RoutingTable::new(vec![0], 0, 1).is_err());
        assert!(RoutingTable::single().validate().is_ok());
    }
}
