use super::RoutingTable;
use crate::core::Result;
use crate::key::RecordKey;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, RwLock};

/// Maps record keys to destination indices.
///
/// The routing table sits behind a single `Arc` that is swapped whole on refresh,
/// so a reader always sees either the old or the new table.
#[derive(Debug)]
pub struct Router {
    table: RwLock<Arc<RoutingTable>>,
    rng: Mutex<StdRng>,
}

impl Router {
    pub fn new(table: RoutingTable) -> Self {
        Self::with_rng(table, StdRng::from_entropy())
    }

    /// Router whose keyless placement is reproducible.
    pub fn with_seed(table: RoutingTable, seed: u64) -> Self {
        Self::with_rng(table, StdRng::seed_from_u64(seed))
    }

    fn with_rng(table: RoutingTable, rng: StdRng) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
            rng: Mutex::new(rng),
        }
    }

    /// Snapshot of the current routing table.
    pub fn table(&self) -> Result<Arc<RoutingTable>> {
        Ok(Arc::clone(&*self.table.read()?))
    }

    pub fn destination_count(&self) -> Result<usize> {
        Ok(self.table()?.destination_count())
    }

    /// Installs a new routing table and returns the one it replaced.
    pub fn replace_table(&self, table: RoutingTable) -> Result<Arc<RoutingTable>> {
        table.validate()?;
        let mut guard = self.table.write()?;
        Ok(std::mem::replace(&mut *guard, Arc::new(table)))
    }

    /// Picks the destination for a record.
    ///
    /// Keyed records follow the routing table; keyless records go to a uniformly
    /// random destination so caller-side ordering cannot cluster them.
    pub fn route(&self, key: Option<&RecordKey>) -> Result<usize> {
        let table = self.table()?;
        let count = table.destination_count();
        if count == 1 {
            return Ok(0);
        }
        match key {
            Some(key) => Ok(table.destination_for(key.routing_hash())),
            None => Ok(self.rng.lock()?.gen_range(0..count)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnSpec, ColumnType, Record, TableSchema};
    use crate::key::{KeyBuilder, KeyKind, Murmur3KeyHasher};

    fn key_for(id: i64) -> RecordKey {
        let schema = Arc::new(TableSchema::new(
            "t",
            vec![ColumnSpec::new("id", ColumnType::Long).shard_key()],
        ));
        let builder =
            KeyBuilder::new(schema, KeyKind::Shard, Arc::new(Murmur3KeyHasher::default())).unwrap();
        builder.build(&Record::new().with("id", id)).unwrap().unwrap()
    }

    #[test]
    fn test_single_destination_always_zero() {
        let router = Router::new(RoutingTable::single());
        assert_eq!(router.route(None).unwrap(), 0);
        assert_eq!(router.route(Some(&key_for(9))).unwrap(), 0);
    }

    #[test]
    fn test_keyed_routing_follows_table() {
        let table = RoutingTable::uniform(16, 4, 1).unwrap();
        let router = Router::new(table.clone());
        let key = key_for(42);
        assert_eq!(
            router.route(Some(&key)).unwrap(),
            table.destination_for(key.routing_hash())
        );
    }

    #[test]
    fn test_keyless_routing_reaches_every_destination() {
        let router = Router::with_seed(RoutingTable::uniform(8, 4, 1).unwrap(), 7);
        let mut seen = [0usize; 4];
        for _ in 0..400 {
            seen[router.route(None).unwrap()] += 1;
        }
        assert!(seen.iter().all(|&n| n > 0));
    }

    #[test]
    fn test_replace_table_swaps_whole_table() {
        let router = Router::new(RoutingTable::uniform(4, 2, 1).unwrap());
        let before = router.table().unwrap();
        let previous = router
            .replace_table(RoutingTable::uniform(4, 2, 2).unwrap())
            .unwrap();
        assert_eq!(previous.version(), 1);
        assert_eq!(before.version(), 1);
        assert_eq!(router.table().unwrap().version(), 2);

        assert!(router.replace_table(RoutingTable::single()).is_ok());
        assert_eq!(router.destination_count().unwrap(), 1);
    }
}
