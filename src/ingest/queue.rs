use crate::key::RecordKey;
use std::collections::HashMap;

/// Result of offering one record to a [`WorkerQueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueInsert {
    /// Appended at the end of the batch.
    Appended,
    /// Replaced the buffered record with the same primary key.
    Replaced,
    /// Same primary key already buffered and upserts are off; nothing changed.
    Rejected,
}

/// Pending batch for one destination.
///
/// Once [`is_full`](Self::is_full) reports true the owner must write and
/// [`flush`](Self::flush) the batch before inserting again.
#[derive(Debug)]
pub struct WorkerQueue<T> {
    capacity: usize,
    entries: Vec<T>,
    positions: Option<HashMap<RecordKey, usize>>,
    update_on_existing_pk: bool,
}

impl<T> WorkerQueue<T> {
    pub fn new(capacity: usize, has_primary_key: bool, update_on_existing_pk: bool) -> Self {
        Self {
            capacity,
            entries: Vec::with_capacity(capacity),
            positions: has_primary_key.then(HashMap::new),
            update_on_existing_pk,
        }
    }

    pub fn insert(&mut self, entry: T, primary_key: Option<RecordKey>) -> QueueInsert {
        let (Some(positions), Some(key)) = (self.positions.as_mut(), primary_key) else {
            self.entries.push(entry);
            return QueueInsert::Appended;
        };

        match positions.get(&key) {
            Some(&position) if self.update_on_existing_pk => {
                self.entries[position] = entry;
                QueueInsert::Replaced
            }
            Some(_) => QueueInsert::Rejected,
            None => {
                positions.insert(key, self.entries.len());
                self.entries.push(entry);
                QueueInsert::Appended
            }
        }
    }

    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Buffered records in insertion order.
    pub fn pending(&self) -> &[T] {
        &self.entries
    }

    /// Takes the buffered batch and resets the queue.
    pub fn flush(&mut self) -> Vec<T> {
        if let Some(positions) = self.positions.as_mut() {
            positions.clear();
        }
        std::mem::replace(&mut self.entries, Vec::with_capacity(self.capacity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnSpec, ColumnType, Record, TableSchema};
    use crate::key::{KeyBuilder, KeyKind, Murmur3KeyHasher};
    use std::sync::Arc;

    fn pk(id: i64) -> Option<RecordKey> {
        let schema = Arc::new(TableSchema::new(
            "t",
            vec![ColumnSpec::new("id", ColumnType::Long).primary_key()],
        ));
        let builder =
            KeyBuilder::new(schema, KeyKind::Primary, Arc::new(Murmur3KeyHasher::default()))
                .unwrap();
        builder.build(&Record::new().with("id", id)).unwrap()
    }

    #[test]
    fn test_fills_to_capacity_and_resets_on_flush() {
        let mut queue = WorkerQueue::new(3, false, false);
        for i in 0..3 {
            assert!(!queue.is_full());
            assert_eq!(queue.insert(i, None), QueueInsert::Appended);
        }
        assert!(queue.is_full());
        assert_eq!(queue.flush(), vec![0, 1, 2]);
        assert!(queue.is_empty());
        assert!(queue.flush().is_empty());
    }

    #[test]
    fn test_upsert_overwrites_in_place() {
        let mut queue = WorkerQueue::new(10, true, true);
        queue.insert("a", pk(1));
        queue.insert("x", pk(2));
        assert_eq!(queue.insert("b", pk(1)), QueueInsert::Replaced);
        assert_eq!(queue.pending(), &["b", "x"]);
    }

    #[test]
    fn test_duplicate_is_rejected_without_upsert() {
        let mut queue = WorkerQueue::new(10, true, false);
        queue.insert("a", pk(1));
        assert_eq!(queue.insert("b", pk(1)), QueueInsert::Rejected);
        assert_eq!(queue.pending(), &["a"]);
    }

    #[test]
    fn test_flush_forgets_primary_keys() {
        let mut queue = WorkerQueue::new(10, true, false);
        queue.insert("a", pk(1));
        queue.flush();
        assert_eq!(queue.insert("b", pk(1)), QueueInsert::Appended);
    }

    #[test]
    fn test_keyless_queue_keeps_duplicates() {
        let mut queue = WorkerQueue::new(10, false, false);
        queue.insert("a", None);
        queue.insert("a", None);
        assert_eq!(queue.len(), 2);
    }
}
