use crate::cluster::WriteResponse;
use std::sync::atomic::{AtomicU64, Ordering};

/// Running totals for one table's ingestion.
#[derive(Debug, Default)]
pub struct IngestCounters {
    inserted: AtomicU64,
    updated: AtomicU64,
    rejected: AtomicU64,
}

/// Point-in-time copy of [`IngestCounters`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub inserted: u64,
    pub updated: u64,
    pub rejected: u64,
}

impl IngestCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_write(&self, response: &WriteResponse) {
        self.inserted
            .fetch_add(response.count_inserted, Ordering::Relaxed);
        self.updated.fetch_add(response.count_updated, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }

    pub fn updated(&self) -> u64 {
        self.updated.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            inserted: self.inserted(),
            updated: self.updated(),
            rejected: self.rejected(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_responses() {
        let counters = IngestCounters::new();
        counters.record_write(&WriteResponse {
            count_inserted: 3,
            count_updated: 1,
        });
        counters.record_write(&WriteResponse {
            count_inserted: 2,
            count_updated: 0,
        });
        counters.record_rejected();

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                inserted: 5,
                updated: 1,
                rejected: 1,
            }
        );
    }
}
