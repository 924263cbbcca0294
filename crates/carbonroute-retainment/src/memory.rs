use std::sync::Mutex;
use std::time::Duration;

use time::OffsetDateTime;

use crate::{
    PendingQuery, RecordId, RetainedRecord, RetainmentError, RetainmentStore, StoredRecord,
    DEFAULT_TTL_SECS,
};

/// Process-local store used in mock mode and tests.
#[derive(Debug)]
pub struct MemoryRetainmentStore {
    ttl: Duration,
    records: Mutex<Vec<StoredRecord>>,
}

impl MemoryRetainmentStore {
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            records: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Every stored record including expired ones, in insertion order.
    ///
    /// # Panics
    /// Panics if the store mutex is poisoned.
    #[must_use]
    pub fn snapshot(&self) -> Vec<StoredRecord> {
        self.records
            .lock()
            .expect("retainment store mutex poisoned")
            .clone()
    }
}

impl Default for MemoryRetainmentStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TTL_SECS))
    }
}

impl RetainmentStore for MemoryRetainmentStore {
    fn insert(&self, record: RetainedRecord) -> Result<RecordId, RetainmentError> {
        record.check()?;

        let id = RecordId::new();
        let mut records = self.records.lock().expect("retainment store mutex poisoned");
        let now = record.creation_time;
        records.retain(|stored| !stored.record.is_expired(now));
        tracing::info!(record_id = %id, provider = %record.provider, "retained pending reading");
        records.push(StoredRecord { id, record });
        Ok(id)
    }

    fn find_pending(
        &self,
        query: &PendingQuery,
        now: OffsetDateTime,
    ) -> Result<Vec<StoredRecord>, RetainmentError> {
        let records = self.records.lock().expect("retainment store mutex poisoned");
        Ok(records
            .iter()
            .filter(|stored| {
                let record = &stored.record;
                !record.valid
                    && !record.is_expired(now)
                    && record.lat == query.lat
                    && record.lon == query.lon
                    && record.request_time == query.request_time
            })
            .cloned()
            .collect())
    }

    fn purge_expired(&self, now: OffsetDateTime) -> Result<usize, RetainmentError> {
        let mut records = self.records.lock().expect("retainment store mutex poisoned");
        let before = records.len();
        records.retain(|stored| !stored.record.is_expired(now));
        let removed = before - records.len();
        tracing::info!(removed, "purged expired retained readings");
        Ok(removed)
    }

    fn count(&self, now: OffsetDateTime) -> Result<usize, RetainmentError> {
        let records = self.records.lock().expect("retainment store mutex poisoned");
        Ok(records
            .iter()
            .filter(|stored| !stored.record.is_expired(now))
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_reading;
    use time::macros::datetime;

    #[test]
    fn memory_store_matches_point_queries_and_expiry() {
        let store = MemoryRetainmentStore::new(Duration::from_secs(120));
        let now = datetime!(2025-03-01 10:00 UTC);
        let id = store
            .insert(RetainedRecord::pending(sample_reading(), store.ttl(), now))
            .expect("insert");

        let query = PendingQuery {
            lat: 52.0,
            lon: 5.0,
            request_time: datetime!(2025-03-01 10:00 UTC),
        };
        let found = store.find_pending(&query, now).expect("find");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, id);

        let elsewhere = PendingQuery { lat: 46.2, ..query };
        assert!(store.find_pending(&elsewhere, now).expect("find").is_empty());

        let later = now + time::Duration::minutes(3);
        assert!(store.find_pending(&query, later).expect("find").is_empty());
        assert_eq!(store.purge_expired(later).expect("purge"), 1);
        assert!(store.snapshot().is_empty());
    }
}
