//! read-only view of the store for the dashboard poller.
//!
//! no caching: every call goes to sqlite, so results always reflect the
//! store at call time.

use crate::domain::{HistoryLimit, Reading};
use crate::error::StoreError;
use crate::store::ReadingStore;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// latest reading of every known producer
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub readings: Vec<Reading>,
    pub queried_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct SnapshotReader {
    store: Arc<ReadingStore>,
}

impl SnapshotReader {
    pub fn new(store: Arc<ReadingStore>) -> Self {
        Self { store }
    }

    pub fn latest(&self) -> Result<Snapshot, StoreError> {
        let readings = self.store.latest_per_producer()?;
        Ok(Snapshot { readings, queried_at: Utc::now() })
    }

    pub fn history(&self, producer_id: &str, limit: HistoryLimit) -> Result<Vec<Reading>, StoreError> {
        self.store.history(producer_id, limit)
    }

    pub fn reading_count(&self) -> Result<u64, StoreError> {
        self.store.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reflects_inserts_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReadingStore::open(dir.path().join("hub.db")).unwrap());
        let reader = SnapshotReader::new(store.clone());
        assert!(reader.latest().unwrap().readings.is_empty());

        let payload = json!({"temperature": 20.0}).as_object().cloned().unwrap();
        store.insert("group_1", 10.0, &payload).unwrap();
        store.insert("group_1", 11.0, &payload).unwrap();

        let snapshot = reader.latest().unwrap();
        assert_eq!(snapshot.readings.len(), 1);
        assert_eq!(snapshot.readings[0].observed_at, 11.0);
        assert_eq!(reader.history("group_1", HistoryLimit::DEFAULT).unwrap().len(), 2);
        assert_eq!(reader.reading_count().unwrap(), 2);
    }
}
