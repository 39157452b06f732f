//! Bounded in-memory store for prediction results.
//!
//! Each prediction gets a monotonically increasing id; the redirect to the
//! results view carries that id, so concurrent clients read the record they
//! produced instead of racing on a single shared slot. Records older than
//! the capacity window are evicted.
use std::{collections::HashMap, sync::Mutex};

/// One row of the results table.
#[derive(Debug, Clone)]
pub struct LabeledDetection {
    pub class: String,
    pub confidence: String,
}

/// Everything the results view needs to render one prediction.
#[derive(Debug, Clone)]
pub struct PredictionRecord {
    pub original_image: String,
    pub output_image: String,
    pub detections: Vec<LabeledDetection>,
}

pub struct ResultStore {
    inner: Mutex<StoreInner>,
    capacity: u64,
}

struct StoreInner {
    next_id: u64,
    latest: Option<u64>,
    records: HashMap<u64, PredictionRecord>,
}

impl ResultStore {
    pub fn new(capacity: u64) -> Self {
        Self {
            inner: Mutex::new(StoreInner {
                next_id: 1,
                latest: None,
                records: HashMap::new(),
            }),
            capacity,
        }
    }

    /// Store a record and return its id, evicting records that fell out of
    /// the capacity window.
    pub fn insert(&self, record: PredictionRecord) -> u64 {
        let mut inner = self.inner.lock().unwrap();

        let id = inner.next_id;
        inner.next_id += 1;
        inner.latest = Some(id);
        inner.records.insert(id, record);

        let capacity = self.capacity;
        inner.records.retain(|record_id, _| record_id + capacity > id);

        id
    }

    pub fn get(&self, id: u64) -> Option<PredictionRecord> {
        let inner = self.inner.lock().unwrap();
        inner.records.get(&id).cloned()
    }

    /// The most recently stored record, if any.
    pub fn latest(&self) -> Option<PredictionRecord> {
        let inner = self.inner.lock().unwrap();
        inner
            .latest
            .and_then(|id| inner.records.get(&id))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &str) -> PredictionRecord {
        PredictionRecord {
            original_image: format!("/static/uploads/{tag}.jpg"),
            output_image: format!("/static/outputs/output_{tag}.jpg"),
            detections: vec![],
        }
    }

    #[test]
    fn ids_are_monotonic_and_latest_follows_inserts() {
        let store = ResultStore::new(8);
        assert!(store.latest().is_none());

        let first = store.insert(record("a"));
        let second = store.insert(record("b"));
        assert_eq!(first, 1);
        assert_eq!(second, 2);

        assert_eq!(store.get(first).unwrap().original_image, "/static/uploads/a.jpg");
        assert_eq!(store.latest().unwrap().original_image, "/static/uploads/b.jpg");
    }

    #[test]
    fn records_outside_the_capacity_window_are_evicted() {
        let store = ResultStore::new(2);
        let first = store.insert(record("a"));
        store.insert(record("b"));
        store.insert(record("c"));

        assert!(store.get(first).is_none());
        assert!(store.get(2).is_some());
        assert!(store.get(3).is_some());
    }
}
