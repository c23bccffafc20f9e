use crate::context::{EntityRecordLock, RecordLockObserver};
use std::sync::Mutex;

/// Collects advisory record locks registered during a transaction.
#[derive(Debug, Default)]
pub struct RecordLockTracker {
    locks: Mutex<Vec<EntityRecordLock>>,
}

impl RecordLockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn locks(&self) -> Vec<EntityRecordLock> {
        self.locks.lock().map(|locks| locks.clone()).unwrap_or_default()
    }

    /// Locks registered for one key, oldest first.
    pub fn locks_for(&self, entity_name: &str, pk_text: &str) -> Vec<EntityRecordLock> {
        self.locks()
            .into_iter()
            .filter(|lock| lock.entity_name == entity_name && lock.pk_text == pk_text)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.clear();
        }
    }
}

impl RecordLockObserver for RecordLockTracker {
    fn register(&self, lock: EntityRecordLock) {
        if let Ok(mut locks) = self.locks.lock() {
            locks.push(lock);
        }
    }
}
