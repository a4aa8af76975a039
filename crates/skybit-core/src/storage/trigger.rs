//! Typed trigger storage wrapper.

use crate::error::Result;
use crate::models::TriggerRecord;
use redb::Database;
use skybit_storage::SimpleStorage;
use std::sync::Arc;

/// Typed trigger storage wrapper around skybit-storage::TriggerStorage.
#[derive(Debug, Clone)]
pub struct TriggerStore {
    inner: skybit_storage::TriggerStorage,
}

impl TriggerStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self {
            inner: skybit_storage::TriggerStorage::new(db)?,
        })
    }

    pub(crate) fn from_inner(inner: skybit_storage::TriggerStorage) -> Self {
        Self { inner }
    }

    pub fn put(&self, record: &TriggerRecord) -> Result<()> {
        let json_bytes = serde_json::to_vec(record)?;
        self.inner.put_raw(&record.task_id, &json_bytes)?;
        Ok(())
    }

    pub fn get(&self, task_id: &str) -> Result<Option<TriggerRecord>> {
        if let Some(bytes) = self.inner.get_raw(task_id)? {
            Ok(Some(serde_json::from_slice(&bytes)?))
        } else {
            Ok(None)
        }
    }

    /// Remove the record; true if it existed.
    pub fn delete(&self, task_id: &str) -> Result<bool> {
        Ok(self.inner.delete(task_id)?)
    }

    pub fn list(&self) -> Result<Vec<TriggerRecord>> {
        let triggers = self.inner.list_raw()?;
        let mut result = Vec::with_capacity(triggers.len());
        for (_, bytes) in triggers {
            result.push(serde_json::from_slice(&bytes)?);
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TaskSchedule;
    use tempfile::tempdir;

    fn record(task_id: &str) -> TriggerRecord {
        TriggerRecord {
            task_id: task_id.to_string(),
            schedule: TaskSchedule::interval(15),
            anchor_at: 1_000,
            next_fire_at: Some(1_000 + 15 * 60_000),
            registered_at: 1_000,
        }
    }

    #[test]
    fn test_put_get_list_delete() {
        let temp_dir = tempdir().unwrap();
        let db = Arc::new(Database::create(temp_dir.path().join("test.db")).unwrap());
        let store = TriggerStore::new(db).unwrap();

        store.put(&record("a")).unwrap();
        store.put(&record("b")).unwrap();
        assert_eq!(store.get("a").unwrap().unwrap(), record("a"));
        assert_eq!(store.list().unwrap().len(), 2);

        assert!(store.delete("a").unwrap());
        assert!(!store.delete("a").unwrap());
        assert!(store.get("a").unwrap().is_none());
    }
}
