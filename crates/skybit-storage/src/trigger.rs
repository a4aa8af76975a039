//! Trigger storage - byte-level API for scheduler trigger persistence.
//!
//! Holds the schedule parameters needed to rebuild live triggers after a
//! restart. The task table stays the source of truth; these records are a
//! derived cache keyed by task ID.

use crate::define_simple_storage;

define_simple_storage! {
    /// Low-level trigger storage with byte-level API
    pub struct TriggerStorage { table: "task_triggers" }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SimpleStorage;
    use redb::Database;
    use std::sync::Arc;
    use tempfile::tempdir;

    #[test]
    fn test_put_and_get_raw() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(Database::create(db_path).unwrap());
        let storage = TriggerStorage::new(db).unwrap();

        let data = b"test trigger data";
        storage.put_raw("daily_report", data).unwrap();

        let retrieved = storage.get_raw("daily_report").unwrap();
        assert!(retrieved.is_some());
        assert_eq!(retrieved.unwrap(), data);
    }

    #[test]
    fn test_delete() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Arc::new(Database::create(db_path).unwrap());
        let storage = TriggerStorage::new(db).unwrap();

        storage.put_raw("daily_report", b"data").unwrap();

        let deleted = storage.delete("daily_report").unwrap();
        assert!(deleted);

        let retrieved = storage.get_raw("daily_report").unwrap();
        assert!(retrieved.is_none());
    }
}
