//! Skybit Storage - Low-level storage abstraction layer
//!
//! This crate provides the persistence layer for Skybit, using redb as the
//! embedded database. It exposes byte-level APIs so the engine crate owns
//! the serialization format of its models.
//!
//! # Tables
//!
//! - `tasks` - Task definitions together with their last execution outcome
//! - `task_triggers` - Trigger state needed to rebuild schedules on restart

pub mod simple_storage;
pub mod task;
pub mod time_utils;
pub mod trigger;

use anyhow::{Context, Result};
use redb::Database;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

pub use simple_storage::SimpleStorage;
pub use task::TaskStorage;
pub use trigger::TriggerStorage;

/// Central storage manager that initializes all storage subsystems
pub struct Storage {
    db: Arc<Database>,
    pub tasks: TaskStorage,
    pub triggers: TriggerStorage,
}

impl Storage {
    /// Open (or create) the database at the given path.
    ///
    /// An existing file that redb cannot open (truncated, corrupt, or written
    /// by something else) is reported as an error; nothing is repaired here.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("failed to open database at {}", path.display()))?;
        let db = Arc::new(db);

        let tasks = TaskStorage::new(db.clone())?;
        let triggers = TriggerStorage::new(db.clone())?;
        debug!(path = %path.display(), "Storage opened");

        Ok(Self {
            db,
            tasks,
            triggers,
        })
    }

    /// Get a reference to the underlying database
    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("skybit.db");

        {
            let storage = Storage::new(&db_path).unwrap();
            storage.tasks.put_raw("daily_report", b"task").unwrap();
            storage.triggers.put_raw("daily_report", b"trigger").unwrap();
        }

        let storage = Storage::new(&db_path).unwrap();
        assert_eq!(storage.tasks.get_raw("daily_report").unwrap().unwrap(), b"task");
        assert_eq!(
            storage.triggers.get_raw("daily_report").unwrap().unwrap(),
            b"trigger"
        );
    }

    #[test]
    fn test_garbage_file_is_rejected() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("skybit.db");
        std::fs::write(&db_path, b"this is not a redb database file at all").unwrap();

        assert!(Storage::new(&db_path).is_err());
    }
}
