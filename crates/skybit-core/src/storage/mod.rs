//! Typed storage layer.
//!
//! Wraps the byte-level storages from skybit-storage with the engine's models.

pub mod task;
pub mod trigger;

pub use task::{StoredTask, TaskStore};
pub use trigger::TriggerStore;

use crate::error::{EngineError, Result};
use redb::Database;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Central storage manager for the engine.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
    pub tasks: TaskStore,
    pub triggers: TriggerStore,
}

impl Storage {
    /// Open the database and make sure every task record decodes.
    ///
    /// A file that cannot be opened or holds an undecodable record is a
    /// fatal error; nothing is skipped or repaired.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = skybit_storage::Storage::new(path)?;
        let db = raw.get_db();
        let storage = Self {
            db,
            tasks: TaskStore::from_inner(raw.tasks),
            triggers: TriggerStore::from_inner(raw.triggers),
        };

        let tasks = storage.tasks.list().map_err(|err| {
            EngineError::Persistence(format!(
                "database at {} holds an unreadable task record: {err}",
                path.display()
            ))
        })?;
        storage.triggers.list().map_err(|err| {
            EngineError::Persistence(format!(
                "database at {} holds an unreadable trigger record: {err}",
                path.display()
            ))
        })?;

        info!(path = %path.display(), tasks = tasks.len(), "Task store loaded");
        Ok(storage)
    }

    pub fn get_db(&self) -> Arc<Database> {
        self.db.clone()
    }
}
