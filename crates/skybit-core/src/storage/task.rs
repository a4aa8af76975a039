//! Typed task storage wrapper.
//!
//! Provides type-safe access to the `tasks` table by wrapping the byte-level
//! APIs from skybit-storage. A record holds the definition together with its
//! execution outcome so both change under one write transaction.

use crate::error::{EngineError, Result};
use crate::models::{ExecutionOutcome, LastRun, StepRecord, TaskDefinition};
use redb::Database;
use serde::{Deserialize, Serialize};
use skybit_storage::SimpleStorage;
use std::sync::Arc;

/// Persisted form of a task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredTask {
    pub definition: TaskDefinition,
    #[serde(default)]
    pub outcome: ExecutionOutcome,
}

impl StoredTask {
    pub fn new(definition: TaskDefinition) -> Self {
        Self {
            definition,
            outcome: ExecutionOutcome::default(),
        }
    }
}

/// Typed task storage wrapper around skybit-storage::TaskStorage.
#[derive(Debug, Clone)]
pub struct TaskStore {
    inner: skybit_storage::TaskStorage,
}

impl TaskStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        Ok(Self {
            inner: skybit_storage::TaskStorage::new(db)?,
        })
    }

    pub(crate) fn from_inner(inner: skybit_storage::TaskStorage) -> Self {
        Self { inner }
    }

    fn decode(bytes: &[u8]) -> Result<StoredTask> {
        Ok(serde_json::from_slice(bytes)?)
    }

    fn encode(task: &StoredTask) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(task)?)
    }

    /// Insert a new task. Fails with `Conflict` (and writes nothing) when the
    /// ID is already taken.
    pub fn insert_new(&self, definition: &TaskDefinition) -> Result<()> {
        let bytes = Self::encode(&StoredTask::new(definition.clone()))?;
        if self.inner.insert_new_raw(&definition.id, &bytes)? {
            Ok(())
        } else {
            Err(EngineError::Conflict(definition.id.clone()))
        }
    }

    pub fn get(&self, id: &str) -> Result<StoredTask> {
        match self.inner.get_raw(id)? {
            Some(bytes) => Self::decode(&bytes),
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    pub fn get_definition(&self, id: &str) -> Result<TaskDefinition> {
        Ok(self.get(id)?.definition)
    }

    /// All tasks ordered by ID.
    pub fn list(&self) -> Result<Vec<StoredTask>> {
        self.inner
            .list_raw()?
            .into_iter()
            .map(|(_, bytes)| Self::decode(&bytes))
            .collect()
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        if self.inner.delete(id)? {
            Ok(())
        } else {
            Err(EngineError::NotFound(id.to_string()))
        }
    }

    pub fn exists(&self, id: &str) -> Result<bool> {
        Ok(self.inner.exists(id)?)
    }

    /// Replace the definition through `apply`, leaving the outcome untouched.
    ///
    /// The read and the write share one transaction, so a run finishing at
    /// the same time cannot lose its outcome.
    pub fn update_definition<F>(&self, id: &str, apply: F) -> Result<TaskDefinition>
    where
        F: FnOnce(&TaskDefinition) -> Result<TaskDefinition>,
    {
        let updated = self.inner.update_raw(id, |bytes| {
            let mut task = Self::decode(bytes)?;
            task.definition = apply(&task.definition)?;
            Ok(Self::encode(&task)?)
        })?;

        match updated {
            Some(bytes) => Ok(Self::decode(&bytes)?.definition),
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    /// Mark the start of a run: stamps `run_id`, resets the step trace.
    pub fn begin_run(&self, id: &str, run_id: &str, started_at: i64) -> Result<()> {
        let updated = self.inner.update_raw(id, |bytes| {
            let mut task = Self::decode(bytes)?;
            task.outcome.begin_run(run_id, started_at);
            Ok(Self::encode(&task)?)
        })?;

        match updated {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    /// Append one step to the trace of `run_id`.
    ///
    /// Returns false when the task is gone or now belongs to another run; the
    /// step is dropped in that case.
    pub fn append_step(&self, id: &str, run_id: &str, step: StepRecord) -> Result<bool> {
        let mut appended = false;
        self.inner.update_raw(id, |bytes| {
            let mut task = Self::decode(bytes)?;
            if task.outcome.is_run(run_id) {
                task.outcome.push_step(step);
                appended = true;
                Ok(Self::encode(&task)?)
            } else {
                Ok(bytes.to_vec())
            }
        })?;
        Ok(appended)
    }

    /// Merge the final result of `run_id` into the outcome.
    ///
    /// Returns `None` when the task was deleted (or replaced) while the run
    /// was in flight; nothing is written then.
    pub fn record_outcome(
        &self,
        id: &str,
        run_id: &str,
        result: LastRun,
    ) -> Result<Option<ExecutionOutcome>> {
        let mut recorded = None;
        self.inner.update_raw(id, |bytes| {
            let mut task = Self::decode(bytes)?;
            if task.outcome.is_run(run_id) {
                task.outcome.finish(result);
                recorded = Some(task.outcome.clone());
                Ok(Self::encode(&task)?)
            } else {
                Ok(bytes.to_vec())
            }
        })?;
        Ok(recorded)
    }
}
