//! Lifecycle controller.
//!
//! Every task mutation goes through here so the trigger engine's live
//! registrations always match what the task store says: a trigger exists
//! exactly for the enabled tasks.

use crate::engine::{TriggerEngine, TriggerHandler, WorkerPool};
use crate::error::{EngineError, Result};
use crate::models::{
    ExecutionOutcome, StepRecord, TaskPatch, TaskSchedule, TaskSnapshot, TaskSpec,
};
use crate::runtime::ExecutionOrchestrator;
use crate::storage::{StoredTask, TaskStore};
use async_trait::async_trait;
use parking_lot::Mutex;
use skybit_storage::time_utils::now_ms;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

/// Trigger callback that runs the task through the orchestrator.
pub struct ScheduledDispatch {
    orchestrator: Arc<ExecutionOrchestrator>,
}

impl ScheduledDispatch {
    pub fn new(orchestrator: Arc<ExecutionOrchestrator>) -> Self {
        Self { orchestrator }
    }
}

#[async_trait]
impl TriggerHandler for ScheduledDispatch {
    async fn on_fire(&self, task_id: &str) {
        let slot = match self.orchestrator.try_acquire(task_id) {
            Ok(slot) => slot,
            Err(EngineError::AlreadyRunning(_)) => {
                warn!(task_id = %task_id, "Task still running, scheduled run skipped");
                return;
            }
            Err(EngineError::NotFound(_)) => {
                warn!(task_id = %task_id, "Task no longer exists, scheduled run skipped");
                return;
            }
            Err(err) => {
                error!(task_id = %task_id, error = %err, "Scheduled run could not start");
                return;
            }
        };

        if let Err(err) = self.orchestrator.execute_with_slot(slot).await {
            warn!(task_id = %task_id, error = %err, "Scheduled run did not record an outcome");
        }
    }
}

/// Pending on-demand run.
#[derive(Debug)]
pub struct RunTicket {
    task_id: String,
    done: oneshot::Receiver<Result<ExecutionOutcome>>,
}

impl RunTicket {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Wait for the run to finish.
    pub async fn wait(self) -> Result<ExecutionOutcome> {
        self.done.await.map_err(|_| {
            EngineError::Backend(format!("run of task {} was abandoned", self.task_id))
        })?
    }
}

/// Result of rebuilding triggers at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    pub restored: usize,
    pub pruned: usize,
    pub failed: Vec<String>,
}

pub struct TaskLifecycle {
    tasks: TaskStore,
    triggers: Arc<TriggerEngine>,
    orchestrator: Arc<ExecutionOrchestrator>,
    pool: Arc<WorkerPool>,
    dispatch: Arc<dyn TriggerHandler>,
    /// Serializes mutations so store and trigger updates never interleave.
    mutation_lock: Mutex<()>,
}

impl TaskLifecycle {
    pub fn new(
        tasks: TaskStore,
        triggers: Arc<TriggerEngine>,
        orchestrator: Arc<ExecutionOrchestrator>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        let dispatch: Arc<dyn TriggerHandler> =
            Arc::new(ScheduledDispatch::new(orchestrator.clone()));
        Self {
            tasks,
            triggers,
            orchestrator,
            pool,
            dispatch,
            mutation_lock: Mutex::new(()),
        }
    }

    fn snapshot(&self, stored: StoredTask) -> TaskSnapshot {
        let next_run_at = self.triggers.next_fire_time(&stored.definition.id);
        TaskSnapshot {
            definition: stored.definition,
            outcome: stored.outcome,
            next_run_at,
        }
    }

    /// Create a task; registers its trigger when it starts enabled.
    pub fn create(&self, spec: TaskSpec) -> Result<TaskSnapshot> {
        let _guard = self.mutation_lock.lock();
        let definition = spec.into_definition(now_ms())?;
        self.tasks.insert_new(&definition)?;

        if definition.enabled
            && let Err(err) =
                self.triggers
                    .register(&definition.id, &definition.schedule, self.dispatch.clone())
        {
            if let Err(rollback) = self.tasks.delete(&definition.id) {
                error!(task_id = %definition.id, error = %rollback, "Failed to roll back task creation");
            }
            return Err(err);
        }

        info!(task_id = %definition.id, enabled = definition.enabled, "Task created");
        Ok(self.snapshot(self.tasks.get(&definition.id)?))
    }

    /// Apply a partial update and bring the trigger in line with the result.
    pub fn update(&self, task_id: &str, patch: TaskPatch) -> Result<TaskSnapshot> {
        let _guard = self.mutation_lock.lock();
        let now = now_ms();
        let mut previous = None;
        let updated = self.tasks.update_definition(task_id, |current| {
            previous = Some(current.clone());
            patch.apply(current, now)
        })?;
        let Some(previous) = previous else {
            return Err(EngineError::NotFound(task_id.to_string()));
        };

        let reconciled = if updated.enabled {
            let needs_register = !previous.enabled
                || previous.schedule != updated.schedule
                || !self.triggers.is_registered(task_id);
            if needs_register {
                self.triggers
                    .register(task_id, &updated.schedule, self.dispatch.clone())
                    .map(|_| ())
            } else {
                Ok(())
            }
        } else {
            self.triggers.deregister(task_id)
        };

        if let Err(err) = reconciled {
            // Put the old definition back so store and triggers agree again.
            if let Err(revert) = self.tasks.update_definition(task_id, |_| Ok(previous.clone())) {
                error!(task_id = %task_id, error = %revert, "Failed to revert task update");
            }
            return Err(err);
        }

        info!(task_id = %task_id, enabled = updated.enabled, schedule = %updated.schedule, "Task updated");
        Ok(self.snapshot(self.tasks.get(task_id)?))
    }

    /// Remove a task and its trigger. A run in flight finishes, but its
    /// outcome is discarded.
    pub fn delete(&self, task_id: &str) -> Result<()> {
        let _guard = self.mutation_lock.lock();
        if !self.tasks.exists(task_id)? {
            return Err(EngineError::NotFound(task_id.to_string()));
        }
        let registration = self.triggers.registration(task_id);
        self.triggers.deregister(task_id)?;

        if let Err(err) = self.tasks.delete(task_id) {
            // The task is still there, so its trigger must be too.
            if let Some((schedule, anchor_at)) = registration {
                self.reinstate_trigger(task_id, &schedule, anchor_at);
            }
            return Err(err);
        }
        info!(task_id = %task_id, "Task deleted");
        Ok(())
    }

    /// Enable a task and (re)register its trigger from the current schedule.
    pub fn enable(&self, task_id: &str) -> Result<TaskSnapshot> {
        let _guard = self.mutation_lock.lock();
        let mut was_enabled = false;
        let updated = self.tasks.update_definition(task_id, |current| {
            was_enabled = current.enabled;
            let mut next = current.clone();
            next.enabled = true;
            Ok(next)
        })?;

        if !(was_enabled && self.triggers.is_registered(task_id))
            && let Err(err) =
                self.triggers
                    .register(task_id, &updated.schedule, self.dispatch.clone())
        {
            if !was_enabled {
                self.revert_enabled(task_id, false);
            }
            return Err(err);
        }

        info!(task_id = %task_id, "Task enabled");
        Ok(self.snapshot(self.tasks.get(task_id)?))
    }

    /// Disable a task: its trigger goes away, the definition stays.
    pub fn disable(&self, task_id: &str) -> Result<TaskSnapshot> {
        let _guard = self.mutation_lock.lock();
        let mut was_enabled = false;
        self.tasks.update_definition(task_id, |current| {
            was_enabled = current.enabled;
            let mut next = current.clone();
            next.enabled = false;
            Ok(next)
        })?;
        if let Err(err) = self.triggers.deregister(task_id) {
            if was_enabled {
                self.revert_enabled(task_id, true);
            }
            return Err(err);
        }

        info!(task_id = %task_id, "Task disabled");
        Ok(self.snapshot(self.tasks.get(task_id)?))
    }

    /// Write back the enabled flag after the trigger side of a toggle failed.
    fn revert_enabled(&self, task_id: &str, enabled: bool) {
        let reverted = self.tasks.update_definition(task_id, |current| {
            let mut next = current.clone();
            next.enabled = enabled;
            Ok(next)
        });
        if let Err(err) = reverted {
            error!(task_id = %task_id, enabled, error = %err, "Failed to revert enabled flag");
        }
    }

    fn reinstate_trigger(&self, task_id: &str, schedule: &TaskSchedule, anchor_at: i64) {
        let reinstated =
            self.triggers
                .reinstate(task_id, schedule, anchor_at, self.dispatch.clone());
        if let Err(err) = reinstated {
            error!(task_id = %task_id, error = %err, "Failed to reinstate trigger");
        }
    }

    /// Queue a run on the worker pool, outside the trigger timeline.
    ///
    /// The execution slot is taken before this returns, so a concurrent
    /// request for the same task fails right away with `AlreadyRunning`.
    pub fn run_now(&self, task_id: &str) -> Result<RunTicket> {
        let slot = self.orchestrator.try_acquire(task_id)?;
        let (done_tx, done_rx) = oneshot::channel();
        let orchestrator = self.orchestrator.clone();

        self.pool
            .submit(async move {
                let result = orchestrator.execute_with_slot(slot).await;
                let _ = done_tx.send(result);
            })
            .map_err(|_| EngineError::Config("engine is shutting down".to_string()))?;

        info!(task_id = %task_id, "Run queued");
        Ok(RunTicket {
            task_id: task_id.to_string(),
            done: done_rx,
        })
    }

    /// Run in the caller's task and wait for the outcome.
    pub async fn run_and_wait(&self, task_id: &str) -> Result<ExecutionOutcome> {
        self.orchestrator.execute(task_id).await
    }

    pub fn get(&self, task_id: &str) -> Result<TaskSnapshot> {
        Ok(self.snapshot(self.tasks.get(task_id)?))
    }

    pub fn list(&self) -> Result<Vec<TaskSnapshot>> {
        Ok(self
            .tasks
            .list()?
            .into_iter()
            .map(|stored| self.snapshot(stored))
            .collect())
    }

    /// Step trace of the most recent (or current) run.
    pub fn steps(&self, task_id: &str) -> Result<Vec<StepRecord>> {
        Ok(self.tasks.get(task_id)?.outcome.steps)
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.orchestrator.is_running(task_id)
    }

    /// Rebuild live triggers from the store: one per enabled task, stale
    /// trigger records pruned.
    pub fn restore(&self) -> Result<RestoreReport> {
        let _guard = self.mutation_lock.lock();
        let mut report = RestoreReport::default();
        let mut keep = HashSet::new();

        for stored in self.tasks.list()? {
            let definition = stored.definition;
            if !definition.enabled {
                continue;
            }
            match self
                .triggers
                .restore(&definition.id, &definition.schedule, self.dispatch.clone())
            {
                Ok(_) => {
                    keep.insert(definition.id);
                    report.restored += 1;
                }
                Err(EngineError::Validation(msg)) => {
                    error!(task_id = %definition.id, error = %msg, "Cannot schedule task");
                    report.failed.push(definition.id);
                }
                Err(err) => return Err(err),
            }
        }

        report.pruned = self.triggers.prune_records(&keep)?;
        info!(
            restored = report.restored,
            pruned = report.pruned,
            failed = report.failed.len(),
            "Triggers restored"
        );
        Ok(report)
    }
}
