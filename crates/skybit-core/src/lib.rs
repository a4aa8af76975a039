//! Skybit Core - task scheduling and execution lifecycle engine.
//!
//! Operators define named, recurring automation tasks. The engine stores
//! them, fires them on interval or cron schedules, runs each one on an
//! agent-execution backend with at most one run per task at a time, and
//! records the outcome and step trace of the latest run.

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod paths;
pub mod runtime;
pub mod services;
pub mod storage;

pub use config::{EngineOptions, SkybitConfig};
pub use error::{EngineError, Result};
pub use models::{
    ExecutionOutcome, InstanceKind, LastRun, ModelProvider, ScheduleKind, StepRecord,
    TaskDefinition, TaskPatch, TaskSchedule, TaskSnapshot, TaskSpec, ToolToggle,
};
pub use services::{RestoreReport, RunTicket, TaskLifecycle};
pub use storage::Storage;

use engine::{ClockHandle, TriggerEngine, WorkerPool};
use parking_lot::Mutex;
use runtime::{AgentBackend, ExecutionOrchestrator};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Fully wired engine.
pub struct AppCore {
    pub storage: Storage,
    pool: Arc<WorkerPool>,
    triggers: Arc<TriggerEngine>,
    lifecycle: Arc<TaskLifecycle>,
    clock: Mutex<Option<ClockHandle>>,
}

impl AppCore {
    /// Open the database named by `config` and build the configured backend.
    pub fn open(config: &SkybitConfig) -> Result<Self> {
        let db_path = config.database_path()?;
        if let Some(parent) = db_path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                EngineError::Config(format!("failed to create {}: {e}", parent.display()))
            })?;
        }
        Self::with_backend(&db_path, config.build_backend()?, config.engine_options())
    }

    /// Wire the engine around an explicit backend.
    pub fn with_backend(
        db_path: &Path,
        backend: Arc<dyn AgentBackend>,
        options: EngineOptions,
    ) -> Result<Self> {
        let storage = Storage::open(db_path)?;
        let pool = Arc::new(WorkerPool::new(options.worker_pool));
        let triggers = Arc::new(TriggerEngine::new(
            storage.triggers.clone(),
            pool.clone(),
            options.trigger,
        ));
        let orchestrator = Arc::new(ExecutionOrchestrator::new(
            storage.tasks.clone(),
            backend,
            options.execution,
        ));
        let lifecycle = Arc::new(TaskLifecycle::new(
            storage.tasks.clone(),
            triggers.clone(),
            orchestrator,
            pool.clone(),
        ));

        Ok(Self {
            storage,
            pool,
            triggers,
            lifecycle,
            clock: Mutex::new(None),
        })
    }

    pub fn lifecycle(&self) -> &Arc<TaskLifecycle> {
        &self.lifecycle
    }

    pub fn triggers(&self) -> &Arc<TriggerEngine> {
        &self.triggers
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    /// Start workers, rebuild triggers from the store and start the clock.
    /// Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<RestoreReport> {
        self.pool.start();
        let report = self.lifecycle.restore()?;

        let mut clock = self.clock.lock();
        if clock.is_none() {
            *clock = Some(self.triggers.start());
        }
        info!(
            workers = self.pool.capacity(),
            triggers = report.restored,
            "Engine started"
        );
        Ok(report)
    }

    /// Stop the clock, then wait for queued and in-flight runs so their
    /// outcomes are persisted.
    pub async fn shutdown(&self) {
        let clock = self.clock.lock().take();
        if let Some(clock) = clock {
            clock.stop().await;
        }
        self.pool.shutdown().await;
        info!("Engine stopped");
    }
}
