//! Execution orchestrator: runs one task against the agent backend and
//! records what happened.

use super::backend::{AgentBackend, AgentRequest, AgentResponse, BackendError, StepEvent};
use super::slots::{ExecutionSlots, SlotGuard};
use crate::error::{EngineError, Result};
use crate::models::{ExecutionOutcome, LastRun, StepRecord, TaskDefinition};
use crate::storage::TaskStore;
use futures::FutureExt;
use serde_json::Value;
use skybit_storage::time_utils::now_ms;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

const STEP_LOG_PREVIEW_CHARS: usize = 100;

/// Execution configuration.
#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Capacity of the step-event channel between backend and recorder.
    pub step_buffer: usize,
    /// Hard lifetime requested for each sandbox.
    pub sandbox_timeout: Duration,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            step_buffer: 64,
            sandbox_timeout: Duration::from_secs(3600),
        }
    }
}

pub struct ExecutionOrchestrator {
    tasks: TaskStore,
    backend: Arc<dyn AgentBackend>,
    slots: Arc<ExecutionSlots>,
    config: ExecutionConfig,
}

impl ExecutionOrchestrator {
    pub fn new(tasks: TaskStore, backend: Arc<dyn AgentBackend>, config: ExecutionConfig) -> Self {
        Self {
            tasks,
            backend,
            slots: ExecutionSlots::new(),
            config,
        }
    }

    pub fn slots(&self) -> &Arc<ExecutionSlots> {
        &self.slots
    }

    pub fn is_running(&self, task_id: &str) -> bool {
        self.slots.is_held(task_id)
    }

    /// Check the task exists and take its execution slot.
    ///
    /// Fails with `NotFound` for an unknown task and `AlreadyRunning` when a
    /// run for the same task is in progress.
    pub fn try_acquire(&self, task_id: &str) -> Result<SlotGuard> {
        if !self.tasks.exists(task_id)? {
            return Err(EngineError::NotFound(task_id.to_string()));
        }
        self.slots
            .try_acquire(task_id)
            .ok_or_else(|| EngineError::AlreadyRunning(task_id.to_string()))
    }

    /// Run `task_id` to completion and return the recorded outcome.
    pub async fn execute(&self, task_id: &str) -> Result<ExecutionOutcome> {
        let slot = self.try_acquire(task_id)?;
        self.execute_with_slot(slot).await
    }

    /// Run the task whose slot is already held. The slot is released when
    /// this returns, whatever the result.
    pub async fn execute_with_slot(&self, slot: SlotGuard) -> Result<ExecutionOutcome> {
        let task_id = slot.task_id().to_string();
        let definition = self.tasks.get_definition(&task_id)?;
        let run_id = Uuid::new_v4().to_string();
        self.tasks.begin_run(&task_id, &run_id, now_ms())?;
        info!(task_id = %task_id, run_id = %run_id, "Run started");

        let result = self.run_backend(&definition, &run_id).await;

        let last = match result {
            Ok(response) => {
                info!(task_id = %task_id, run_id = %run_id, "Run succeeded");
                LastRun::Success {
                    timestamp: now_ms(),
                    output: decode_output(definition.schema.as_ref(), response.output),
                    text: response.text,
                }
            }
            Err(err) => {
                error!(task_id = %task_id, run_id = %run_id, error = %err, "Run failed");
                LastRun::Error {
                    timestamp: now_ms(),
                    message: err.to_string(),
                }
            }
        };

        let recorded = self
            .tasks
            .record_outcome(&task_id, &run_id, last)
            .inspect_err(|err| {
                error!(task_id = %task_id, run_id = %run_id, error = %err, "Failed to persist outcome");
            })?;
        drop(slot);

        match recorded {
            Some(outcome) => Ok(outcome),
            None => {
                warn!(
                    task_id = %task_id,
                    run_id = %run_id,
                    "Task removed during run, outcome discarded"
                );
                Err(EngineError::NotFound(task_id))
            }
        }
    }

    /// Create the context, run the agent while recording steps, and always
    /// stop the context afterwards.
    async fn run_backend(
        &self,
        definition: &TaskDefinition,
        run_id: &str,
    ) -> std::result::Result<AgentResponse, BackendError> {
        let context = guarded(
            self.backend
                .create_context(definition.instance_type, self.config.sandbox_timeout),
        )
        .await??;
        debug!(task_id = %definition.id, context_id = %context.id(), "Execution context created");

        let request = AgentRequest::for_task(definition);
        let (step_tx, step_rx) = mpsc::channel(self.config.step_buffer.max(1));
        let run = guarded(self.backend.run(context.as_ref(), request, step_tx));
        let record = self.record_steps(&definition.id, run_id, step_rx);
        let (result, step_count) = tokio::join!(run, record);
        debug!(task_id = %definition.id, steps = step_count, "Step stream closed");

        if let Err(err) = context.stop().await {
            warn!(
                task_id = %definition.id,
                context_id = %context.id(),
                error = %err,
                "Failed to stop execution context"
            );
        }

        result?
    }

    async fn record_steps(
        &self,
        task_id: &str,
        run_id: &str,
        mut step_rx: mpsc::Receiver<StepEvent>,
    ) -> usize {
        let mut recorded = 0;
        while let Some(event) = step_rx.recv().await {
            info!(
                task_id = %task_id,
                run_id = %run_id,
                step = %preview(&event.text),
                "Step"
            );
            let step = StepRecord {
                text: event.text,
                timestamp: now_ms(),
                tool_calls: event.tool_calls,
            };
            match self.tasks.append_step(task_id, run_id, step) {
                Ok(true) => recorded += 1,
                Ok(false) => debug!(task_id = %task_id, run_id = %run_id, "Step dropped"),
                Err(err) => {
                    error!(task_id = %task_id, run_id = %run_id, error = %err, "Failed to record step")
                }
            }
        }
        recorded
    }
}

/// Turn a backend panic into an execution error so cleanup still runs.
async fn guarded<T, F>(future: F) -> std::result::Result<std::result::Result<T, BackendError>, BackendError>
where
    F: Future<Output = std::result::Result<T, BackendError>>,
{
    AssertUnwindSafe(future)
        .catch_unwind()
        .await
        .map_err(|_| BackendError::Execution("agent backend panicked".to_string()))
}

/// Decode structured output when the task has a schema. Output that is not
/// valid JSON is kept as a plain string.
fn decode_output(schema: Option<&Value>, raw: Option<String>) -> Option<Value> {
    schema?;
    let raw = raw?;
    Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))
}

fn preview(text: &str) -> String {
    if text.chars().count() <= STEP_LOG_PREVIEW_CHARS {
        return text.to_string();
    }
    let mut preview: String = text.chars().take(STEP_LOG_PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskSchedule, TaskSpec};
    use crate::runtime::testkit::{MockBackend, create_test_storage};
    use serde_json::json;

    fn orchestrator(backend: Arc<MockBackend>) -> (ExecutionOrchestrator, TaskStore, tempfile::TempDir) {
        let (storage, temp_dir) = create_test_storage();
        let orchestrator = ExecutionOrchestrator::new(
            storage.tasks.clone(),
            backend,
            ExecutionConfig::default(),
        );
        (orchestrator, storage.tasks, temp_dir)
    }

    fn insert(tasks: &TaskStore, name: &str) -> String {
        let def = TaskSpec::new(name, "do the thing")
            .with_schedule(TaskSchedule::interval(60))
            .into_definition(now_ms())
            .unwrap();
        tasks.insert_new(&def).unwrap();
        def.id
    }

    #[tokio::test]
    async fn test_success_records_steps_and_result() {
        let backend = Arc::new(
            MockBackend::new()
                .with_steps(vec!["open terminal", "run report"])
                .with_result("report ready"),
        );
        let (orchestrator, tasks, _temp_dir) = orchestrator(backend.clone());
        let id = insert(&tasks, "daily report");

        let outcome = orchestrator.execute(&id).await.unwrap();
        assert_eq!(outcome.steps.len(), 2);
        assert_eq!(outcome.steps[0].text, "open terminal");
        assert_eq!(outcome.steps[1].text, "run report");
        assert!(matches!(
            outcome.last,
            Some(LastRun::Success { ref text, .. }) if text == "report ready"
        ));
        assert_eq!(outcome.success_count, 1);
        assert_eq!(backend.contexts_created(), 1);
        assert_eq!(backend.contexts_stopped(), 1);
        assert!(!orchestrator.is_running(&id));
        assert_eq!(tasks.get(&id).unwrap().outcome, outcome);
    }

    #[tokio::test]
    async fn test_failure_keeps_partial_steps() {
        let backend = Arc::new(
            MockBackend::new()
                .with_steps(vec!["step one"])
                .failing_with(BackendError::Execution("model refused".to_string())),
        );
        let (orchestrator, tasks, _temp_dir) = orchestrator(backend.clone());
        let id = insert(&tasks, "flaky");

        let outcome = orchestrator.execute(&id).await.unwrap();
        assert_eq!(outcome.steps.len(), 1);
        assert!(matches!(
            outcome.last,
            Some(LastRun::Error { ref message, .. }) if message.contains("model refused")
        ));
        assert_eq!(outcome.failure_count, 1);
        assert_eq!(backend.contexts_stopped(), 1);
    }

    #[tokio::test]
    async fn test_context_creation_failure_is_recorded() {
        let backend = Arc::new(MockBackend::new().failing_context_with(
            BackendError::Unavailable("backend API key not configured".to_string()),
        ));
        let (orchestrator, tasks, _temp_dir) = orchestrator(backend.clone());
        let id = insert(&tasks, "no key");

        let outcome = orchestrator.execute(&id).await.unwrap();
        assert!(matches!(
            outcome.last,
            Some(LastRun::Error { ref message, .. }) if message.contains("not configured")
        ));
        assert!(outcome.steps.is_empty());
        assert_eq!(backend.contexts_stopped(), 0);
    }

    #[tokio::test]
    async fn test_panicking_backend_still_cleans_up() {
        let backend = Arc::new(MockBackend::new().with_steps(vec!["before"]).panicking());
        let (orchestrator, tasks, _temp_dir) = orchestrator(backend.clone());
        let id = insert(&tasks, "panics");

        let outcome = orchestrator.execute(&id).await.unwrap();
        assert!(matches!(
            outcome.last,
            Some(LastRun::Error { ref message, .. }) if message.contains("panicked")
        ));
        assert_eq!(backend.contexts_stopped(), 1);
        assert!(!orchestrator.is_running(&id));
    }

    #[tokio::test]
    async fn test_stop_failure_is_not_escalated() {
        let backend = Arc::new(MockBackend::new().with_result("ok").failing_stop());
        let (orchestrator, tasks, _temp_dir) = orchestrator(backend);
        let id = insert(&tasks, "sticky");

        let outcome = orchestrator.execute(&id).await.unwrap();
        assert!(outcome.last.unwrap().is_success());
    }

    #[tokio::test]
    async fn test_unknown_task_is_not_found() {
        let (orchestrator, _tasks, _temp_dir) = orchestrator(Arc::new(MockBackend::new()));
        let err = orchestrator.execute("missing").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_second_run_is_rejected_while_running() {
        let (orchestrator, tasks, _temp_dir) = orchestrator(Arc::new(MockBackend::new()));
        let id = insert(&tasks, "busy");

        let _slot = orchestrator.try_acquire(&id).unwrap();
        let err = orchestrator.execute(&id).await.unwrap_err();
        assert!(matches!(err, EngineError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn test_schema_output_decoding() {
        let backend = Arc::new(
            MockBackend::new()
                .with_result("done")
                .with_output(r#"{"headlines": 3}"#),
        );
        let (orchestrator, tasks, _temp_dir) = orchestrator(backend);
        let mut def = TaskSpec::new("structured", "p").into_definition(0).unwrap();
        def.schema = Some(json!({"type": "object"}));
        tasks.insert_new(&def).unwrap();

        let outcome = orchestrator.execute("structured").await.unwrap();
        match outcome.last.unwrap() {
            LastRun::Success { output, .. } => assert_eq!(output, Some(json!({"headlines": 3}))),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn test_decode_output_degrades_to_string() {
        let schema = json!({"type": "object"});
        assert_eq!(
            decode_output(Some(&schema), Some("not json".to_string())),
            Some(Value::String("not json".to_string()))
        );
        assert_eq!(decode_output(None, Some("{}".to_string())), None);
        assert_eq!(decode_output(Some(&schema), None), None);
    }

    #[test]
    fn test_preview_truncates_long_text() {
        let long = "x".repeat(250);
        let short = preview(&long);
        assert_eq!(short.chars().count(), STEP_LOG_PREVIEW_CHARS + 3);
        assert_eq!(preview("short"), "short");
    }
}
