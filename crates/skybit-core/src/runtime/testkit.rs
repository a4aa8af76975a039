//! Test helpers: a scripted agent backend and throwaway storage.

use super::backend::{AgentBackend, AgentRequest, AgentResponse, BackendError, SandboxContext, StepEvent};
use crate::models::InstanceKind;
use crate::storage::Storage;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Deterministic backend for tests.
///
/// Sends the scripted steps in order, optionally sleeps, then returns the
/// scripted result or error. Counts contexts and tracks peak concurrency.
#[derive(Default)]
pub struct MockBackend {
    steps: Vec<String>,
    result_text: String,
    output: Option<String>,
    delay: Duration,
    run_error: Option<BackendError>,
    context_error: Option<BackendError>,
    panic_in_run: bool,
    fail_stop: bool,
    contexts_created: AtomicUsize,
    contexts_stopped: Arc<AtomicUsize>,
    runs_started: AtomicUsize,
    current_runs: AtomicUsize,
    peak_runs: AtomicUsize,
    requests: Mutex<Vec<AgentRequest>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            result_text: "done".to_string(),
            ..Default::default()
        }
    }

    pub fn with_steps(mut self, steps: Vec<&str>) -> Self {
        self.steps = steps.into_iter().map(str::to_string).collect();
        self
    }

    pub fn with_result(mut self, text: &str) -> Self {
        self.result_text = text.to_string();
        self
    }

    pub fn with_output(mut self, raw: &str) -> Self {
        self.output = Some(raw.to_string());
        self
    }

    /// Time each run spends after sending its steps.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn failing_with(mut self, error: BackendError) -> Self {
        self.run_error = Some(error);
        self
    }

    pub fn failing_context_with(mut self, error: BackendError) -> Self {
        self.context_error = Some(error);
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_in_run = true;
        self
    }

    pub fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }

    pub fn contexts_created(&self) -> usize {
        self.contexts_created.load(Ordering::SeqCst)
    }

    pub fn contexts_stopped(&self) -> usize {
        self.contexts_stopped.load(Ordering::SeqCst)
    }

    pub fn runs_started(&self) -> usize {
        self.runs_started.load(Ordering::SeqCst)
    }

    /// Highest number of runs that were in progress at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_runs.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<AgentRequest> {
        self.requests.lock().clone()
    }
}

struct MockContext {
    id: String,
    stopped: Arc<AtomicUsize>,
    fail_stop: bool,
}

#[async_trait]
impl SandboxContext for MockContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stop(&self) -> Result<(), BackendError> {
        self.stopped.fetch_add(1, Ordering::SeqCst);
        if self.fail_stop {
            return Err(BackendError::Execution("instance already gone".to_string()));
        }
        Ok(())
    }
}

/// Decrements the in-progress gauge even when the run panics.
struct RunGauge<'a>(&'a AtomicUsize);

impl Drop for RunGauge<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl AgentBackend for MockBackend {
    async fn create_context(
        &self,
        kind: InstanceKind,
        _timeout: Duration,
    ) -> Result<Box<dyn SandboxContext>, BackendError> {
        if let Some(err) = &self.context_error {
            return Err(err.clone());
        }
        let n = self.contexts_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockContext {
            id: format!("mock-{kind}-{n}"),
            stopped: self.contexts_stopped.clone(),
            fail_stop: self.fail_stop,
        }))
    }

    async fn run(
        &self,
        _context: &dyn SandboxContext,
        request: AgentRequest,
        steps: mpsc::Sender<StepEvent>,
    ) -> Result<AgentResponse, BackendError> {
        self.runs_started.fetch_add(1, Ordering::SeqCst);
        let now = self.current_runs.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_runs.fetch_max(now, Ordering::SeqCst);
        let _gauge = RunGauge(&self.current_runs);
        self.requests.lock().push(request);

        for text in &self.steps {
            if steps.send(StepEvent::text(text.clone())).await.is_err() {
                break;
            }
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.panic_in_run {
            panic!("mock backend panic");
        }
        if let Some(err) = &self.run_error {
            return Err(err.clone());
        }

        Ok(AgentResponse {
            text: self.result_text.clone(),
            output: self.output.clone(),
        })
    }
}

/// Storage backed by a database file in a fresh temporary directory. Keep
/// the returned directory alive for as long as the storage is used.
pub fn create_test_storage() -> (Storage, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join("skybit-test.db");
    let storage = Storage::open(&db_path).unwrap();
    (storage, temp_dir)
}
