//! Execution outcome and step trace of a task's most recent run.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A tool call the agent made during one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInvocation {
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
}

/// One intermediate step reported by the backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub text: String,
    /// Milliseconds since epoch.
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolInvocation>>,
}

/// Final record of the last finished run. Success and error are mutually
/// exclusive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LastRun {
    Success {
        timestamp: i64,
        text: String,
        /// Structured output when the task carries a schema. Falls back to
        /// the raw string when the backend output could not be decoded.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output: Option<Value>,
    },
    Error {
        timestamp: i64,
        message: String,
    },
}

impl LastRun {
    pub fn timestamp(&self) -> i64 {
        match self {
            LastRun::Success { timestamp, .. } | LastRun::Error { timestamp, .. } => *timestamp,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, LastRun::Success { .. })
    }
}

/// Persisted execution state attached to a task.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionOutcome {
    /// Run the step trace belongs to; set when a run starts.
    #[serde(default)]
    pub run_id: Option<String>,
    #[serde(default)]
    pub last_run_at: Option<i64>,
    #[serde(default)]
    pub last: Option<LastRun>,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    #[serde(default)]
    pub success_count: u64,
    #[serde(default)]
    pub failure_count: u64,
}

impl ExecutionOutcome {
    /// Start a new run: the step trace is reset, the previous result stays
    /// until the run finishes.
    pub fn begin_run(&mut self, run_id: &str, started_at: i64) {
        self.run_id = Some(run_id.to_string());
        self.last_run_at = Some(started_at);
        self.steps.clear();
    }

    pub fn push_step(&mut self, step: StepRecord) {
        self.steps.push(step);
    }

    pub fn finish(&mut self, result: LastRun) {
        if result.is_success() {
            self.success_count += 1;
        } else {
            self.failure_count += 1;
        }
        self.last = Some(result);
    }

    /// Belongs to the given run (a newer run may have replaced the trace).
    pub fn is_run(&self, run_id: &str) -> bool {
        self.run_id.as_deref() == Some(run_id)
    }
}
