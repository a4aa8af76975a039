pub mod outcome;
pub mod schedule;
pub mod task;
pub mod trigger;

pub use outcome::{ExecutionOutcome, LastRun, StepRecord, ToolInvocation};
pub use schedule::{ScheduleKind, TaskSchedule};
pub use task::{
    InstanceKind, ModelProvider, TaskDefinition, TaskPatch, TaskSpec, ToolToggle, derive_task_id,
};
pub use trigger::TriggerRecord;

use serde::{Deserialize, Serialize};

/// A task as read by the control surface: definition, last outcome and the
/// live next fire time (absent while disabled).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskSnapshot {
    #[serde(flatten)]
    pub definition: TaskDefinition,
    pub outcome: ExecutionOutcome,
    pub next_run_at: Option<i64>,
}
