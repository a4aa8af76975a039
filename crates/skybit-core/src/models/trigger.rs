use super::schedule::TaskSchedule;
use serde::{Deserialize, Serialize};

/// Trigger state persisted so schedules survive a restart.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TriggerRecord {
    pub task_id: String,
    pub schedule: TaskSchedule,
    /// Interval phase origin (milliseconds since epoch). Unused by cron.
    pub anchor_at: i64,
    /// Last computed fire time, informational only.
    #[serde(default)]
    pub next_fire_at: Option<i64>,
    pub registered_at: i64,
}
