//! Schedule specifications and fire-time arithmetic.

use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const MINUTE_MS: i64 = 60_000;
const DEFAULT_INTERVAL_MINUTES: u32 = 60;

/// Schedule kind selector used by partial updates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleKind {
    Interval,
    Cron,
}

impl FromStr for ScheduleKind {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "interval" => Ok(ScheduleKind::Interval),
            "cron" => Ok(ScheduleKind::Cron),
            other => Err(EngineError::Validation(format!(
                "unknown schedule type '{other}' (expected interval or cron)"
            ))),
        }
    }
}

/// When a task fires.
///
/// The variant is the schedule kind, so exactly one of the interval length
/// or the cron expression is ever active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TaskSchedule {
    /// Fire every N minutes, counted from the registration anchor.
    Interval { interval_minutes: u32 },
    /// Fire on a standard 5-field cron expression evaluated in UTC.
    Cron { cron_expression: String },
}

impl Default for TaskSchedule {
    fn default() -> Self {
        TaskSchedule::Interval {
            interval_minutes: DEFAULT_INTERVAL_MINUTES,
        }
    }
}

impl fmt::Display for TaskSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskSchedule::Interval { interval_minutes } => write!(f, "every {interval_minutes}m"),
            TaskSchedule::Cron { cron_expression } => write!(f, "cron '{cron_expression}'"),
        }
    }
}

impl TaskSchedule {
    pub fn interval(minutes: u32) -> Self {
        TaskSchedule::Interval {
            interval_minutes: minutes,
        }
    }

    pub fn cron(expression: impl Into<String>) -> Self {
        TaskSchedule::Cron {
            cron_expression: expression.into(),
        }
    }

    pub fn kind(&self) -> ScheduleKind {
        match self {
            TaskSchedule::Interval { .. } => ScheduleKind::Interval,
            TaskSchedule::Cron { .. } => ScheduleKind::Cron,
        }
    }

    /// Build a schedule from a kind plus optional parameters, reusing the
    /// parameters of `current` when the kind is unchanged and the caller did
    /// not supply new ones.
    pub fn merge(
        current: &TaskSchedule,
        kind: Option<ScheduleKind>,
        interval_minutes: Option<u32>,
        cron_expression: Option<String>,
    ) -> Result<TaskSchedule> {
        let kind = kind.unwrap_or_else(|| current.kind());
        let schedule = match kind {
            ScheduleKind::Interval => {
                let minutes = interval_minutes
                    .or(match current {
                        TaskSchedule::Interval { interval_minutes } => Some(*interval_minutes),
                        TaskSchedule::Cron { .. } => None,
                    })
                    .unwrap_or(DEFAULT_INTERVAL_MINUTES);
                TaskSchedule::interval(minutes)
            }
            ScheduleKind::Cron => {
                let expression = cron_expression
                    .or(match current {
                        TaskSchedule::Cron { cron_expression } => Some(cron_expression.clone()),
                        TaskSchedule::Interval { .. } => None,
                    })
                    .ok_or_else(|| {
                        EngineError::Validation(
                            "cron schedule requires a cron_expression".to_string(),
                        )
                    })?;
                TaskSchedule::cron(expression)
            }
        };
        schedule.validate()?;
        Ok(schedule)
    }

    /// Reject schedules that can never produce a fire time.
    pub fn validate(&self) -> Result<()> {
        match self {
            TaskSchedule::Interval { interval_minutes } => {
                if *interval_minutes == 0 {
                    return Err(EngineError::Validation(
                        "interval_minutes must be at least 1".to_string(),
                    ));
                }
                Ok(())
            }
            TaskSchedule::Cron { cron_expression } => {
                parse_cron(cron_expression)?;
                Ok(())
            }
        }
    }

    /// First fire time strictly after `from_time` (milliseconds since epoch).
    ///
    /// Interval schedules count whole intervals from `anchor`; fire times that
    /// were missed collapse into the next one. Returns `None` when the
    /// schedule is invalid or has no future fire time.
    pub fn next_fire_after(&self, anchor: i64, from_time: i64) -> Option<i64> {
        match self {
            TaskSchedule::Interval { interval_minutes } => {
                let interval_ms = i64::from(*interval_minutes).checked_mul(MINUTE_MS)?;
                if interval_ms <= 0 {
                    return None;
                }
                if anchor > from_time {
                    return Some(anchor);
                }
                // Saturating arithmetic keeps very old anchors from overflowing.
                let elapsed = from_time - anchor;
                let intervals_passed = elapsed / interval_ms;
                let offset = intervals_passed.saturating_add(1).saturating_mul(interval_ms);
                let next = anchor.saturating_add(offset);
                if next <= from_time { None } else { Some(next) }
            }
            TaskSchedule::Cron { cron_expression } => {
                let schedule = parse_cron(cron_expression).ok()?;
                let from = DateTime::<Utc>::from_timestamp_millis(from_time)?;
                let next = schedule.after(&from).next()?;
                Some(next.timestamp_millis())
            }
        }
    }
}

const WEEKDAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Parse a standard 5-field cron expression (minute hour day month weekday).
fn parse_cron(expression: &str) -> Result<Schedule> {
    let normalized = expression.trim();
    let fields: Vec<&str> = normalized.split_whitespace().collect();
    let [minute, hour, day, month, weekday] = fields.as_slice() else {
        return Err(EngineError::Validation(format!(
            "invalid cron expression '{normalized}': expected 5 fields, got {}",
            fields.len()
        )));
    };
    let weekday = weekdays_by_name(weekday).map_err(|e| {
        EngineError::Validation(format!("invalid cron expression '{normalized}': {e}"))
    })?;

    // The cron crate wants a leading seconds field.
    Schedule::from_str(&format!("0 {minute} {hour} {day} {month} {weekday}")).map_err(|e| {
        EngineError::Validation(format!("invalid cron expression '{normalized}': {e}"))
    })
}

/// Rewrite a day-of-week field from standard numbering (0-6 from Sunday, 7
/// also Sunday) into weekday names. The cron crate counts 1-7 from Sunday,
/// so numbers cannot be passed through as they are.
fn weekdays_by_name(field: &str) -> std::result::Result<String, String> {
    let mut days = [false; 7];
    for item in field.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|step| *step > 0)
                    .ok_or_else(|| format!("invalid day-of-week step '{step}'"))?;
                (base, Some(step))
            }
            None => (item, None),
        };
        let (first, last) = if base == "*" {
            (0, 7)
        } else if let Some((first, last)) = base.split_once('-') {
            let (first, last) = (weekday_number(first)?, weekday_number(last)?);
            if first > last {
                return Err(format!("day-of-week range '{base}' runs backwards"));
            }
            (first, last)
        } else {
            let first = weekday_number(base)?;
            // `n/step` runs from n to the end of the week.
            (first, if step.is_some() { 7 } else { first })
        };
        for day in (first..=last).step_by(step.unwrap_or(1)) {
            days[day % 7] = true;
        }
    }

    if days.iter().all(|on| *on) {
        return Ok("*".to_string());
    }
    let names: Vec<&str> = WEEKDAY_NAMES
        .iter()
        .zip(days)
        .filter_map(|(name, on)| on.then_some(*name))
        .collect();
    Ok(names.join(","))
}

fn weekday_number(token: &str) -> std::result::Result<usize, String> {
    if let Ok(number) = token.parse::<usize>() {
        return if number <= 7 {
            Ok(number)
        } else {
            Err(format!("day of week {number} is outside 0-7"))
        };
    }
    WEEKDAY_NAMES
        .iter()
        .position(|name| name.eq_ignore_ascii_case(token))
        .ok_or_else(|| format!("unknown day of week '{token}'"))
}
