//! Task definitions and their create/update payloads.

use super::schedule::{ScheduleKind, TaskSchedule};
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Sandboxed environment a task runs in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum InstanceKind {
    #[default]
    Ubuntu,
    Browser,
}

impl InstanceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceKind::Ubuntu => "ubuntu",
            InstanceKind::Browser => "browser",
        }
    }
}

impl fmt::Display for InstanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceKind {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "ubuntu" => Ok(InstanceKind::Ubuntu),
            "browser" => Ok(InstanceKind::Browser),
            other => Err(EngineError::Validation(format!(
                "unknown instance type '{other}' (expected ubuntu or browser)"
            ))),
        }
    }
}

/// Model provider the agent backend should drive.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ModelProvider {
    #[default]
    Openai,
    Anthropic,
}

impl ModelProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelProvider::Openai => "openai",
            ModelProvider::Anthropic => "anthropic",
        }
    }
}

impl fmt::Display for ModelProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelProvider {
    type Err = EngineError;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "openai" => Ok(ModelProvider::Openai),
            "anthropic" => Ok(ModelProvider::Anthropic),
            other => Err(EngineError::Validation(format!(
                "unknown model provider '{other}' (expected openai or anthropic)"
            ))),
        }
    }
}

fn default_true() -> bool {
    true
}

/// Tool name plus enabled flag, kept in the order the operator gave them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolToggle {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl ToolToggle {
    pub fn new(name: impl Into<String>, enabled: bool) -> Self {
        Self {
            name: name.into(),
            enabled,
        }
    }
}

/// Derive the stable task ID from a human name: lower-cased, spaces become
/// underscores.
pub fn derive_task_id(name: &str) -> Result<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(
            "task name must not be empty".to_string(),
        ));
    }
    Ok(trimmed.to_lowercase().replace(' ', "_"))
}

/// A named, schedulable unit of agent automation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    pub instance_type: InstanceKind,
    pub model_provider: ModelProvider,
    /// Explicit system prompt; when absent the backend default for the
    /// instance kind and provider is used.
    #[serde(default)]
    pub system_prompt: Option<String>,
    pub schedule: TaskSchedule,
    #[serde(default)]
    pub tools: Vec<ToolToggle>,
    pub enabled: bool,
    /// Output schema descriptor handed to the backend as-is.
    #[serde(default)]
    pub schema: Option<Value>,
    /// Milliseconds since epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

/// Payload for creating a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub instance_type: InstanceKind,
    #[serde(default)]
    pub model_provider: ModelProvider,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub schedule: TaskSchedule,
    #[serde(default)]
    pub tools: Vec<ToolToggle>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub schema: Option<Value>,
}

impl TaskSpec {
    /// Minimal spec with the defaults used by the control surface: ubuntu,
    /// openai, every 60 minutes, enabled.
    pub fn new(name: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            prompt: prompt.into(),
            instance_type: InstanceKind::default(),
            model_provider: ModelProvider::default(),
            system_prompt: None,
            schedule: TaskSchedule::default(),
            tools: Vec::new(),
            enabled: true,
            schema: None,
        }
    }

    pub fn with_schedule(mut self, schedule: TaskSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validate and turn the payload into a definition stamped with `now`.
    pub fn into_definition(self, now: i64) -> Result<TaskDefinition> {
        let id = derive_task_id(&self.name)?;
        self.schedule.validate()?;
        Ok(TaskDefinition {
            id,
            name: self.name.trim().to_string(),
            description: self.description,
            prompt: self.prompt,
            instance_type: self.instance_type,
            model_provider: self.model_provider,
            system_prompt: normalize_system_prompt(self.system_prompt),
            schedule: self.schedule,
            tools: self.tools,
            enabled: self.enabled,
            schema: self.schema,
            created_at: now,
            updated_at: now,
        })
    }
}

/// Partial update. Only fields that are present are applied.
///
/// `system_prompt` and `schema` use a nested option so an update can clear
/// them: `Some(None)` removes the value, `None` leaves it alone.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub instance_type: Option<InstanceKind>,
    #[serde(default)]
    pub model_provider: Option<ModelProvider>,
    #[serde(default)]
    pub system_prompt: Option<Option<String>>,
    #[serde(default)]
    pub schedule_type: Option<ScheduleKind>,
    #[serde(default)]
    pub interval_minutes: Option<u32>,
    #[serde(default)]
    pub cron_expression: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<ToolToggle>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub schema: Option<Option<Value>>,
}

impl TaskPatch {
    pub fn with_schedule(mut self, schedule: TaskSchedule) -> Self {
        match schedule {
            TaskSchedule::Interval { interval_minutes } => {
                self.schedule_type = Some(ScheduleKind::Interval);
                self.interval_minutes = Some(interval_minutes);
            }
            TaskSchedule::Cron { cron_expression } => {
                self.schedule_type = Some(ScheduleKind::Cron);
                self.cron_expression = Some(cron_expression);
            }
        }
        self
    }

    pub fn touches_schedule(&self) -> bool {
        self.schedule_type.is_some()
            || self.interval_minutes.is_some()
            || self.cron_expression.is_some()
    }

    /// Merge into a copy of `current`. The task ID and creation time never
    /// change; a renamed task keeps its original ID.
    pub fn apply(self, current: &TaskDefinition, now: i64) -> Result<TaskDefinition> {
        let touches_schedule = self.touches_schedule();
        let mut next = current.clone();

        if let Some(name) = self.name {
            if name.trim().is_empty() {
                return Err(EngineError::Validation(
                    "task name must not be empty".to_string(),
                ));
            }
            next.name = name.trim().to_string();
        }
        if let Some(description) = self.description {
            next.description = description;
        }
        if let Some(prompt) = self.prompt {
            next.prompt = prompt;
        }
        if let Some(kind) = self.instance_type {
            next.instance_type = kind;
        }
        if let Some(provider) = self.model_provider {
            next.model_provider = provider;
        }
        if let Some(system_prompt) = self.system_prompt {
            next.system_prompt = normalize_system_prompt(system_prompt);
        }
        if touches_schedule {
            next.schedule = TaskSchedule::merge(
                &current.schedule,
                self.schedule_type,
                self.interval_minutes,
                self.cron_expression,
            )?;
        }
        if let Some(tools) = self.tools {
            next.tools = tools;
        }
        if let Some(enabled) = self.enabled {
            next.enabled = enabled;
        }
        if let Some(schema) = self.schema {
            next.schema = schema;
        }

        next.updated_at = now;
        Ok(next)
    }
}

fn normalize_system_prompt(value: Option<String>) -> Option<String> {
    value.filter(|prompt| !prompt.trim().is_empty())
}
