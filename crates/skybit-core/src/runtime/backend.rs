//! Agent-execution backend abstraction.
//!
//! The engine only knows how to ask a backend for a sandboxed context, run an
//! instruction set in it while receiving step events, and stop it again.

use crate::models::{InstanceKind, ModelProvider, TaskDefinition, ToolInvocation};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

/// Failures reported by an agent backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// The backend cannot be used at all (missing or rejected credentials).
    #[error("Agent backend unavailable: {0}")]
    Unavailable(String),

    #[error("Failed to create execution context: {0}")]
    ContextCreation(String),

    #[error("Tool setup failed: {0}")]
    ToolSetup(String),

    #[error("Execution failed: {0}")]
    Execution(String),
}

/// Capability handed to the agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Bash,
    Computer,
    Edit,
}

impl ToolKind {
    fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "bash" => Some(ToolKind::Bash),
            "computer" => Some(ToolKind::Computer),
            "edit" => Some(ToolKind::Edit),
            _ => None,
        }
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ToolKind::Bash => "bash",
            ToolKind::Computer => "computer",
            ToolKind::Edit => "edit",
        };
        f.write_str(name)
    }
}

/// Tool set for a task.
///
/// Ubuntu instances get the enabled toggles that name a known tool, in order
/// and without duplicates, falling back to `computer` when none remain.
/// Browser instances always get exactly `computer`.
pub fn resolve_tools(definition: &TaskDefinition) -> Vec<ToolKind> {
    match definition.instance_type {
        InstanceKind::Browser => vec![ToolKind::Computer],
        InstanceKind::Ubuntu => {
            let mut tools = Vec::new();
            for toggle in definition.tools.iter().filter(|t| t.enabled) {
                match ToolKind::from_name(&toggle.name) {
                    Some(tool) if !tools.contains(&tool) => tools.push(tool),
                    Some(_) => {}
                    None => warn!(
                        task_id = %definition.id,
                        tool = %toggle.name,
                        "Ignoring unknown tool"
                    ),
                }
            }
            if tools.is_empty() {
                tools.push(ToolKind::Computer);
            }
            tools
        }
    }
}

const OPENAI_UBUNTU_PROMPT: &str = "You have access to an Ubuntu virtual machine with a \
desktop, a terminal and common developer tools installed. Work step by step, verify the \
result of every action on screen or in the terminal, and stop once the task is complete.";

const ANTHROPIC_UBUNTU_PROMPT: &str = "You are operating an Ubuntu virtual machine through \
the provided tools. Prefer the terminal for file and package work, use the desktop only \
when a graphical application is required, and check each result before moving on. \
Report the final answer concisely.";

const OPENAI_BROWSER_PROMPT: &str = "You control a Chromium browser through screenshots and \
mouse and keyboard actions. Navigate directly to the pages you need, read them carefully, \
and stop once the task is complete.";

const ANTHROPIC_BROWSER_PROMPT: &str = "You are operating a web browser through the computer \
tool. Take a screenshot before acting, prefer typing URLs over searching, and confirm the \
page state after every action. Report the final answer concisely.";

/// Built-in system prompt for an instance kind and model provider.
pub fn default_system_prompt(kind: InstanceKind, provider: ModelProvider) -> &'static str {
    match (kind, provider) {
        (InstanceKind::Ubuntu, ModelProvider::Openai) => OPENAI_UBUNTU_PROMPT,
        (InstanceKind::Ubuntu, ModelProvider::Anthropic) => ANTHROPIC_UBUNTU_PROMPT,
        (InstanceKind::Browser, ModelProvider::Openai) => OPENAI_BROWSER_PROMPT,
        (InstanceKind::Browser, ModelProvider::Anthropic) => ANTHROPIC_BROWSER_PROMPT,
    }
}

/// Explicit override when present, otherwise the built-in default.
pub fn resolve_system_prompt(definition: &TaskDefinition) -> String {
    match definition.system_prompt.as_deref() {
        Some(prompt) if !prompt.trim().is_empty() => prompt.to_string(),
        _ => default_system_prompt(definition.instance_type, definition.model_provider)
            .to_string(),
    }
}

/// Everything the backend needs for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentRequest {
    pub provider: ModelProvider,
    pub tools: Vec<ToolKind>,
    pub system_prompt: String,
    pub prompt: String,
    pub schema: Option<Value>,
}

impl AgentRequest {
    pub fn for_task(definition: &TaskDefinition) -> Self {
        Self {
            provider: definition.model_provider,
            tools: resolve_tools(definition),
            system_prompt: resolve_system_prompt(definition),
            prompt: definition.prompt.clone(),
            schema: definition.schema.clone(),
        }
    }
}

/// Intermediate step emitted while a run is in progress.
#[derive(Debug, Clone, PartialEq)]
pub struct StepEvent {
    pub text: String,
    pub tool_calls: Option<Vec<ToolInvocation>>,
}

impl StepEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: None,
        }
    }
}

/// Final result of a successful run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentResponse {
    pub text: String,
    /// Raw structured output, decoded by the engine against the task schema.
    pub output: Option<String>,
}

/// A sandboxed execution context owned by the backend.
#[async_trait]
pub trait SandboxContext: Send + Sync {
    fn id(&self) -> &str;

    /// Release the context. Stopping twice is not an error.
    async fn stop(&self) -> Result<(), BackendError>;
}

/// Capability contract of an agent-execution backend.
#[async_trait]
pub trait AgentBackend: Send + Sync {
    /// Start a context sized for `kind`; the backend tears it down on its own
    /// once `timeout` elapses.
    async fn create_context(
        &self,
        kind: InstanceKind,
        timeout: Duration,
    ) -> Result<Box<dyn SandboxContext>, BackendError>;

    /// Run the request in `context`, sending each step on `steps` as it
    /// happens. Steps must be sent in chronological order.
    async fn run(
        &self,
        context: &dyn SandboxContext,
        request: AgentRequest,
        steps: mpsc::Sender<StepEvent>,
    ) -> Result<AgentResponse, BackendError>;
}

/// Backend used when no API key is configured: every run fails with
/// `Unavailable`, everything else keeps working.
#[derive(Debug, Default, Clone)]
pub struct UnconfiguredBackend;

#[async_trait]
impl AgentBackend for UnconfiguredBackend {
    async fn create_context(
        &self,
        _kind: InstanceKind,
        _timeout: Duration,
    ) -> Result<Box<dyn SandboxContext>, BackendError> {
        Err(BackendError::Unavailable(
            "backend API key not configured".to_string(),
        ))
    }

    async fn run(
        &self,
        _context: &dyn SandboxContext,
        _request: AgentRequest,
        _steps: mpsc::Sender<StepEvent>,
    ) -> Result<AgentResponse, BackendError> {
        Err(BackendError::Unavailable(
            "backend API key not configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TaskSpec, ToolToggle};

    fn definition(kind: InstanceKind, tools: Vec<ToolToggle>) -> TaskDefinition {
        let mut spec = TaskSpec::new("tools", "prompt");
        spec.instance_type = kind;
        spec.tools = tools;
        spec.into_definition(0).unwrap()
    }

    #[test]
    fn test_ubuntu_tools_follow_enabled_toggles() {
        let def = definition(
            InstanceKind::Ubuntu,
            vec![
                ToolToggle::new("bash", true),
                ToolToggle::new("computer", false),
                ToolToggle::new("Edit", true),
                ToolToggle::new("bash", true),
                ToolToggle::new("telnet", true),
            ],
        );
        assert_eq!(resolve_tools(&def), vec![ToolKind::Bash, ToolKind::Edit]);
    }

    #[test]
    fn test_ubuntu_defaults_to_computer() {
        let def = definition(InstanceKind::Ubuntu, vec![ToolToggle::new("bash", false)]);
        assert_eq!(resolve_tools(&def), vec![ToolKind::Computer]);

        let def = definition(InstanceKind::Ubuntu, Vec::new());
        assert_eq!(resolve_tools(&def), vec![ToolKind::Computer]);
    }

    #[test]
    fn test_browser_always_gets_computer() {
        let def = definition(
            InstanceKind::Browser,
            vec![ToolToggle::new("bash", true), ToolToggle::new("edit", true)],
        );
        assert_eq!(resolve_tools(&def), vec![ToolKind::Computer]);
    }

    #[test]
    fn test_system_prompt_override_wins() {
        let mut def = definition(InstanceKind::Browser, Vec::new());
        assert_eq!(
            resolve_system_prompt(&def),
            default_system_prompt(InstanceKind::Browser, ModelProvider::Openai)
        );

        def.system_prompt = Some("Only read the page title.".to_string());
        assert_eq!(resolve_system_prompt(&def), "Only read the page title.");
    }

    #[test]
    fn test_default_prompts_differ_per_pair() {
        let ubuntu_openai = default_system_prompt(InstanceKind::Ubuntu, ModelProvider::Openai);
        let ubuntu_anthropic =
            default_system_prompt(InstanceKind::Ubuntu, ModelProvider::Anthropic);
        let browser_openai = default_system_prompt(InstanceKind::Browser, ModelProvider::Openai);
        assert_ne!(ubuntu_openai, ubuntu_anthropic);
        assert_ne!(ubuntu_openai, browser_openai);
    }

    #[tokio::test]
    async fn test_unconfigured_backend_is_unavailable() {
        let backend = UnconfiguredBackend;
        let result = backend
            .create_context(InstanceKind::Ubuntu, Duration::from_secs(3600))
            .await;
        assert!(matches!(result, Err(BackendError::Unavailable(_))));
    }
}
