//! Task execution: backend abstraction, execution slots and the orchestrator.

pub mod backend;
pub mod http_backend;
pub mod orchestrator;
pub mod slots;
#[cfg(any(test, feature = "test-utils"))]
pub mod testkit;

pub use backend::{
    AgentBackend, AgentRequest, AgentResponse, BackendError, SandboxContext, StepEvent, ToolKind,
    UnconfiguredBackend, default_system_prompt, resolve_system_prompt, resolve_tools,
};
pub use http_backend::HttpAgentBackend;
pub use orchestrator::{ExecutionConfig, ExecutionOrchestrator};
pub use slots::{ExecutionSlots, SlotGuard};
