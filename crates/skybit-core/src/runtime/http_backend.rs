//! Agent backend speaking the Skybit sandbox HTTP API.
//!
//! Instances are created and stopped with plain JSON calls. A run streams
//! newline-delimited JSON events: any number of `step` events followed by a
//! single `result` or `error` event.

use super::backend::{
    AgentBackend, AgentRequest, AgentResponse, BackendError, SandboxContext, StepEvent, ToolKind,
};
use crate::models::{InstanceKind, ToolInvocation};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

#[derive(Serialize)]
struct CreateInstanceRequest {
    #[serde(rename = "type")]
    kind: InstanceKind,
    timeout_hours: u64,
}

#[derive(Deserialize)]
struct CreateInstanceResponse {
    id: String,
}

#[derive(Serialize)]
struct ActRequest<'a> {
    provider: &'a str,
    tools: &'a [ToolKind],
    system: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    schema: Option<&'a Value>,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum ActEvent {
    Step {
        #[serde(default)]
        text: String,
        #[serde(default)]
        tool_calls: Option<Vec<ToolInvocation>>,
    },
    Result {
        #[serde(default)]
        text: String,
        #[serde(default)]
        output: Option<Value>,
    },
    Error {
        message: String,
    },
}

/// HTTP agent backend.
pub struct HttpAgentBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl HttpAgentBackend {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Unavailable(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<Response, BackendError> {
        self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| BackendError::Execution(format!("request to {url} failed: {e}")))
    }
}

/// Map a non-success status to a backend error built by `other`.
async fn check_status(
    response: Response,
    other: fn(String) -> BackendError,
) -> Result<Response, BackendError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let message = format!("HTTP {status}: {}", body.trim());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(BackendError::Unavailable(message)),
        _ => Err(other(message)),
    }
}

fn act_error(message: String) -> BackendError {
    BackendError::Execution(message)
}

struct HttpContext {
    id: String,
    client: Client,
    api_key: String,
    stop_url: String,
    stopped: AtomicBool,
}

#[async_trait]
impl SandboxContext for HttpContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn stop(&self) -> Result<(), BackendError> {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let response = self
            .client
            .post(&self.stop_url)
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| BackendError::Execution(format!("failed to stop instance {}: {e}", self.id)))?;

        // An instance that is already gone counts as stopped.
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        check_status(response, act_error).await?;
        debug!(instance_id = %self.id, "Instance stopped");
        Ok(())
    }
}

#[async_trait]
impl AgentBackend for HttpAgentBackend {
    async fn create_context(
        &self,
        kind: InstanceKind,
        timeout: Duration,
    ) -> Result<Box<dyn SandboxContext>, BackendError> {
        let body = CreateInstanceRequest {
            kind,
            timeout_hours: timeout.as_secs().div_ceil(3600).max(1),
        };
        let response = self.post(&self.url("instances"), &body).await?;
        let response = check_status(response, BackendError::ContextCreation).await?;
        let created: CreateInstanceResponse = response
            .json()
            .await
            .map_err(|e| BackendError::ContextCreation(format!("invalid instance response: {e}")))?;

        debug!(instance_id = %created.id, kind = %kind, "Instance created");
        Ok(Box::new(HttpContext {
            stop_url: self.url(&format!("instances/{}/stop", created.id)),
            id: created.id,
            client: self.client.clone(),
            api_key: self.api_key.clone(),
            stopped: AtomicBool::new(false),
        }))
    }

    async fn run(
        &self,
        context: &dyn SandboxContext,
        request: AgentRequest,
        steps: mpsc::Sender<StepEvent>,
    ) -> Result<AgentResponse, BackendError> {
        let body = ActRequest {
            provider: request.provider.as_str(),
            tools: &request.tools,
            system: &request.system_prompt,
            prompt: &request.prompt,
            schema: request.schema.as_ref(),
        };
        let url = self.url(&format!("instances/{}/act", context.id()));
        let response = self.post(&url, &body).await?;
        if response.status() == StatusCode::UNPROCESSABLE_ENTITY {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::ToolSetup(body.trim().to_string()));
        }
        let response = check_status(response, act_error).await?;

        let mut byte_stream = response.bytes_stream();
        let mut lines = LineBuffer::default();

        while let Some(chunk) = byte_stream.next().await {
            let chunk =
                chunk.map_err(|e| BackendError::Execution(format!("stream error: {e}")))?;
            for line in lines.push(&chunk) {
                if let Some(done) = handle_line(&line, &steps).await {
                    return done;
                }
            }
        }

        // The final event may arrive without a trailing newline.
        if let Some(line) = lines.finish()
            && let Some(done) = handle_line(&line, &steps).await
        {
            return done;
        }
        Err(BackendError::Execution(
            "event stream ended without a result".to_string(),
        ))
    }
}

/// Reassembles newline-delimited lines from raw body chunks.
///
/// Bytes are decoded only once a whole line is buffered, so a multi-byte
/// character split across two chunks arrives intact.
#[derive(Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    /// Append a chunk and return every line it completed.
    fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            if let Some(line) = decode_line(&line[..pos]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Whatever is left once the body ends.
    fn finish(self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        decode_line(&self.pending)
    }
}

fn decode_line(bytes: &[u8]) -> Option<String> {
    match std::str::from_utf8(bytes) {
        Ok(line) => Some(line.to_string()),
        Err(e) => {
            warn!(error = %e, "Skipping event line that is not valid UTF-8");
            None
        }
    }
}

/// Process one NDJSON line. Returns the run result once a terminal event is
/// seen.
async fn handle_line(
    line: &str,
    steps: &mpsc::Sender<StepEvent>,
) -> Option<Result<AgentResponse, BackendError>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let event: ActEvent = match serde_json::from_str(line) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Skipping malformed event line");
            return None;
        }
    };

    match event {
        ActEvent::Step { text, tool_calls } => {
            // A closed receiver only means nobody records steps any more.
            let _ = steps.send(StepEvent { text, tool_calls }).await;
            None
        }
        ActEvent::Result { text, output } => Some(Ok(AgentResponse {
            text,
            output: output.map(|value| match value {
                Value::String(raw) => raw,
                other => other.to_string(),
            }),
        })),
        ActEvent::Error { message } => Some(Err(BackendError::Execution(message))),
    }
}
