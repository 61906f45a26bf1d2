//! Typed events decoded from the generation stream.
//!
//! The backend multiplexes three things into one SSE stream: plain text
//! tokens, JSON-encoded agent events (tool-call lifecycle, thinking traces),
//! and sentinel frames (`[DONE]`, `[ERROR]`, `[DEBUG]`). This module holds
//! the typed shapes; classification lives in [`crate::classify`].

use serde::{Deserialize, Serialize};

/// Structured out-of-band agent events, tagged by the JSON `type` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// A tool call is about to execute.
    StartedTool {
        tool: String,
        #[serde(default)]
        args: serde_json::Map<String, serde_json::Value>,
        #[serde(default)]
        call_id: Option<String>,
    },
    /// A tool call finished successfully.
    FinishedTool {
        tool: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        result: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    /// Reasoning text produced before the final answer.
    Thinking {
        #[serde(default)]
        content: String,
    },
    /// Non-terminal error reported by the agent loop.
    Error {
        #[serde(default)]
        message: String,
    },
    /// A tool call failed.
    ToolError {
        tool: String,
        #[serde(default)]
        call_id: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
}

impl AgentEvent {
    /// Returns the wire name of the event kind, for logging.
    pub fn kind_name(&self) -> &'static str {
        match self {
            AgentEvent::StartedTool { .. } => "started_tool",
            AgentEvent::FinishedTool { .. } => "finished_tool",
            AgentEvent::Thinking { .. } => "thinking",
            AgentEvent::Error { .. } => "error",
            AgentEvent::ToolError { .. } => "tool_error",
        }
    }
}

/// Generation parameters echoed back in a debug report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default)]
    pub temperature: f64,
    #[serde(default)]
    pub top_p: f64,
    #[serde(default)]
    pub max_tokens: u64,
    #[serde(default)]
    pub seed: Option<i64>,
}

/// Telemetry attached to a `[DEBUG]` frame on push connections.
///
/// The backend emits one report per generation with the fully rendered
/// prompts and latency figures, for the in-app debug panel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugReport {
    pub engine_name: String,
    #[serde(default)]
    pub final_system_prompt: String,
    #[serde(default)]
    pub final_user_prompt: String,
    #[serde(default)]
    pub generation_params: GenerationParams,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub token_estimate: u64,
    #[serde(default)]
    pub response_chars: u64,
}

/// One classified frame of the generation stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Generated text, forwarded verbatim.
    Token { text: String },
    /// Structured agent event.
    Agent(AgentEvent),
    /// Debug telemetry (push connections only).
    Debug(DebugReport),
    /// Terminal: the stream completed successfully.
    Done,
    /// Terminal: the stream failed with the embedded message.
    Error { message: String },
}

impl StreamEvent {
    /// True for the two terminal variants. At most one terminal event is
    /// delivered per session; nothing follows it.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }
}
