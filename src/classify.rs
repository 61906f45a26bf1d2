//! Frame payload classification.
//!
//! Maps one frame payload string to at most one [`StreamEvent`], checked in
//! order: `[DONE]` sentinel, `[ERROR]` sentinel, `[DEBUG]` sentinel (push
//! connections only), structured agent JSON, plain token. Structured-event
//! detection is gated on a recognized kind value so arbitrary JSON-looking
//! model output degrades to plain text instead of being swallowed as a
//! control event.

use crate::events::{AgentEvent, DebugReport, StreamEvent};

/// Terminal success sentinel.
pub const DONE_SENTINEL: &str = "[DONE]";
/// Terminal failure sentinel. Canonical framing is `[ERROR] ` — tag plus
/// exactly one separator space (message offset 8). The space is optional on
/// input; both transports are parsed with the same rule.
pub const ERROR_SENTINEL: &str = "[ERROR]";
/// Debug telemetry sentinel; the JSON report follows the tag immediately
/// (offset 7). Only honored on push connections.
pub const DEBUG_SENTINEL: &str = "[DEBUG]";

/// Which transport the payload arrived on. Debug frames are only emitted by
/// the backend on push connections; on the chunked path a `[DEBUG]`-shaped
/// payload is ordinary model output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassifyProfile {
    Chunked,
    Push,
}

/// Classify one frame payload.
///
/// Returns `None` only for a malformed `[DEBUG]` frame, which is dropped
/// silently; every other payload produces exactly one event.
pub fn classify(payload: &str, profile: ClassifyProfile) -> Option<StreamEvent> {
    if payload == DONE_SENTINEL {
        return Some(StreamEvent::Done);
    }

    if let Some(rest) = payload.strip_prefix(ERROR_SENTINEL) {
        let message = rest.strip_prefix(' ').unwrap_or(rest);
        return Some(StreamEvent::Error {
            message: message.to_string(),
        });
    }

    if profile == ClassifyProfile::Push {
        if let Some(rest) = payload.strip_prefix(DEBUG_SENTINEL) {
            return match serde_json::from_str::<DebugReport>(rest) {
                Ok(report) => Some(StreamEvent::Debug(report)),
                Err(e) => {
                    tracing::debug!("dropping malformed debug frame: {}", e);
                    None
                }
            };
        }
    }

    if let Some(event) = parse_agent_event(payload) {
        return Some(StreamEvent::Agent(event));
    }

    Some(StreamEvent::Token {
        text: payload.to_string(),
    })
}

/// Try to decode a structured agent event. Any parse failure or unrecognized
/// kind returns `None` so the payload falls through to a plain token.
fn parse_agent_event(payload: &str) -> Option<AgentEvent> {
    let value: serde_json::Value = serde_json::from_str(payload).ok()?;
    let obj = value.as_object()?;

    // The wire field is `type`; `kind` is accepted as an alias and
    // normalized to the tag serde expects.
    let kind = obj
        .get("type")
        .or_else(|| obj.get("kind"))?
        .as_str()?
        .to_string();
    let mut obj = obj.clone();
    obj.insert("type".to_string(), serde_json::Value::String(kind));

    serde_json::from_value(serde_json::Value::Object(obj)).ok()
}
