//! Crowforge stream client core.
//!
//! Turns the backend's chunked SSE generation stream into typed events:
//! plain text tokens, structured agent events (tool-call lifecycle, thinking
//! traces), debug reports, and exactly one terminal `Done` or `Error` per
//! session. The [`coordinator::StreamCoordinator`] enforces the single-flight
//! discipline: at most one active stream, start cancels the predecessor, and
//! push connections carry a watchdog timeout.

pub mod classify;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod frame;
pub mod toast;
pub mod transport;

pub use coordinator::{StreamCoordinator, StreamRequest, StreamSession, StreamUpdate};
pub use error::{ErrorCause, StreamError};
pub use events::{AgentEvent, DebugReport, GenerationParams, StreamEvent};
