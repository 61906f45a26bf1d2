//! Stream error types and user-facing cause classification.
//!
//! [`StreamError`] covers transport failures: establishment errors surface
//! before any frame is parsed, mid-stream errors terminate the session.
//! [`ErrorCause`] is the presentation-layer mapping from a raw error message
//! to a human-actionable category; it sits on top of the `Error` update
//! contract and is never consulted during classification.

use thiserror::Error;

/// Transport-level stream errors.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The server answered with a non-success status before streaming.
    #[error("server returned {status}: {message}")]
    Status { status: u16, message: String },

    /// The transport failed mid-stream.
    #[error("transport error: {0}")]
    Transport(String),
}

/// Human-readable cause category, derived from the raw error message by
/// keyword inspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCause {
    Timeout,
    MalformedOutput,
    OutOfMemory,
    ModelNotFound,
    ConnectionRefused,
    Unknown,
}

impl ErrorCause {
    /// Classify a raw error message into a cause category.
    pub fn classify(message: &str) -> Self {
        let m = message.to_ascii_lowercase();
        if m.contains("timed out") || m.contains("timeout") {
            ErrorCause::Timeout
        } else if m.contains("invalid json")
            || m.contains("json parse")
            || m.contains("malformed")
            || m.contains("incomplete")
        {
            ErrorCause::MalformedOutput
        } else if m.contains("out of memory") || m.contains("oom") || m.contains("memory") {
            ErrorCause::OutOfMemory
        } else if (m.contains("model") && m.contains("not found")) || m.contains("no such model") {
            ErrorCause::ModelNotFound
        } else if m.contains("connection refused") || m.contains("refused") || m.contains("connect")
        {
            ErrorCause::ConnectionRefused
        } else {
            ErrorCause::Unknown
        }
    }

    /// Short label for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCause::Timeout => "timeout",
            ErrorCause::MalformedOutput => "malformed_output",
            ErrorCause::OutOfMemory => "out_of_memory",
            ErrorCause::ModelNotFound => "model_not_found",
            ErrorCause::ConnectionRefused => "connection_refused",
            ErrorCause::Unknown => "unknown",
        }
    }

    /// User-facing explanation with a suggested next step.
    pub fn user_message(&self) -> &'static str {
        match self {
            ErrorCause::Timeout => {
                "The model took too long to respond. Try a smaller max-token limit or a faster engine."
            }
            ErrorCause::MalformedOutput => {
                "The model produced incomplete or malformed output. Try lowering creativity or regenerating."
            }
            ErrorCause::OutOfMemory => {
                "The engine ran out of memory. Close other applications or load a smaller model."
            }
            ErrorCause::ModelNotFound => {
                "The selected model is not available. Download it or pick another in Settings."
            }
            ErrorCause::ConnectionRefused => {
                "Could not reach the backend. Check that the Crowforge service is running."
            }
            ErrorCause::Unknown => "Generation failed. See the error details and try again.",
        }
    }

    /// Whether retrying the same request may succeed without user action.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCause::Timeout | ErrorCause::MalformedOutput | ErrorCause::ConnectionRefused
        )
    }
}
