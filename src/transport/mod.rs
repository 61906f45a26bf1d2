//! Transport adapters for the generation stream.
//!
//! Two transports feed the same classification pipeline: a chunked-body
//! reader (POST with a JSON body, frames assembled by [`crate::frame`]) and
//! a push event connection (GET, frames assembled by the SSE library). The
//! trait lets the coordinator drive either one, and lets tests inject a
//! scripted transport.

mod chunked;
mod push;

pub use chunked::ChunkedTransport;
pub use push::{PushTransport, DEFAULT_WATCHDOG};

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::Stream;

use crate::error::StreamError;
use crate::events::StreamEvent;

/// A pinned stream of classified events from an open transport.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, StreamError>> + Send>>;

/// One-shot stream opener. `open` either fails immediately (establishment
/// error, surfaced before any frame) or yields a classified event stream
/// that ends when the connection closes.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(
        &self,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<EventStream, StreamError>;

    /// Total-lifetime ceiling for streams on this transport, if any.
    fn watchdog(&self) -> Option<Duration> {
        None
    }
}
