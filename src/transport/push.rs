//! Push event-connection transport.
//!
//! Opens a GET event-source connection via `eventsource-client`, which owns
//! the SSE line framing; each delivered event's data payload goes straight
//! to the classifier with the debug-enabled profile. Reconnection is
//! disabled: a generation session is one-shot, and a silent replay after a
//! dropped connection would duplicate output. This transport carries the
//! watchdog ceiling; the coordinator arms it.

use std::time::Duration;

use async_trait::async_trait;
use eventsource_client as es;
use eventsource_client::Client as _;
use futures_util::StreamExt;

use crate::classify::{classify, ClassifyProfile};
use crate::error::StreamError;

use super::{EventStream, Transport};

/// Fixed ceiling on total stream lifetime, matching the backend's own
/// generation timeout.
pub const DEFAULT_WATCHDOG: Duration = Duration::from_secs(120);

/// Transport for GET endpoints that push server-sent events.
#[derive(Debug)]
pub struct PushTransport {
    watchdog: Duration,
}

impl PushTransport {
    pub fn new() -> Self {
        Self {
            watchdog: DEFAULT_WATCHDOG,
        }
    }

    /// Override the watchdog ceiling (tests use short ones).
    pub fn with_watchdog(watchdog: Duration) -> Self {
        Self { watchdog }
    }
}

impl Default for PushTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for PushTransport {
    async fn open(
        &self,
        endpoint: &str,
        _body: Option<&serde_json::Value>,
    ) -> Result<EventStream, StreamError> {
        let client = es::ClientBuilder::for_url(endpoint)
            .map_err(|e| StreamError::Connect(e.to_string()))?
            .reconnect(es::ReconnectOptions::reconnect(false).build())
            .build();

        tracing::debug!(endpoint, "push stream open");
        let events = client.stream().filter_map(|item| async move {
            match item {
                Ok(es::SSE::Event(event)) => classify(&event.data, ClassifyProfile::Push).map(Ok),
                // Comments and connection notices carry no payload.
                Ok(_) => None,
                // A clean end of the connection is not an error; the
                // coordinator treats the close as implicit success.
                Err(es::Error::Eof) => None,
                Err(e) => Some(Err(StreamError::Transport(e.to_string()))),
            }
        });

        Ok(Box::pin(events))
    }

    fn watchdog(&self) -> Option<Duration> {
        Some(self.watchdog)
    }
}
