//! Chunked-body transport: POST request, streamed response body.
//!
//! Drives the frame parser over `reqwest`'s byte stream. Chunks arrive with
//! arbitrary boundaries; the parser carries partial lines across them. The
//! pending frame is flushed when the body ends, so a `[DONE]` without a
//! trailing blank line still classifies.

use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};
use reqwest::Client;

use crate::classify::{classify, ClassifyProfile};
use crate::error::StreamError;
use crate::frame::FrameParser;

use super::{EventStream, Transport};

/// Transport for POST endpoints that stream their response body.
#[derive(Debug, Default)]
pub struct ChunkedTransport {
    client: Client,
}

impl ChunkedTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Transport for ChunkedTransport {
    async fn open(
        &self,
        endpoint: &str,
        body: Option<&serde_json::Value>,
    ) -> Result<EventStream, StreamError> {
        let mut request = self
            .client
            .post(endpoint)
            .header("Accept", "text/event-stream");
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StreamError::Connect(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(StreamError::Status { status, message });
        }

        tracing::debug!(endpoint, "chunked stream open");
        let bytes_stream = response.bytes_stream();

        // Unfold state: the byte stream, the frame parser, classified events
        // not yet handed out, and whether the body has ended.
        let events = stream::unfold(
            (bytes_stream, FrameParser::new(), VecDeque::new(), false),
            |(mut bytes_stream, mut parser, mut pending, mut ended)| async move {
                loop {
                    if let Some(event) = pending.pop_front() {
                        return Some((Ok(event), (bytes_stream, parser, pending, ended)));
                    }
                    if ended {
                        return None;
                    }
                    match bytes_stream.next().await {
                        Some(Ok(chunk)) => {
                            for payload in parser.feed(&chunk) {
                                pending.extend(classify(&payload, ClassifyProfile::Chunked));
                            }
                        }
                        Some(Err(e)) => {
                            ended = true;
                            return Some((
                                Err(StreamError::Transport(e.to_string())),
                                (bytes_stream, parser, pending, ended),
                            ));
                        }
                        None => {
                            ended = true;
                            if let Some(payload) = parser.flush() {
                                pending.extend(classify(&payload, ClassifyProfile::Chunked));
                            }
                        }
                    }
                }
            },
        );

        Ok(Box::pin(events))
    }
}
