//! Client-side stream consumer: sends a chat request to the relay,
//! decodes the frame stream and drives the conversation state through
//! the placeholder lifecycle.

use crate::conversation::ConversationState;
use crate::framing::{FrameDecoder, FrameEvent};
use crate::types::{ChatRequest, CourierError, Message, Result};
use axum::http::StatusCode;
use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send>>;

/// The wire seam under the consumer. The real implementation speaks
/// HTTP; tests script byte chunks directly.
pub trait StreamTransport: Send + Sync {
    /// Opens the chat stream. An `Err` here means the relay rejected the
    /// request before any frame was produced.
    fn post_chat(&self, request: ChatRequest) -> BoxFuture<'_, Result<ByteStream>>;
}

pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

impl StreamTransport for HttpTransport {
    fn post_chat(&self, request: ChatRequest) -> BoxFuture<'_, Result<ByteStream>> {
        Box::pin(async move {
            let response = self
                .client
                .post(&self.endpoint)
                .json(&request)
                .send()
                .await
                .map_err(CourierError::from)?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CourierError::Upstream(
                    StatusCode::from_u16(status.as_u16())
                        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                    body,
                )
                .into());
            }

            let stream = response.bytes_stream().map(|r| r.map_err(std::io::Error::other));
            Ok(Box::pin(stream) as ByteStream)
        })
    }
}

/// How a send attempt ended. Cancellation is a normal ending: the
/// partial answer stays in the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Terminal frame observed; the full answer is committed.
    Completed,
    /// Stopped by the caller mid-stream; partial content committed.
    Cancelled,
}

pub struct StreamConsumer {
    transport: Arc<dyn StreamTransport>,
    pub detailed_mode: bool,
}

impl StreamConsumer {
    pub fn new(transport: Arc<dyn StreamTransport>) -> Self {
        Self {
            transport,
            detailed_mode: false,
        }
    }

    /// Commits the user message, opens an assistant placeholder, streams
    /// deltas into it and settles its fate:
    ///   - terminal frame or natural end: placeholder finalized;
    ///   - cancellation: placeholder finalized with partial content;
    ///   - transport failure: placeholder removed, user message kept.
    pub async fn send(
        &self,
        state: &mut ConversationState,
        user: Message,
        cancel: CancellationToken,
    ) -> Result<SendOutcome> {
        state.push_user(user);
        let request = ChatRequest {
            messages: state.wire_history(),
            detailed_mode: self.detailed_mode,
        };
        let assistant_id = state.open_assistant();

        let mut stream = match self.transport.post_chat(request).await {
            Ok(s) => s,
            Err(e) => {
                state.remove(&assistant_id);
                return Err(e);
            }
        };

        let mut decoder = FrameDecoder::new();
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Stream cancelled, keeping partial content");
                    state.finalize(&assistant_id);
                    return Ok(SendOutcome::Cancelled);
                }
                chunk = stream.next() => {
                    match chunk {
                        Some(Ok(bytes)) => {
                            for event in decoder.push_chunk(&bytes) {
                                match event {
                                    FrameEvent::Delta(text) => {
                                        state.append_delta(&assistant_id, &text);
                                    }
                                    FrameEvent::Done => {
                                        state.finalize(&assistant_id);
                                        return Ok(SendOutcome::Completed);
                                    }
                                }
                            }
                        }
                        Some(Err(e)) => {
                            state.remove(&assistant_id);
                            return Err(CourierError::from(e).into());
                        }
                        // Connection closed without a terminal frame:
                        // whatever arrived stands as the answer.
                        None => {
                            state.finalize(&assistant_id);
                            return Ok(SendOutcome::Completed);
                        }
                    }
                }
            }
        }
    }
}
