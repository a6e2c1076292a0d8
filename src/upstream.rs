//! Upstream chat backend: the remote completion and assistant-run APIs,
//! plus the line-level normalization of their stream shapes.

use crate::constants::{COMPLETION_MODEL, MAX_LINE_LENGTH, OPENAI_BASE_URL};
use crate::framing::{self, DATA_PREFIX, DONE_SENTINEL};
use crate::types::{ChatMessage, CourierError, Result, Role};
use axum::http::StatusCode;
use futures_util::future::BoxFuture;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

/// Uniform ordered sequence of text deltas, whatever upstream protocol
/// produced them.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Other,
}

impl RunStatus {
    pub fn from_wire(s: &str) -> Self {
        match s {
            "queued" => RunStatus::Queued,
            "in_progress" => RunStatus::InProgress,
            "completed" => RunStatus::Completed,
            "failed" => RunStatus::Failed,
            "cancelled" => RunStatus::Cancelled,
            _ => RunStatus::Other,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

/// Seam between the adapter and whichever chat platform is configured.
/// Mocked in tests; implemented over HTTP by [`OpenAiBackend`].
pub trait ChatBackend: Send + Sync {
    /// Plain streaming completion: each upstream token chunk is one delta.
    fn stream_completion<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        temperature: f32,
    ) -> BoxFuture<'a, Result<DeltaStream>>;

    /// Plain completion, whole answer at once.
    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        temperature: f32,
    ) -> BoxFuture<'a, Result<String>>;

    fn create_thread(&self) -> BoxFuture<'_, Result<String>>;

    fn append_thread_message<'a>(
        &'a self,
        thread_id: &'a str,
        role: Role,
        content: &'a str,
    ) -> BoxFuture<'a, Result<()>>;

    /// Streaming run against a thread; message deltas only.
    fn stream_run<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<DeltaStream>>;

    fn start_run<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<String>>;

    fn run_status<'a>(
        &'a self,
        thread_id: &'a str,
        run_id: &'a str,
    ) -> BoxFuture<'a, Result<RunStatus>>;

    /// Text of the newest message on a thread, normalized to one string.
    fn latest_message_text<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// --- LINE-LEVEL NORMALIZATION ---

/// What one upstream `data:` line means for the delta sequence. One case
/// per upstream shape keeps protocol drift contained here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    Delta(String),
    Skip,
    Done,
    Fail(String),
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct UpstreamErrorBody {
    error: UpstreamErrorDetails,
}

#[derive(Deserialize)]
struct UpstreamErrorDetails {
    message: String,
}

/// Parses one line of a `chat/completions` stream.
pub fn parse_completion_line(data: &str) -> LineOutcome {
    if data == DONE_SENTINEL {
        return LineOutcome::Done;
    }
    // Error payloads are more specific (require an "error" key), try first.
    if let Ok(err) = serde_json::from_str::<UpstreamErrorBody>(data) {
        return LineOutcome::Fail(err.error.message);
    }
    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => {
            let text = chunk
                .choices
                .first()
                .and_then(|c| c.delta.content.as_deref())
                .unwrap_or_default();
            if text.is_empty() {
                LineOutcome::Skip
            } else {
                LineOutcome::Delta(text.to_string())
            }
        }
        Err(e) => {
            tracing::warn!("Skipping malformed completion chunk: {}", e);
            LineOutcome::Skip
        }
    }
}

/// Parses one line of an assistant-run event stream. Only message deltas
/// contribute content; run lifecycle events are skipped unless the run
/// reached a failing terminal state.
pub fn parse_run_event_line(data: &str) -> LineOutcome {
    if data == DONE_SENTINEL {
        return LineOutcome::Done;
    }
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!("Skipping malformed run event: {}", e);
            return LineOutcome::Skip;
        }
    };

    if let Some(err) = value.get("error") {
        let msg = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("upstream run error");
        return LineOutcome::Fail(msg.to_string());
    }

    let object = value.get("object").and_then(|o| o.as_str()).unwrap_or("");
    if object == "thread.message.delta" {
        let text = value
            .get("delta")
            .and_then(|d| d.get("content"))
            .map(framing::normalize_content)
            .unwrap_or_default();
        return if text.is_empty() {
            LineOutcome::Skip
        } else {
            LineOutcome::Delta(text)
        };
    }

    if object == "thread.run" {
        let status = value.get("status").and_then(|s| s.as_str()).unwrap_or("");
        if matches!(status, "failed" | "cancelled" | "expired") {
            return LineOutcome::Fail(format!("run ended with status {}", status));
        }
    }

    LineOutcome::Skip
}

/// --- STREAM PLUMBING ---

fn sse_lines(
    response: reqwest::Response,
) -> impl Stream<Item = std::result::Result<String, LinesCodecError>> + Send + Unpin {
    let bytes_stream: Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>> =
        Box::pin(
            response
                .bytes_stream()
                .map(|r| r.map_err(std::io::Error::other)),
        );
    FramedRead::new(
        tokio_util::io::StreamReader::new(bytes_stream),
        LinesCodec::new_with_max_length(MAX_LINE_LENGTH),
    )
}

/// Reads `data:` lines off an upstream SSE body and forwards normalized
/// deltas through a channel. Dropping the returned stream stops the
/// reader task at its next send.
fn spawn_delta_forwarder<S>(mut lines: S, parse: fn(&str) -> LineOutcome) -> DeltaStream
where
    S: Stream<Item = std::result::Result<String, LinesCodecError>> + Send + Unpin + 'static,
{
    let (tx, rx) = mpsc::channel::<Result<String>>(64);
    tokio::spawn(async move {
        while let Some(line_result) = lines.next().await {
            match line_result {
                Ok(line) => {
                    let Some(data) = line.strip_prefix(DATA_PREFIX) else {
                        continue;
                    };
                    match parse(data) {
                        LineOutcome::Delta(d) => {
                            if tx.send(Ok(d)).await.is_err() {
                                tracing::trace!("Delta consumer gone, stopping upstream read");
                                break;
                            }
                        }
                        LineOutcome::Skip => {}
                        LineOutcome::Done => break,
                        LineOutcome::Fail(msg) => {
                            tracing::error!("Upstream stream error: {}", msg);
                            let _ = tx
                                .send(Err(
                                    CourierError::Upstream(StatusCode::BAD_GATEWAY, msg).into()
                                ))
                                .await;
                            break;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Upstream line read error: {}", e);
                    let io_err = match e {
                        LinesCodecError::Io(io) => io,
                        LinesCodecError::MaxLineLengthExceeded => {
                            std::io::Error::other("Max line length exceeded")
                        }
                    };
                    let _ = tx.send(Err(CourierError::Io(io_err).into())).await;
                    break;
                }
            }
        }
    });
    Box::pin(ReceiverStream::new(rx))
}

/// --- HTTP BACKEND ---

#[derive(Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    api_key: String,
    assistant_id: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(client: reqwest::Client, api_key: String, assistant_id: String) -> Self {
        Self {
            client,
            api_key,
            assistant_id,
            base_url: OPENAI_BASE_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = match response.text().await {
            Ok(t) => t,
            Err(_) => "Unknown error (failed to read response text)".to_string(),
        };
        Err(CourierError::Upstream(status, body).into())
    }

    fn completion_body(messages: &[ChatMessage], temperature: f32, stream: bool) -> serde_json::Value {
        serde_json::json!({
            "model": COMPLETION_MODEL,
            "messages": messages,
            "temperature": temperature,
            "stream": stream,
        })
    }
}

impl ChatBackend for OpenAiBackend {
    fn stream_completion<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        temperature: f32,
    ) -> BoxFuture<'a, Result<DeltaStream>> {
        Box::pin(async move {
            let response = self
                .post("/chat/completions")
                .json(&Self::completion_body(messages, temperature, true))
                .send()
                .await
                .map_err(CourierError::Network)?;
            let response = Self::check(response).await?;
            Ok(spawn_delta_forwarder(
                sse_lines(response),
                parse_completion_line,
            ))
        })
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        temperature: f32,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let response = self
                .post("/chat/completions")
                .json(&Self::completion_body(messages, temperature, false))
                .send()
                .await
                .map_err(CourierError::Network)?;
            let response = Self::check(response).await?;
            let body: serde_json::Value = response.json().await.map_err(CourierError::Network)?;
            let text = body["choices"][0]["message"]["content"]
                .as_str()
                .unwrap_or_default()
                .to_string();
            Ok(text)
        })
    }

    fn create_thread(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let response = self
                .post("/threads")
                .json(&serde_json::json!({}))
                .send()
                .await
                .map_err(CourierError::Network)?;
            let response = Self::check(response).await?;
            let body: serde_json::Value = response.json().await.map_err(CourierError::Network)?;
            match body["id"].as_str() {
                Some(id) => Ok(id.to_string()),
                None => Err(CourierError::Upstream(
                    StatusCode::BAD_GATEWAY,
                    "thread creation returned no id".to_string(),
                )
                .into()),
            }
        })
    }

    fn append_thread_message<'a>(
        &'a self,
        thread_id: &'a str,
        role: Role,
        content: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            // The thread API only accepts user/assistant roles; system
            // context rides along as a user message.
            let wire_role = match role {
                Role::Assistant => "assistant",
                _ => "user",
            };
            let response = self
                .post(&format!("/threads/{}/messages", thread_id))
                .json(&serde_json::json!({ "role": wire_role, "content": content }))
                .send()
                .await
                .map_err(CourierError::Network)?;
            Self::check(response).await?;
            Ok(())
        })
    }

    fn stream_run<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<DeltaStream>> {
        Box::pin(async move {
            let response = self
                .post(&format!("/threads/{}/runs", thread_id))
                .json(&serde_json::json!({
                    "assistant_id": self.assistant_id,
                    "stream": true,
                }))
                .send()
                .await
                .map_err(CourierError::Network)?;
            let response = Self::check(response).await?;
            Ok(spawn_delta_forwarder(
                sse_lines(response),
                parse_run_event_line,
            ))
        })
    }

    fn start_run<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let response = self
                .post(&format!("/threads/{}/runs", thread_id))
                .json(&serde_json::json!({ "assistant_id": self.assistant_id }))
                .send()
                .await
                .map_err(CourierError::Network)?;
            let response = Self::check(response).await?;
            let body: serde_json::Value = response.json().await.map_err(CourierError::Network)?;
            match body["id"].as_str() {
                Some(id) => Ok(id.to_string()),
                None => Err(CourierError::Upstream(
                    StatusCode::BAD_GATEWAY,
                    "run creation returned no id".to_string(),
                )
                .into()),
            }
        })
    }

    fn run_status<'a>(
        &'a self,
        thread_id: &'a str,
        run_id: &'a str,
    ) -> BoxFuture<'a, Result<RunStatus>> {
        Box::pin(async move {
            let response = self
                .get(&format!("/threads/{}/runs/{}", thread_id, run_id))
                .send()
                .await
                .map_err(CourierError::Network)?;
            let response = Self::check(response).await?;
            let body: serde_json::Value = response.json().await.map_err(CourierError::Network)?;
            let status = body["status"].as_str().unwrap_or("");
            Ok(RunStatus::from_wire(status))
        })
    }

    fn latest_message_text<'a>(&'a self, thread_id: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let response = self
                .get(&format!("/threads/{}/messages?limit=1&order=desc", thread_id))
                .send()
                .await
                .map_err(CourierError::Network)?;
            let response = Self::check(response).await?;
            let body: serde_json::Value = response.json().await.map_err(CourierError::Network)?;
            Ok(framing::normalize_content(&body["data"][0]["content"]))
        })
    }
}
