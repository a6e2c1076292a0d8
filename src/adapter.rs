//! The upstream adapter: turns one message history into one uniform
//! delta sequence, whichever of the three upstream protocols is in play.

use crate::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_MAX_POLLS, FILE_GROUNDED_PREAMBLE, POLL_INTERVAL_SECS,
    SYNTHETIC_DELAY_MS, TEMPERATURE_BASE, TEMPERATURE_DETAILED,
};
use crate::heuristics::{self, AttachedFile};
use crate::retry::RetryPolicy;
use crate::types::{ChatMessage, CourierError, RequestMode, Result, Role};
use crate::upstream::{ChatBackend, DeltaStream, RunStatus};
use axum::http::StatusCode;
use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Clone)]
pub struct AdapterConfig {
    /// Deployment switch: confirmed-source (polled, citation-gated)
    /// instead of retrieval-with-fallback.
    pub confirmed_source: bool,
    pub chunk_size: usize,
    pub poll_interval: Duration,
    pub max_polls: u32,
    pub synthetic_delay: Duration,
    pub max_retries: u32,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            confirmed_source: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            max_polls: DEFAULT_MAX_POLLS,
            synthetic_delay: Duration::from_millis(SYNTHETIC_DELAY_MS),
            max_retries: 3,
        }
    }
}

#[derive(Clone)]
pub struct UpstreamAdapter {
    backend: Arc<dyn ChatBackend>,
    config: AdapterConfig,
}

pub fn temperature_for(detailed_mode: bool) -> f32 {
    if detailed_mode {
        TEMPERATURE_DETAILED
    } else {
        TEMPERATURE_BASE
    }
}

impl UpstreamAdapter {
    pub fn new(backend: Arc<dyn ChatBackend>, config: AdapterConfig) -> Self {
        Self { backend, config }
    }

    /// Picks the request mode by inspecting the latest user message; no
    /// explicit client flag is involved.
    pub fn select_mode(&self, history: &[ChatMessage]) -> RequestMode {
        let last_user = history.iter().rev().find(|m| m.role == Role::User);
        if let Some(msg) = last_user {
            if let Some(attached) = AttachedFile::parse(&msg.content) {
                return RequestMode::FileGrounded {
                    name: attached.name,
                    body: attached.body,
                    query: attached.query,
                };
            }
        }
        if self.config.confirmed_source {
            RequestMode::ConfirmedSource
        } else {
            RequestMode::Retrieval
        }
    }

    /// Executes a mode against the backend. Failures here happen before
    /// any delta is emitted and are the caller's to surface; failures
    /// after this returns travel inside the stream.
    pub async fn dispatch(
        &self,
        mode: RequestMode,
        history: Vec<ChatMessage>,
        temperature: f32,
    ) -> Result<DeltaStream> {
        match mode {
            RequestMode::FileGrounded { body, query, .. } => {
                self.file_grounded(&body, &query, temperature).await
            }
            RequestMode::Retrieval => self.retrieval_with_fallback(history, temperature).await,
            RequestMode::ConfirmedSource => self.confirmed_source(history, temperature).await,
        }
    }

    /// Two-message exchange: a system instruction pinning the model to
    /// the attached document, and the bare user query.
    async fn file_grounded(
        &self,
        body: &str,
        query: &str,
        temperature: f32,
    ) -> Result<DeltaStream> {
        let messages = vec![
            ChatMessage::new(Role::System, format!("{}{}", FILE_GROUNDED_PREAMBLE, body)),
            ChatMessage::new(Role::User, query),
        ];
        self.backend.stream_completion(&messages, temperature).await
    }

    /// Opens a remote thread, replays the history onto it and streams a
    /// run. If the run's output never escapes the refusal phrasebook (or
    /// is empty), a plain completion is streamed as a silent
    /// continuation of the same delta sequence.
    async fn retrieval_with_fallback(
        &self,
        history: Vec<ChatMessage>,
        temperature: f32,
    ) -> Result<DeltaStream> {
        let thread_id = self.create_thread_with_retry().await?;
        for msg in &history {
            self.backend
                .append_thread_message(&thread_id, msg.role, &msg.content)
                .await?;
        }
        let mut run = self.backend.stream_run(&thread_id).await?;

        let backend = self.backend.clone();
        let (tx, rx) = mpsc::channel::<Result<String>>(64);
        tokio::spawn(async move {
            let mut useful = false;
            let mut accumulated = String::new();

            while let Some(item) = run.next().await {
                match item {
                    Ok(delta) => {
                        if !useful && !heuristics::is_refusal(&delta) {
                            useful = true;
                        }
                        accumulated.push_str(&delta);
                        if tx.send(Ok(delta)).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }
            }

            if useful && !accumulated.trim().is_empty() {
                return;
            }

            tracing::info!(
                "Retrieval answer judged unhelpful ({} chars), falling back to plain completion",
                accumulated.len()
            );
            let mut fallback = match backend.stream_completion(&history, temperature).await {
                Ok(s) => s,
                Err(e) => {
                    let _ = tx.send(Err(e)).await;
                    return;
                }
            };
            while let Some(item) = fallback.next().await {
                if tx.send(item).await.is_err() {
                    return;
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Runs the thread to completion by polling, keeps the answer only if
    /// it carries a citation marker, then re-chunks whichever text won
    /// into a synthetic delta stream.
    async fn confirmed_source(
        &self,
        history: Vec<ChatMessage>,
        temperature: f32,
    ) -> Result<DeltaStream> {
        let retrieval_answer = self.polled_retrieval_answer(&history).await?;

        let chosen = match retrieval_answer {
            Some(text) if heuristics::has_citation(&text) => text,
            other => {
                if other.is_some() {
                    tracing::info!("Retrieval answer carries no citation marker, discarding");
                }
                self.backend.complete(&history, temperature).await?
            }
        };

        let chunks = heuristics::chunk_text(&chosen, self.config.chunk_size);
        let delay = self.config.synthetic_delay;
        let (tx, rx) = mpsc::channel::<Result<String>>(16);
        tokio::spawn(async move {
            let mut first = true;
            for chunk in chunks {
                if !first {
                    tokio::time::sleep(delay).await;
                }
                first = false;
                if tx.send(Ok(chunk)).await.is_err() {
                    return;
                }
            }
        });
        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    /// Thread + polled run. Returns None when the run ends in a failing
    /// terminal state (the caller falls back), errors when the poll
    /// bound is exhausted.
    async fn polled_retrieval_answer(&self, history: &[ChatMessage]) -> Result<Option<String>> {
        let thread_id = self.create_thread_with_retry().await?;
        for msg in history {
            self.backend
                .append_thread_message(&thread_id, msg.role, &msg.content)
                .await?;
        }
        let run_id = self.backend.start_run(&thread_id).await?;

        let mut polls = 0;
        let status = loop {
            let status = self.backend.run_status(&thread_id, &run_id).await?;
            if status.is_terminal() {
                break status;
            }
            polls += 1;
            if polls >= self.config.max_polls {
                return Err(CourierError::Upstream(
                    StatusCode::GATEWAY_TIMEOUT,
                    format!("run did not reach a terminal state within {} polls", polls),
                )
                .into());
            }
            tokio::time::sleep(self.config.poll_interval).await;
        };

        if status != RunStatus::Completed {
            tracing::warn!("Polled run ended with status {:?}", status);
            return Ok(None);
        }

        let text = self.backend.latest_message_text(&thread_id).await?;
        Ok(Some(text))
    }

    async fn create_thread_with_retry(&self) -> Result<String> {
        let retry = RetryPolicy::new(self.config.max_retries, 100);
        let backend = self.backend.clone();
        retry
            .execute_with_retry(|| {
                let backend = backend.clone();
                async move { backend.create_thread().await }
            })
            .await
    }
}
