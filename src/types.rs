use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tracing_error::SpanTrace;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ThreadId(pub String);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// --- CORE ROLES ---

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    File,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FileAttachment {
    pub name: String,
    #[serde(rename = "mimeType")]
    pub mime_type: String,
    #[serde(rename = "sizeBytes")]
    pub size_bytes: u64,
    #[serde(rename = "contentRef")]
    pub content_ref: String,
}

/// One entry in the local conversation log. `content` is mutable only
/// while the message is the open streaming target; user-authored content
/// is frozen at creation and never touched again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<FileAttachment>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            kind: MessageKind::Text,
            timestamp: Utc::now(),
            file: None,
        }
    }

    pub fn user_with_file(content: impl Into<String>, file: FileAttachment) -> Self {
        Self {
            id: MessageId::new(),
            role: Role::User,
            content: content.into(),
            kind: MessageKind::File,
            timestamp: Utc::now(),
            file: Some(file),
        }
    }

    pub fn assistant_placeholder() -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            content: String::new(),
            kind: MessageKind::Text,
            timestamp: Utc::now(),
            file: None,
        }
    }
}

/// --- WIRE TYPES (browser <-> relay) ---

/// One role/content pair as it travels in the POST body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(rename = "detailedMode", default)]
    pub detailed_mode: bool,
}

/// Non-streamed reply used by the image-intent short-circuit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageReply {
    pub role: Role,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

/// --- STREAM SESSION ---

/// How a request will be answered, decided by content inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestMode {
    /// Latest user message carried an inlined document; answer from it alone.
    FileGrounded {
        name: String,
        body: String,
        query: String,
    },
    /// Remote thread + streamed run, with plain-completion fallback.
    Retrieval,
    /// Polled run, citation check, synthetic re-chunked delta stream.
    ConfirmedSource,
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestMode::FileGrounded { name, .. } => write!(f, "file_grounded({})", name),
            RequestMode::Retrieval => write!(f, "retrieval"),
            RequestMode::ConfirmedSource => write!(f, "confirmed_source"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Received,
    Dispatched(RequestMode),
    Streaming,
    Completed,
    Aborted,
    Failed,
}

/// Transient per-request state, created at dispatch and destroyed at the
/// terminal frame or on disconnect.
pub struct StreamSession {
    pub request_id: String,
    pub accumulated: String,
    pub state: SessionState,
}

impl StreamSession {
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            accumulated: String::new(),
            state: SessionState::Received,
        }
    }
}

impl Default for StreamSession {
    fn default() -> Self {
        Self::new()
    }
}

/// --- UPSTREAM HEALTH ---

use std::sync::atomic::{AtomicU32, AtomicU64};
use std::time::Instant;

pub struct UpstreamHealth {
    pub consecutive_failures: AtomicU32,
    pub total_requests: AtomicU64,
    pub failed_requests: AtomicU64,
    pub last_success: std::sync::RwLock<Option<Instant>>,
    pub last_failure: std::sync::RwLock<Option<Instant>>,
}

impl Default for UpstreamHealth {
    fn default() -> Self {
        Self {
            consecutive_failures: AtomicU32::new(0),
            total_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            last_success: std::sync::RwLock::new(None),
            last_failure: std::sync::RwLock::new(None),
        }
    }
}

impl UpstreamHealth {
    pub fn record_success(&self) {
        self.total_requests
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.consecutive_failures
            .store(0, std::sync::atomic::Ordering::Relaxed);
        if let Ok(mut last) = self.last_success.write() {
            *last = Some(Instant::now());
        }
    }

    pub fn record_failure(&self) {
        self.total_requests
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.failed_requests
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.consecutive_failures
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        if let Ok(mut last) = self.last_failure.write() {
            *last = Some(Instant::now());
        }
    }
}

/// --- ERRORS ---

#[derive(Error, Debug)]
pub enum CourierError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Upstream error (status {0}): {1}")]
    Upstream(StatusCode, String),

    #[error("Extraction error: {0}")]
    Extraction(String),

    #[error("Internal error: {0}")]
    Internal(String, SpanTrace),
}

#[derive(Debug)]
pub struct ObservedError {
    pub inner: CourierError,
    pub span_trace: SpanTrace,
}

impl fmt::Display for ObservedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for ObservedError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.inner)
    }
}

impl<E> From<E> for ObservedError
where
    E: Into<CourierError>,
{
    fn from(error: E) -> Self {
        Self {
            inner: error.into(),
            span_trace: SpanTrace::capture(),
        }
    }
}

impl axum::response::IntoResponse for ObservedError {
    fn into_response(self) -> axum::response::Response {
        // Failures before the stream opens surface as one JSON envelope;
        // the relay never opens the event stream on an error path.
        let (status, msg, details) = match &self.inner {
            CourierError::InvalidRequest(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone(), None),
            CourierError::Upstream(_, m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process your request".to_string(),
                Some(m.clone()),
            ),
            CourierError::Network(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process your request".to_string(),
                Some(e.to_string()),
            ),
            CourierError::Database(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Storage error".to_string(),
                Some(e.to_string()),
            ),
            CourierError::Extraction(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Extraction failed".to_string(),
                Some(m.clone()),
            ),
            CourierError::Serialization(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Serialization error".to_string(),
                Some(e.to_string()),
            ),
            CourierError::Io(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "IO error".to_string(),
                Some(e.to_string()),
            ),
            CourierError::Internal(m, _) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone(), None),
        };

        let mut body = serde_json::json!({ "error": msg });
        if let Some(d) = details {
            body["details"] = serde_json::Value::String(d);
        }
        (status, axum::Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, ObservedError>;
