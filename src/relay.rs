//! The relay's HTTP surface: the streaming chat endpoint plus the thread,
//! document and extraction APIs around it.

use crate::adapter;
use crate::config::AppState;
use crate::constants::{IMAGE_PLACEHOLDER_URL, IMAGE_REPLY_TEXT};
use crate::framing;
use crate::heuristics;
use crate::logging::{request_id_middleware, StreamMetric};
use crate::types::{
    ChatRequest, CourierError, ImageReply, Message, MessageKind, Result, Role, SessionState,
    StreamSession, ThreadId,
};
use crate::{health, upstream::DeltaStream};
use axum::{
    body::Body,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::Instrument;

pub fn router(state: Arc<AppState>) -> Router {
    let max_body = state.args.max_body_size;
    Router::new()
        .route("/api/chat", post(chat_handler))
        .route("/api/threads", get(list_threads).post(create_thread))
        .route(
            "/api/threads/:id",
            axum::routing::patch(rename_thread).delete(delete_thread),
        )
        .route(
            "/api/threads/:id/messages",
            get(list_messages).post(append_message),
        )
        .route("/api/documents", get(list_documents).post(upload_document))
        .route("/api/documents/:id", delete(delete_document))
        .route("/api/documents/:id/download", get(download_document))
        .route("/api/extract", post(extract_text))
        .route("/health", get(health::liveness))
        .route("/readyz", get(health::readiness))
        .layer(DefaultBodyLimit::max(max_body))
        .layer(tower_http::cors::CorsLayer::permissive())
        .layer(middleware::from_fn(request_id_middleware))
        .with_state(state)
}

/// --- CHAT ---

#[tracing::instrument(name = "relay.chat", skip_all, fields(mode = tracing::field::Empty))]
async fn chat_handler(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    // Parsed by hand rather than through the Json extractor: any body
    // that fails to parse must get the same 500 envelope as every other
    // pre-stream failure, not an extractor rejection.
    let request: ChatRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            tracing::error!("Malformed chat request: {}", e);
            return error_response(format!("Invalid request body: {}", e));
        }
    };

    if request.messages.is_empty() {
        return error_response("No messages provided".to_string());
    }

    // Image intent is decided before any upstream call; the reply is a
    // plain JSON message, not a stream.
    if let Some(last_user) = request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User)
    {
        if heuristics::wants_image(&last_user.content) {
            tracing::info!("Image intent detected, short-circuiting");
            return Json(ImageReply {
                role: Role::Assistant,
                content: IMAGE_REPLY_TEXT.to_string(),
                kind: MessageKind::Image,
                image_url: IMAGE_PLACEHOLDER_URL.to_string(),
            })
            .into_response();
        }
    }

    let mode = state.adapter.select_mode(&request.messages);
    tracing::Span::current().record("mode", tracing::field::display(&mode));
    let temperature = adapter::temperature_for(request.detailed_mode);

    let mut session = StreamSession::new();
    session.state = SessionState::Dispatched(mode.clone());

    let stream = match state
        .adapter
        .dispatch(mode, request.messages, temperature)
        .await
    {
        Ok(s) => {
            state.health.record_success();
            s
        }
        Err(e) => {
            state.health.record_failure();
            tracing::error!("Dispatch failed: {}", e);
            return e.into_response();
        }
    };

    stream_response(stream, session)
}

/// Wraps a delta sequence in the wire frame protocol. The terminal frame
/// is sent only when the upstream sequence ends cleanly; a mid-stream
/// error closes the connection without it, so consumers keep the partial
/// answer without mistaking it for a complete one.
fn stream_response(mut stream: DeltaStream, mut session: StreamSession) -> Response {
    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(64);
    let request_id = session.request_id.clone();

    let span = tracing::info_span!("stream", request_id = %request_id);
    tokio::spawn(
        async move {
            let mut metric = StreamMetric::new();
            session.state = SessionState::Streaming;

            while let Some(item) = stream.next().await {
                match item {
                    Ok(delta) => {
                        metric.record_delta(&delta);
                        session.accumulated.push_str(&delta);
                        let frame = Bytes::from(framing::encode_delta(&delta));
                        if tx.send(Ok(frame)).await.is_err() {
                            // Receiver dropped: the client went away.
                            tracing::info!("Client disconnected mid-stream");
                            session.state = SessionState::Aborted;
                            metric.log_summary(&session.request_id, "disconnected");
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::error!("Upstream failed mid-stream: {}", e);
                        session.state = SessionState::Failed;
                        metric.log_summary(&session.request_id, "failed");
                        return;
                    }
                }
            }
            let _ = tx.send(Ok(Bytes::from(framing::encode_done()))).await;
            session.state = SessionState::Completed;
            metric.log_summary(&session.request_id, "completed");
        }
        .instrument(span),
    );

    match Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(Body::from_stream(ReceiverStream::new(rx)))
    {
        Ok(response) => response,
        Err(e) => error_response(format!("Failed to build stream response: {}", e)),
    }
}

fn error_response(message: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "error": message })),
    )
        .into_response()
}

/// --- THREADS ---

#[derive(Deserialize)]
struct ThreadNameBody {
    name: String,
}

async fn list_threads(State(state): State<Arc<AppState>>) -> Result<Response> {
    let threads = state.threads.list_threads().await?;
    Ok(Json(threads).into_response())
}

async fn create_thread(
    State(state): State<Arc<AppState>>,
    Json(body): Json<ThreadNameBody>,
) -> Result<Response> {
    let record = state.threads.create_thread(&body.name).await?;
    Ok((StatusCode::CREATED, Json(record)).into_response())
}

async fn rename_thread(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ThreadNameBody>,
) -> Result<Response> {
    state
        .threads
        .rename_thread(&ThreadId(id), &body.name)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn delete_thread(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response> {
    state.threads.delete_thread(&ThreadId(id)).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_messages(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response> {
    let messages = state.threads.list_messages(&ThreadId(id)).await?;
    Ok(Json(messages).into_response())
}

async fn append_message(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(message): Json<Message>,
) -> Result<Response> {
    state.threads.append_message(&ThreadId(id), &message).await?;
    Ok((StatusCode::CREATED, Json(message)).into_response())
}

/// --- DOCUMENTS ---

async fn list_documents(State(state): State<Arc<AppState>>) -> Result<Response> {
    let documents = state.documents.list_documents().await?;
    Ok(Json(documents).into_response())
}

async fn upload_document(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response> {
    let (filename, bytes) = read_file_field(&mut multipart).await?;
    let document = state.documents.upload_document(&filename, bytes).await?;
    Ok((StatusCode::CREATED, Json(document)).into_response())
}

async fn delete_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response> {
    state.documents.delete_document(&id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn download_document(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response> {
    let bytes = state.documents.download_document(&id).await?;
    Ok((
        [(header::CONTENT_TYPE, "application/octet-stream")],
        bytes,
    )
        .into_response())
}

/// --- EXTRACTION ---

/// Accepts one uploaded file and returns its extracted text, ready for
/// the client to inline into a file-grounded chat message.
async fn extract_text(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response> {
    let (filename, mime_type, bytes) = read_file_field_with_type(&mut multipart).await?;
    let text = state.extractor.extract(&filename, &mime_type, &bytes)?;
    Ok(Json(serde_json::json!({ "name": filename, "text": text })).into_response())
}

async fn read_file_field(multipart: &mut Multipart) -> Result<(String, Bytes)> {
    let (name, _, bytes) = read_file_field_with_type(multipart).await?;
    Ok((name, bytes))
}

async fn read_file_field_with_type(multipart: &mut Multipart) -> Result<(String, String, Bytes)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| CourierError::InvalidRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().unwrap_or("upload").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| CourierError::InvalidRequest(format!("Failed to read upload: {}", e)))?;
        return Ok((filename, mime_type, bytes));
    }
    Err(CourierError::InvalidRequest("No file field in upload".to_string()).into())
}
