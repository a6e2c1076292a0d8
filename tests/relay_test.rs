mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use common::MockBackend;
use courier::adapter::{AdapterConfig, UpstreamAdapter};
use courier::config::{AppState, Args};
use courier::documents::{DocumentStore, PlainTextExtractor, StoredDocument};
use courier::relay::router;
use courier::store::SqliteThreadStore;
use courier::types::{Result, UpstreamHealth};
use bytes::Bytes;
use clap::Parser;
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

struct NoDocuments;

impl DocumentStore for NoDocuments {
    fn list_documents(&self) -> BoxFuture<'_, Result<Vec<StoredDocument>>> {
        Box::pin(async { Ok(Vec::new()) })
    }

    fn upload_document<'a>(
        &'a self,
        filename: &'a str,
        bytes: Bytes,
    ) -> BoxFuture<'a, Result<StoredDocument>> {
        Box::pin(async move {
            Ok(StoredDocument {
                id: "doc_test".to_string(),
                filename: filename.to_string(),
                size_bytes: bytes.len() as u64,
                created_at: 0,
            })
        })
    }

    fn delete_document<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn download_document<'a>(&'a self, _id: &'a str) -> BoxFuture<'a, Result<Bytes>> {
        Box::pin(async { Ok(Bytes::new()) })
    }
}

async fn test_state(backend: MockBackend) -> Arc<AppState> {
    // A single connection keeps every query on the same in-memory database.
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();

    let config = AdapterConfig {
        confirmed_source: false,
        chunk_size: 512,
        poll_interval: Duration::from_millis(1),
        max_polls: 5,
        synthetic_delay: Duration::from_millis(0),
        max_retries: 1,
    };

    Arc::new(AppState {
        client: reqwest::Client::new(),
        db: pool.clone(),
        adapter: UpstreamAdapter::new(Arc::new(backend), config),
        threads: Arc::new(SqliteThreadStore::new(pool)),
        documents: Arc::new(NoDocuments),
        extractor: Arc::new(PlainTextExtractor),
        health: Arc::new(UpstreamHealth::default()),
        args: Arc::new(Args::parse_from(["courier"])),
    })
}

fn chat_request(body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/chat")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn chat_stream_carries_deltas_and_terminal_frame() {
    let backend = MockBackend {
        run_deltas: vec!["Hello ".to_string(), "world".to_string()],
        ..Default::default()
    };
    let app = router(test_state(backend).await);

    let response = app
        .oneshot(chat_request(serde_json::json!({
            "messages": [{ "role": "user", "content": "hi" }]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "text/event-stream"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "no-cache"
    );

    let body = body_string(response).await;
    assert!(body.contains(r#"data: {"content":"Hello "}"#));
    assert!(body.contains(r#"data: {"content":"world"}"#));
    assert!(body.ends_with("data: [DONE]\n\n"));
}

#[tokio::test]
async fn empty_history_is_rejected_before_streaming() {
    let app = router(test_state(MockBackend::default()).await);

    let response = app
        .oneshot(chat_request(serde_json::json!({ "messages": [] })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["error"], "No messages provided");
}

#[tokio::test]
async fn malformed_body_is_rejected_before_streaming() {
    let app = router(test_state(MockBackend::default()).await);

    let response = app
        .oneshot(chat_request(serde_json::json!({ "messages": "nope" })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert!(body["error"].as_str().unwrap().contains("Invalid request"));
}

#[tokio::test]
async fn non_json_body_gets_the_same_error_envelope() {
    let app = router(test_state(MockBackend::default()).await);

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/chat")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from("this is not json"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert!(body["error"].as_str().unwrap().contains("Invalid request"));
}

#[tokio::test]
async fn image_intent_returns_json_not_a_stream() {
    let app = router(test_state(MockBackend::default()).await);

    let response = app
        .oneshot(chat_request(serde_json::json!({
            "messages": [{ "role": "user", "content": "please draw a picture of a cat" }]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["type"], "image");
    assert_eq!(body["imageUrl"], "/placeholder.svg?height=512&width=512");
    assert_eq!(body["role"], "assistant");
}

#[tokio::test]
async fn pre_stream_upstream_failure_is_a_json_error() {
    let backend = MockBackend {
        fail_create_thread: true,
        ..Default::default()
    };
    let app = router(test_state(backend).await);

    let response = app
        .oneshot(chat_request(serde_json::json!({
            "messages": [{ "role": "user", "content": "hi" }]
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn thread_crud_roundtrip() {
    let state = test_state(MockBackend::default()).await;

    let response = router(state.clone())
        .oneshot(json_request(
            "POST",
            "/api/threads",
            serde_json::json!({ "name": "research" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    let id = created["id"].as_str().unwrap().to_string();

    let response = router(state.clone())
        .oneshot(json_request(
            "PATCH",
            &format!("/api/threads/{}", id),
            serde_json::json!({ "name": "renamed" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/api/threads")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let threads: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(threads[0]["name"], "renamed");

    let response = router(state.clone())
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/threads/{}", id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = router(state)
        .oneshot(
            Request::builder()
                .uri("/api/threads")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let threads: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(threads.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn health_endpoints_respond() {
    let state = test_state(MockBackend::default()).await;

    let response = router(state.clone())
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router(state)
        .oneshot(
            Request::builder()
                .uri("/readyz")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: serde_json::Value = serde_json::from_str(&body_string(response).await).unwrap();
    assert_eq!(body["status"], "ready");
}
