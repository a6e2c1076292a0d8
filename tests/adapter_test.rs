mod common;

use common::MockBackend;
use courier::adapter::{AdapterConfig, UpstreamAdapter};
use courier::types::{ChatMessage, RequestMode, Role};
use courier::upstream::RunStatus;
use futures_util::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

fn test_config(confirmed_source: bool) -> AdapterConfig {
    AdapterConfig {
        confirmed_source,
        chunk_size: 512,
        poll_interval: Duration::from_millis(1),
        max_polls: 5,
        synthetic_delay: Duration::from_millis(0),
        max_retries: 1,
    }
}

async fn collect(adapter: &UpstreamAdapter, mode: RequestMode, history: Vec<ChatMessage>) -> Vec<String> {
    let mut stream = adapter.dispatch(mode, history, 0.2).await.unwrap();
    let mut out = Vec::new();
    while let Some(item) = stream.next().await {
        out.push(item.unwrap());
    }
    out
}

#[tokio::test]
async fn attached_file_message_selects_file_grounded_mode() {
    let backend = Arc::new(MockBackend::default());
    let adapter = UpstreamAdapter::new(backend, test_config(false));

    let history = vec![ChatMessage::new(
        Role::User,
        "Attached file (notes.txt):\n\nAlpha beta gamma.\n\nUser query: what is beta?",
    )];
    let mode = adapter.select_mode(&history);
    match mode {
        RequestMode::FileGrounded { name, body, query } => {
            assert_eq!(name, "notes.txt");
            assert_eq!(body, "Alpha beta gamma.");
            assert_eq!(query, "what is beta?");
        }
        other => panic!("Expected FileGrounded, got {:?}", other),
    }
}

#[tokio::test]
async fn file_grounded_sends_document_as_system_context() {
    let backend = Arc::new(MockBackend {
        completion_deltas: vec!["beta is ".to_string(), "a letter".to_string()],
        ..Default::default()
    });
    let adapter = UpstreamAdapter::new(backend.clone(), test_config(false));

    let mode = RequestMode::FileGrounded {
        name: "notes.txt".to_string(),
        body: "Alpha beta gamma.".to_string(),
        query: "what is beta?".to_string(),
    };
    let deltas = collect(&adapter, mode, Vec::new()).await;
    assert_eq!(deltas, vec!["beta is ", "a letter"]);

    let sent = backend.completion_messages.lock().unwrap();
    let messages = &sent[0];
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].role, Role::System);
    assert!(messages[0].content.contains("Alpha beta gamma."));
    assert_eq!(messages[1].role, Role::User);
    assert_eq!(messages[1].content, "what is beta?");
}

#[tokio::test]
async fn refusal_answer_triggers_completion_fallback() {
    let backend = Arc::new(MockBackend {
        run_deltas: vec!["I do not have that information.".to_string()],
        completion_deltas: vec!["Paris is ".to_string(), "the capital.".to_string()],
        ..Default::default()
    });
    let adapter = UpstreamAdapter::new(backend.clone(), test_config(false));

    let history = vec![ChatMessage::new(Role::User, "capital of France?")];
    let deltas = collect(&adapter, RequestMode::Retrieval, history).await;

    // Retrieval output is forwarded first, then the fallback continues
    // the same sequence.
    assert_eq!(
        deltas,
        vec![
            "I do not have that information.",
            "Paris is ",
            "the capital."
        ]
    );
    assert!(backend.called("stream_completion"));
}

#[tokio::test]
async fn useful_answer_suppresses_fallback() {
    let backend = Arc::new(MockBackend {
        run_deltas: vec!["The capital ".to_string(), "is Paris.".to_string()],
        completion_deltas: vec!["should not appear".to_string()],
        ..Default::default()
    });
    let adapter = UpstreamAdapter::new(backend.clone(), test_config(false));

    let history = vec![ChatMessage::new(Role::User, "capital of France?")];
    let deltas = collect(&adapter, RequestMode::Retrieval, history).await;

    assert_eq!(deltas, vec!["The capital ", "is Paris."]);
    assert!(!backend.called("stream_completion"));
}

#[tokio::test]
async fn empty_run_output_triggers_fallback() {
    let backend = Arc::new(MockBackend {
        run_deltas: Vec::new(),
        completion_deltas: vec!["fallback".to_string()],
        ..Default::default()
    });
    let adapter = UpstreamAdapter::new(backend.clone(), test_config(false));

    let history = vec![ChatMessage::new(Role::User, "anything")];
    let deltas = collect(&adapter, RequestMode::Retrieval, history).await;
    assert_eq!(deltas, vec!["fallback"]);
}

#[tokio::test]
async fn history_is_replayed_onto_the_thread() {
    let backend = Arc::new(MockBackend {
        run_deltas: vec!["Answer.".to_string()],
        ..Default::default()
    });
    let adapter = UpstreamAdapter::new(backend.clone(), test_config(false));

    let history = vec![
        ChatMessage::new(Role::User, "first"),
        ChatMessage::new(Role::Assistant, "reply"),
        ChatMessage::new(Role::User, "second"),
    ];
    let _ = collect(&adapter, RequestMode::Retrieval, history).await;

    let appended = backend.appended.lock().unwrap();
    assert_eq!(appended.len(), 3);
    assert_eq!(appended[0], (Role::User, "first".to_string()));
    assert_eq!(appended[2], (Role::User, "second".to_string()));
}

#[tokio::test]
async fn cited_answer_is_rechunked_into_synthetic_deltas() {
    // 1290 chars of filler plus a 10-char citation marker: 1300 total.
    let answer = format!("{}{}", "x".repeat(1290), "【12:3†doc】");
    assert_eq!(answer.chars().count(), 1300);

    let backend = Arc::new(MockBackend {
        latest_text: answer.clone(),
        run_statuses: scripted_statuses(vec![RunStatus::InProgress, RunStatus::Completed]),
        complete_text: "should not appear".to_string(),
        ..Default::default()
    });
    let adapter = UpstreamAdapter::new(backend.clone(), test_config(true));

    let history = vec![ChatMessage::new(Role::User, "q")];
    let deltas = collect(&adapter, RequestMode::ConfirmedSource, history).await;

    let lens: Vec<usize> = deltas.iter().map(|d| d.chars().count()).collect();
    assert_eq!(lens, vec![512, 512, 276]);
    assert_eq!(deltas.concat(), answer);
    assert!(!backend.called("complete"));
}

#[tokio::test]
async fn uncited_answer_falls_back_to_plain_completion() {
    let backend = Arc::new(MockBackend {
        latest_text: "An answer with no sources attached.".to_string(),
        complete_text: "plain completion answer".to_string(),
        ..Default::default()
    });
    let adapter = UpstreamAdapter::new(backend.clone(), test_config(true));

    let history = vec![ChatMessage::new(Role::User, "q")];
    let deltas = collect(&adapter, RequestMode::ConfirmedSource, history).await;

    assert_eq!(deltas, vec!["plain completion answer"]);
    assert!(backend.called("complete"));
}

#[tokio::test]
async fn failed_run_falls_back_to_plain_completion() {
    let backend = Arc::new(MockBackend {
        run_statuses: scripted_statuses(vec![RunStatus::Failed]),
        complete_text: "fallback".to_string(),
        ..Default::default()
    });
    let adapter = UpstreamAdapter::new(backend.clone(), test_config(true));

    let history = vec![ChatMessage::new(Role::User, "q")];
    let deltas = collect(&adapter, RequestMode::ConfirmedSource, history).await;
    assert_eq!(deltas, vec!["fallback"]);
    assert!(!backend.called("latest_message_text"));
}

#[tokio::test]
async fn stuck_run_exhausts_the_poll_bound() {
    let backend = Arc::new(MockBackend {
        run_statuses: scripted_statuses(vec![RunStatus::InProgress; 50]),
        ..Default::default()
    });
    let adapter = UpstreamAdapter::new(backend, test_config(true));

    let history = vec![ChatMessage::new(Role::User, "q")];
    let result = adapter
        .dispatch(RequestMode::ConfirmedSource, history, 0.2)
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn pre_stream_thread_failure_is_surfaced() {
    let backend = Arc::new(MockBackend {
        fail_create_thread: true,
        ..Default::default()
    });
    let adapter = UpstreamAdapter::new(backend, test_config(false));

    let history = vec![ChatMessage::new(Role::User, "q")];
    let result = adapter.dispatch(RequestMode::Retrieval, history, 0.2).await;
    assert!(result.is_err());
}

fn scripted_statuses(statuses: Vec<RunStatus>) -> std::sync::Mutex<VecDeque<RunStatus>> {
    std::sync::Mutex::new(statuses.into_iter().collect())
}
