#![allow(dead_code)]

use axum::http::StatusCode;
use courier::types::{ChatMessage, CourierError, Result, Role};
use courier::upstream::{ChatBackend, DeltaStream, RunStatus};
use futures_util::future::BoxFuture;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Scripted backend: each method returns preconfigured data and records
/// that it was called.
pub struct MockBackend {
    pub completion_deltas: Vec<String>,
    pub complete_text: String,
    pub run_deltas: Vec<String>,
    pub run_statuses: Mutex<VecDeque<RunStatus>>,
    pub latest_text: String,
    pub fail_create_thread: bool,
    pub calls: Mutex<Vec<String>>,
    pub completion_messages: Mutex<Vec<Vec<ChatMessage>>>,
    pub appended: Mutex<Vec<(Role, String)>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self {
            completion_deltas: Vec::new(),
            complete_text: String::new(),
            run_deltas: Vec::new(),
            run_statuses: Mutex::new(VecDeque::new()),
            latest_text: String::new(),
            fail_create_thread: false,
            calls: Mutex::new(Vec::new()),
            completion_messages: Mutex::new(Vec::new()),
            appended: Mutex::new(Vec::new()),
        }
    }
}

impl MockBackend {
    pub fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|c| c == call)
    }

    fn delta_stream(deltas: &[String]) -> DeltaStream {
        let items: Vec<Result<String>> = deltas.iter().cloned().map(Ok).collect();
        Box::pin(futures_util::stream::iter(items))
    }
}

impl ChatBackend for MockBackend {
    fn stream_completion<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        _temperature: f32,
    ) -> BoxFuture<'a, Result<DeltaStream>> {
        Box::pin(async move {
            self.record("stream_completion");
            self.completion_messages
                .lock()
                .unwrap()
                .push(messages.to_vec());
            Ok(Self::delta_stream(&self.completion_deltas))
        })
    }

    fn complete<'a>(
        &'a self,
        messages: &'a [ChatMessage],
        _temperature: f32,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.record("complete");
            self.completion_messages
                .lock()
                .unwrap()
                .push(messages.to_vec());
            Ok(self.complete_text.clone())
        })
    }

    fn create_thread(&self) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            self.record("create_thread");
            if self.fail_create_thread {
                return Err(CourierError::Upstream(
                    StatusCode::UNAUTHORIZED,
                    "invalid api key".to_string(),
                )
                .into());
            }
            Ok("thread_mock".to_string())
        })
    }

    fn append_thread_message<'a>(
        &'a self,
        _thread_id: &'a str,
        role: Role,
        content: &'a str,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            self.record("append_thread_message");
            self.appended
                .lock()
                .unwrap()
                .push((role, content.to_string()));
            Ok(())
        })
    }

    fn stream_run<'a>(&'a self, _thread_id: &'a str) -> BoxFuture<'a, Result<DeltaStream>> {
        Box::pin(async move {
            self.record("stream_run");
            Ok(Self::delta_stream(&self.run_deltas))
        })
    }

    fn start_run<'a>(&'a self, _thread_id: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.record("start_run");
            Ok("run_mock".to_string())
        })
    }

    fn run_status<'a>(
        &'a self,
        _thread_id: &'a str,
        _run_id: &'a str,
    ) -> BoxFuture<'a, Result<RunStatus>> {
        Box::pin(async move {
            self.record("run_status");
            let next = self.run_statuses.lock().unwrap().pop_front();
            Ok(next.unwrap_or(RunStatus::Completed))
        })
    }

    fn latest_message_text<'a>(&'a self, _thread_id: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            self.record("latest_message_text");
            Ok(self.latest_text.clone())
        })
    }
}
