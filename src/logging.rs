use axum::{
    body::Body,
    http::{Request, Response},
    middleware::Next,
};
use std::panic;
use tracing::{error, info, info_span, Instrument};
use tracing_subscriber::prelude::*;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-courier-request-id";

/// Initializes the tracing stack: env filter, stderr fmt layer, daily
/// rolling file, and span-trace capture for error reports. The returned
/// guard must be held for the life of the process or the file writer
/// stops flushing.
pub fn init_tracing() -> tracing_appender::non_blocking::WorkerGuard {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => "courier=info".into(),
    };

    let file_appender = tracing_appender::rolling::daily(".", "courier.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false),
        )
        .with(tracing_error::ErrorLayer::default())
        .init();

    guard
}

/// Global panic hook that routes panics through tracing before the
/// default hook runs.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Tags every request with a fresh id, exposed both as a span field and
/// as a response-correlatable header.
pub async fn request_id_middleware(mut req: Request<Body>, next: Next) -> Response<Body> {
    let request_id = Uuid::new_v4().to_string();
    if let Ok(val) = request_id.parse() {
        req.headers_mut().insert(REQUEST_ID_HEADER, val);
    }

    let span = info_span!("request", request_id = %request_id);
    next.run(req).instrument(span).await
}

/// End-of-stream accounting for one relay session.
#[derive(Default)]
pub struct StreamMetric {
    pub deltas: usize,
    pub text_chars: usize,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_delta(&mut self, delta: &str) {
        self.deltas += 1;
        self.text_chars += delta.len();
    }

    pub fn log_summary(&self, request_id: &str, outcome: &str) {
        info!(
            "[STREAM END] Request: {} | Outcome: {} | Deltas: {} | Text: {} chars",
            request_id, outcome, self.deltas, self.text_chars
        );
    }
}
