use clap::Parser;
use courier::adapter::UpstreamAdapter;
use courier::config::{AppState, Args};
use courier::documents::{PlainTextExtractor, VectorStoreClient};
use courier::store::{init_db, SqliteThreadStore};
use courier::types::UpstreamHealth;
use courier::upstream::OpenAiBackend;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    let _log_guard = courier::logging::init_tracing();
    courier::logging::setup_panic_hook();

    let args = Arc::new(Args::parse());

    let db = match init_db(&args.database).await {
        Ok(pool) => pool,
        Err(e) => {
            eprintln!("Failed to initialize database: {}", e);
            std::process::exit(1);
        }
    };

    let api_key = match std::env::var("OPENAI_API_KEY") {
        Ok(k) if !k.is_empty() => k,
        _ => {
            eprintln!("Error: OPENAI_API_KEY environment variable is missing or empty.");
            eprintln!("Please set it in your .env file or environment.");
            std::process::exit(1);
        }
    };
    let assistant_id = match std::env::var("ASSISTANT_ID") {
        Ok(k) if !k.is_empty() => k,
        _ => {
            eprintln!("Error: ASSISTANT_ID environment variable is missing or empty.");
            std::process::exit(1);
        }
    };
    let vector_store_id = match std::env::var("VECTOR_STORE_ID") {
        Ok(k) if !k.is_empty() => k,
        _ => {
            eprintln!("Error: VECTOR_STORE_ID environment variable is missing or empty.");
            std::process::exit(1);
        }
    };

    let client = match reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(args.request_timeout_secs))
        .connect_timeout(std::time::Duration::from_secs(args.connect_timeout_secs))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .pool_max_idle_per_host(10)
        .tcp_keepalive(Some(std::time::Duration::from_secs(60)))
        .build()
    {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Failed to build HTTP client: {}", e);
            std::process::exit(1);
        }
    };

    let backend = Arc::new(OpenAiBackend::new(
        client.clone(),
        api_key.clone(),
        assistant_id,
    ));
    let adapter = UpstreamAdapter::new(backend, args.adapter_config());

    let state = Arc::new(AppState {
        client: client.clone(),
        db: db.clone(),
        adapter,
        threads: Arc::new(SqliteThreadStore::new(db)),
        documents: Arc::new(VectorStoreClient::new(client, api_key, vector_store_id)),
        extractor: Arc::new(PlainTextExtractor),
        health: Arc::new(UpstreamHealth::default()),
        args: args.clone(),
    });

    let app = courier::relay::router(state);

    let addr = format!("{}:{}", args.host, args.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!("Failed to bind to {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    tracing::info!("Courier listening on {}", addr);
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
