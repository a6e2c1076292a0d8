use crate::adapter::{AdapterConfig, UpstreamAdapter};
use crate::constants::{DEFAULT_CHUNK_SIZE, DEFAULT_MAX_POLLS, POLL_INTERVAL_SECS, SYNTHETIC_DELAY_MS};
use crate::documents::{DocumentStore, TextExtractor};
use crate::store::{DbPool, ThreadStore};
use crate::types::UpstreamHealth;
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[arg(long, default_value_t = 8080)]
    pub port: u16,
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
    #[arg(long, default_value = "courier.db")]
    pub database: String,
    #[arg(long, default_value_t = 120)]
    pub request_timeout_secs: u64,
    #[arg(long, default_value_t = 10)]
    pub connect_timeout_secs: u64,
    #[arg(long, default_value_t = 50 * 1024 * 1024)]
    pub max_body_size: usize,
    #[arg(long, default_value_t = 3)]
    pub max_retries: u32,
    /// Answer from the retrieval corpus with citation gating instead of
    /// the streaming retrieval-with-fallback path.
    #[arg(long, default_value_t = false)]
    pub confirmed_source: bool,
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
    #[arg(long, default_value_t = DEFAULT_MAX_POLLS)]
    pub max_polls: u32,
}

impl Args {
    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            confirmed_source: self.confirmed_source,
            // A zero chunk size from the command line must not stall
            // re-chunked emission.
            chunk_size: self.chunk_size.max(1),
            poll_interval: Duration::from_secs(POLL_INTERVAL_SECS),
            max_polls: self.max_polls,
            synthetic_delay: Duration::from_millis(SYNTHETIC_DELAY_MS),
            max_retries: self.max_retries,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub client: reqwest::Client,
    pub db: DbPool,
    pub adapter: UpstreamAdapter,
    pub threads: Arc<dyn ThreadStore>,
    pub documents: Arc<dyn DocumentStore>,
    pub extractor: Arc<dyn TextExtractor>,
    pub health: Arc<UpstreamHealth>,
    pub args: Arc<Args>,
}
