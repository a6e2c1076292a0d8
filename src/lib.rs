pub mod adapter;
pub mod config;
pub mod constants;
pub mod consumer;
pub mod conversation;
pub mod documents;
pub mod framing;
pub mod health;
pub mod heuristics;
pub mod logging;
pub mod relay;
pub mod retry;
pub mod store;
pub mod types;
pub mod upstream;

pub use types::*;

pub use config::{AppState, Args};
