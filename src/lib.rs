//! Listing Crawler: resumable, sharded collection of classifieds listings
//!
//! This crate drives a fixed number of isolated browser sessions over a
//! partitioned work set, extracts fielded records from rendered pages,
//! checkpoints progress into per-worker partial files and merges them into a
//! canonical SQLite store.

pub mod config;
pub mod extract;
pub mod frontier;
pub mod orchestrator;
pub mod output;
pub mod session;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for crawl operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Merge error: {0}")]
    Merge(#[from] orchestrator::MergeError),

    #[error("Unknown crawl: {0}")]
    UnknownCrawl(String),

    #[error("Source crawl '{0}' has no merged records")]
    EmptySource(String),

    #[error("Invalid worker state transition: {from} -> {to}")]
    InvalidTransition {
        from: state::WorkerState,
        to: state::WorkerState,
    },

    #[error("Worker {worker_id} panicked: {message}")]
    WorkerPanic { worker_id: usize, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),
}

/// Result type alias for crawl operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use extract::Record;
pub use frontier::WorkUnit;
pub use orchestrator::{Orchestrator, RunOutcome, RunSummary};
pub use state::WorkerState;
