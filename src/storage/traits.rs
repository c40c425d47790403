//! Storage traits and error types

use crate::extract::Record;
use crate::orchestrator::FlushFrame;
use crate::state::CheckpointState;
use crate::storage::{FieldPatch, MergeStats, RunCounts, RunRecord, RunStatus};
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Trait for storage backend implementations
///
/// Only the orchestrator holds a storage handle; workers never see it.
pub trait Storage {
    // ===== Run Management =====

    /// Creates a new run for a crawl and returns its ID
    fn create_run(&mut self, crawl: &str, config_hash: &str) -> StorageResult<i64>;

    /// Gets a run by ID
    fn get_run(&self, run_id: i64) -> StorageResult<RunRecord>;

    /// Gets the most recent run of a crawl
    fn get_latest_run(&self, crawl: &str) -> StorageResult<Option<RunRecord>>;

    /// Stores the final status and counts of a run
    fn finish_run(&mut self, run_id: i64, status: RunStatus, counts: RunCounts)
        -> StorageResult<()>;

    // ===== Checkpoint =====

    /// Loads the identities of every completed work unit of a crawl
    fn load_checkpoint(&self, crawl: &str) -> StorageResult<CheckpointState>;

    fn count_checkpoint(&self, crawl: &str) -> StorageResult<u64>;

    // ===== Records =====

    /// All merged records of a crawl, in store order
    fn get_records(&self, crawl: &str) -> StorageResult<Vec<Record>>;

    fn count_records(&self, crawl: &str) -> StorageResult<u64>;

    /// Non-null values of `field` across a crawl's records, in store order
    fn field_values(&self, crawl: &str, field: &str) -> StorageResult<Vec<String>>;

    /// Units of a crawl having at least one record whose `field` is absent or null
    fn units_missing_field(&self, crawl: &str, field: &str) -> StorageResult<Vec<String>>;

    // ===== Failures =====

    fn count_failures(&self, crawl: &str) -> StorageResult<u64>;

    /// Unit IDs whose latest attempt failed and that are not checkpointed
    fn failed_units(&self, crawl: &str) -> StorageResult<Vec<String>>;

    // ===== Merge =====

    /// Applies flush frames in the given order, atomically
    ///
    /// Frames already applied earlier are skipped. Completed units replace
    /// their previous records and join the checkpoint; failed units are
    /// recorded unless already checkpointed.
    fn apply_frames(
        &mut self,
        crawl: &str,
        patch: Option<&FieldPatch>,
        frames: &[FlushFrame],
    ) -> StorageResult<MergeStats>;

    // ===== Statistics =====

    /// Names of every crawl with runs or records in the store
    fn crawl_names(&self) -> StorageResult<Vec<String>>;
}
