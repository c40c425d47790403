//! Storage module for the canonical result store
//!
//! This module handles all database operations, including:
//! - Run tracking and run summaries
//! - The checkpoint (completed work units per crawl)
//! - Canonical merged records
//! - Applying merge frames atomically

mod schema;
mod sqlite;
mod traits;

pub use sqlite::SqliteStorage;
pub use traits::{Storage, StorageError, StorageResult};

use std::path::Path;

/// Initializes or opens a storage database
pub fn open_storage(path: &Path) -> StorageResult<SqliteStorage> {
    SqliteStorage::new(path)
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub crawl: String,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub counts: RunCounts,
}

/// Work unit tallies of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunCounts {
    pub attempted: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub abandoned: u64,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Partial,
    Fatal,
    Interrupted,
    NothingToDo,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Fatal => "fatal",
            Self::Interrupted => "interrupted",
            Self::NothingToDo => "nothing_to_do",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "fatal" => Some(Self::Fatal),
            "interrupted" => Some(Self::Interrupted),
            "nothing_to_do" => Some(Self::NothingToDo),
            _ => None,
        }
    }
}

/// Field patch applied to another crawl's records during merge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPatch {
    pub target_crawl: String,
    pub field: String,
}

/// What one merge changed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    pub frames_applied: u64,
    pub frames_skipped: u64,
    pub units_completed: u64,
    pub units_failed: u64,
    pub records_written: u64,
    pub fields_patched: u64,
}
