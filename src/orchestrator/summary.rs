//! Run outcome and summary reported to the caller

use crate::orchestrator::worker::WorkerReport;
use crate::state::TerminationReason;
use crate::storage::{MergeStats, RunCounts, RunStatus};
use std::time::Duration;

/// How a run ended, from the command line's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every unit of the frontier was already checkpointed
    NothingToDo,
    /// Every shard was drained without failures
    Completed,
    /// Shards were drained but some units failed recoverably
    PartialSuccess,
    /// A stop was requested; flushed progress was merged
    Interrupted,
    /// At least one worker could not keep a session open
    Fatal,
}

impl RunOutcome {
    /// Process exit code: only fatal runs fail
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Fatal => 2,
            _ => 0,
        }
    }

    pub fn status(&self) -> RunStatus {
        match self {
            Self::NothingToDo => RunStatus::NothingToDo,
            Self::Completed => RunStatus::Completed,
            Self::PartialSuccess => RunStatus::Partial,
            Self::Interrupted => RunStatus::Interrupted,
            Self::Fatal => RunStatus::Fatal,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NothingToDo => "nothing to do",
            Self::Completed => "completed",
            Self::PartialSuccess => "partial success",
            Self::Interrupted => "interrupted",
            Self::Fatal => "fatal",
        }
    }
}

/// Totals of one run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: i64,
    pub crawl: String,
    pub outcome: RunOutcome,
    /// Units enumerated before checkpoint exclusion
    pub frontier_size: usize,
    /// Units left after checkpoint exclusion
    pub remaining: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub abandoned: usize,
    pub unvisited: usize,
    /// Workers whose task panicked
    pub crashed_workers: Vec<usize>,
    pub merge: MergeStats,
    pub workers: Vec<WorkerReport>,
    pub elapsed: Duration,
}

impl RunSummary {
    pub(crate) fn new(run_id: i64, crawl: &str, frontier_size: usize, remaining: usize) -> Self {
        Self {
            run_id,
            crawl: crawl.to_string(),
            outcome: RunOutcome::NothingToDo,
            frontier_size,
            remaining,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            abandoned: 0,
            unvisited: 0,
            crashed_workers: Vec::new(),
            merge: MergeStats::default(),
            workers: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    pub(crate) fn add_worker(&mut self, report: WorkerReport) {
        self.attempted += report.attempted;
        self.succeeded += report.succeeded;
        self.failed += report.failed;
        self.abandoned += report.abandoned;
        self.unvisited += report.unvisited;
        self.workers.push(report);
    }

    /// Derives the outcome from worker terminations and failure counts
    pub(crate) fn resolve_outcome(&mut self, stop_requested: bool) {
        let unrecoverable = self
            .workers
            .iter()
            .any(|w| w.termination() == Some(TerminationReason::Unrecoverable));

        self.outcome = if unrecoverable || !self.crashed_workers.is_empty() {
            RunOutcome::Fatal
        } else if stop_requested && self.unvisited > 0 {
            RunOutcome::Interrupted
        } else if self.failed > 0 {
            RunOutcome::PartialSuccess
        } else {
            RunOutcome::Completed
        };
    }

    pub fn counts(&self) -> RunCounts {
        RunCounts {
            attempted: self.attempted as u64,
            succeeded: self.succeeded as u64,
            failed: self.failed as u64,
            abandoned: self.abandoned as u64,
        }
    }
}
