//! Output module for run summaries and store reports
//!
//! This module handles:
//! - Printing the summary of a finished run
//! - Reading and printing per-crawl statistics of the store

pub mod stats;

pub use stats::{load_statistics, print_statistics, CrawlStatistics, StoreStatistics};

use crate::orchestrator::{RunOutcome, RunSummary};

/// Prints a run summary to stdout
pub fn print_run_summary(summary: &RunSummary) {
    println!("=== Run Summary ===\n");
    println!("Crawl: {} (run #{})", summary.crawl, summary.run_id);
    println!("Outcome: {}", summary.outcome.as_str());

    if summary.outcome == RunOutcome::NothingToDo {
        println!(
            "All {} unit(s) of the frontier were already completed.",
            summary.frontier_size
        );
        return;
    }

    println!(
        "Frontier: {} unit(s), {} remaining at start",
        summary.frontier_size, summary.remaining
    );
    println!("Attempted: {}", summary.attempted);
    println!("Succeeded: {}", summary.succeeded);
    println!("Failed (retried next run): {}", summary.failed);
    if summary.abandoned > 0 {
        println!("Abandoned (no session): {}", summary.abandoned);
    }
    if summary.unvisited > 0 {
        println!("Not visited (stopped): {}", summary.unvisited);
    }
    if !summary.crashed_workers.is_empty() {
        println!("Crashed workers: {:?}", summary.crashed_workers);
    }

    println!();
    println!("Workers:");
    for worker in &summary.workers {
        println!(
            "  #{}: {} unit(s), {} succeeded, {} failed, {} flush(es), {} session(s), {}",
            worker.worker_id,
            worker.shard_size,
            worker.succeeded,
            worker.failed,
            worker.flushes,
            worker.sessions_opened,
            worker.final_state
        );
    }

    println!();
    println!(
        "Merged: {} frame(s), {} record(s), {} unit(s) checkpointed",
        summary.merge.frames_applied, summary.merge.records_written, summary.merge.units_completed
    );
    if summary.merge.fields_patched > 0 {
        println!("Patched fields: {}", summary.merge.fields_patched);
    }
    println!("Elapsed: {:.1}s", summary.elapsed.as_secs_f64());
}
