//! Statistics generation from the result store
//!
//! This module provides functionality for extracting and displaying
//! per-crawl statistics from the storage layer.

use crate::storage::{RunRecord, Storage, StorageResult};

/// Statistics of one crawl in the store
#[derive(Debug, Clone)]
pub struct CrawlStatistics {
    pub crawl: String,

    /// Merged records
    pub records: u64,

    /// Work units in the checkpoint
    pub completed_units: u64,

    /// Work units whose latest attempt failed
    pub failed_units: u64,

    /// Most recent run, if any
    pub latest_run: Option<RunRecord>,
}

/// Statistics of the whole store
#[derive(Debug, Clone, Default)]
pub struct StoreStatistics {
    pub crawls: Vec<CrawlStatistics>,
}

impl StoreStatistics {
    pub fn total_records(&self) -> u64 {
        self.crawls.iter().map(|c| c.records).sum()
    }
}

/// Loads statistics of every crawl found in storage
pub fn load_statistics(storage: &dyn Storage) -> StorageResult<StoreStatistics> {
    let mut crawls = Vec::new();

    for crawl in storage.crawl_names()? {
        crawls.push(CrawlStatistics {
            records: storage.count_records(&crawl)?,
            completed_units: storage.count_checkpoint(&crawl)?,
            failed_units: storage.count_failures(&crawl)?,
            latest_run: storage.get_latest_run(&crawl)?,
            crawl,
        });
    }

    Ok(StoreStatistics { crawls })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &StoreStatistics) {
    println!("=== Store Statistics ===\n");

    if stats.crawls.is_empty() {
        println!("No crawls recorded yet.");
        return;
    }

    for crawl in &stats.crawls {
        println!("Crawl: {}", crawl.crawl);
        println!("  Records: {}", crawl.records);
        println!("  Completed units: {}", crawl.completed_units);
        println!("  Failed units (retried next run): {}", crawl.failed_units);

        if let Some(run) = &crawl.latest_run {
            println!(
                "  Latest run: #{} ({}), started {}",
                run.id,
                run.status.to_db_string(),
                run.started_at
            );
            if let Some(finished) = &run.finished_at {
                println!("    Finished: {}", finished);
            }
            println!(
                "    Attempted: {}, succeeded: {}, failed: {}, abandoned: {}",
                run.counts.attempted,
                run.counts.succeeded,
                run.counts.failed,
                run.counts.abandoned
            );
        }
        println!();
    }

    println!("Total records: {}", stats.total_records());
}
