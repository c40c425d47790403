//! Orchestration of a sharded, resumable crawl run
//!
//! This module contains:
//! - Static partitioning of the remaining frontier into worker shards
//! - The worker loop and its batches and partial files
//! - The merge of partial files into the canonical store
//! - The `Orchestrator` tying a run together

mod batch;
mod coordinator;
mod merge;
mod shard;
mod summary;
mod worker;

#[cfg(test)]
pub(crate) mod testing;

pub use batch::{
    partial_file_name, read_partial, Batch, FlushFrame, FrameSink, PartialWriter, UnitOutcome,
};
pub use coordinator::Orchestrator;
pub use merge::{collect_frames, leftover_partials, merge_partials, MergeError};
pub use shard::{partition, WorkerShard};
pub use summary::{RunOutcome, RunSummary};
pub use worker::{Worker, WorkerReport, WorkerSettings};
