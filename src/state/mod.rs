//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `WorkerState`: lifecycle of one worker loop (idle, running, flushing, draining, terminated)
//! - `CheckpointState`: the read-only snapshot of work units completed by earlier runs

mod checkpoint;
mod worker_state;

pub use checkpoint::CheckpointState;
pub use worker_state::{TerminationReason, WorkerState};
