//! Worker batches and the partial files they are flushed to
//!
//! Each flush appends one JSON line (a `FlushFrame`) to the worker's partial
//! file and syncs it. A frame is the unit of durability: merge either sees a
//! whole frame or, for a torn line, nothing of it.

use crate::extract::Record;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Result of processing one work unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UnitOutcome {
    /// The page was fetched and extracted (possibly into zero records)
    Completed { unit_id: String, records: Vec<Record> },
    /// The fetch failed recoverably; the unit stays eligible for a later run
    Failed {
        unit_id: String,
        kind: String,
        reason: String,
    },
}

impl UnitOutcome {
    pub fn unit_id(&self) -> &str {
        match self {
            Self::Completed { unit_id, .. } | Self::Failed { unit_id, .. } => unit_id,
        }
    }

    pub fn record_count(&self) -> usize {
        match self {
            Self::Completed { records, .. } => records.len(),
            Self::Failed { .. } => 0,
        }
    }
}

/// One durable flush of a worker's batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushFrame {
    pub run_id: i64,
    pub worker_id: usize,
    pub seq: u64,
    pub flushed_at: DateTime<Utc>,
    pub entries: Vec<UnitOutcome>,
}

impl FlushFrame {
    /// Merge order: flush time first, then run, worker and per-worker sequence
    pub fn order_key(&self) -> (DateTime<Utc>, i64, usize, u64) {
        (self.flushed_at, self.run_id, self.worker_id, self.seq)
    }
}

/// Append-only buffer of unit outcomes owned by one worker
#[derive(Debug, Default)]
pub struct Batch {
    entries: Vec<UnitOutcome>,
    records: usize,
    weight: usize,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, outcome: UnitOutcome) {
        self.records += outcome.record_count();
        self.weight += outcome.record_count().max(1);
        self.entries.push(outcome);
    }

    /// Records buffered since the last flush
    pub fn record_count(&self) -> usize {
        self.records
    }

    /// Flush threshold measure: records, counting a unit without records as one
    pub fn weight(&self) -> usize {
        self.weight
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.records = 0;
        self.weight = 0;
    }
}

/// File name of a worker's partial output
pub fn partial_file_name(crawl: &str, run_id: i64, worker_id: usize) -> String {
    format!("{}-run{}-worker{}.jsonl", crawl, run_id, worker_id)
}

/// Parses `(run_id, worker_id)` back out of a partial file name for `crawl`
pub fn parse_partial_file_name(crawl: &str, file_name: &str) -> Option<(i64, usize)> {
    let rest = file_name
        .strip_prefix(crawl)?
        .strip_prefix("-run")?
        .strip_suffix(".jsonl")?;
    let (run, worker) = rest.split_once("-worker")?;
    Some((run.parse().ok()?, worker.parse().ok()?))
}

/// Byte sink a partial file is written through
pub trait FrameSink {
    /// Current length in bytes
    fn size(&self) -> std::io::Result<u64>;

    fn append(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Makes everything appended so far durable
    fn sync(&mut self) -> std::io::Result<()>;

    /// Cuts the sink back to `len` bytes
    fn truncate(&mut self, len: u64) -> std::io::Result<()>;
}

impl FrameSink for File {
    fn size(&self) -> std::io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn append(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.write_all(bytes)
    }

    fn sync(&mut self) -> std::io::Result<()> {
        self.sync_data()
    }

    fn truncate(&mut self, len: u64) -> std::io::Result<()> {
        self.set_len(len)
    }
}

/// Appends flush frames to one worker's partial file
///
/// Every attempt takes a fresh sequence number, so a frame retried after a
/// failed attempt can never collide with one merge has already seen.
#[derive(Debug)]
pub struct PartialWriter<S = File> {
    path: PathBuf,
    sink: S,
    run_id: i64,
    worker_id: usize,
    next_seq: u64,
    flushes: u64,
}

impl PartialWriter<File> {
    /// Creates (or reopens for append) the partial file of a worker
    pub fn create(dir: &Path, crawl: &str, run_id: i64, worker_id: usize) -> std::io::Result<Self> {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(partial_file_name(crawl, run_id, worker_id));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self::with_sink(path, file, run_id, worker_id))
    }
}

impl<S: FrameSink> PartialWriter<S> {
    pub fn with_sink(path: PathBuf, sink: S, run_id: i64, worker_id: usize) -> Self {
        Self {
            path,
            sink,
            run_id,
            worker_id,
            next_seq: 0,
            flushes: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Successful flushes so far
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Durably writes the batch as one frame and empties it
    ///
    /// Returns the number of records written. On error the sink is cut back
    /// to its length before the attempt and the batch is left untouched, so
    /// the next flush retries it on a clean line.
    pub fn flush(&mut self, batch: &mut Batch) -> std::io::Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let frame = FlushFrame {
            run_id: self.run_id,
            worker_id: self.worker_id,
            seq,
            flushed_at: Utc::now(),
            entries: batch.entries.clone(),
        };
        let mut line = serde_json::to_string(&frame)?;
        line.push('\n');

        let start = self.sink.size()?;
        if let Err(e) = self.append_durably(line.as_bytes()) {
            if let Err(rollback) = self.sink.truncate(start) {
                tracing::error!(
                    "Could not roll back {} to {} bytes: {}",
                    self.path.display(),
                    start,
                    rollback
                );
            }
            return Err(e);
        }

        self.flushes += 1;
        let written = batch.record_count();
        batch.clear();
        Ok(written)
    }

    fn append_durably(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.sink.append(bytes)?;
        self.sink.sync()
    }
}

/// Reads every complete frame of a partial file
///
/// A line that does not parse is a flush cut short by a crash or a failed
/// write. It is skipped and the frames around it are kept.
pub fn read_partial(path: &Path) -> std::io::Result<Vec<FlushFrame>> {
    let content = std::fs::read_to_string(path)?;
    let mut frames = Vec::new();

    for (index, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<FlushFrame>(line) {
            Ok(frame) => frames.push(frame),
            Err(e) => tracing::warn!(
                "Skipping torn frame at line {} of {}: {}",
                index + 1,
                path.display(),
                e
            ),
        }
    }

    Ok(frames)
}
