//! Static partitioning of the remaining frontier across workers

use crate::frontier::WorkUnit;

/// The contiguous slice of work owned by one worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerShard {
    pub worker_id: usize,
    pub units: Vec<WorkUnit>,
}

impl WorkerShard {
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

/// Splits units into `worker_count` contiguous shards of `ceil(n / worker_count)`
///
/// Concatenating the shards in worker order reproduces the input exactly.
/// Trailing shards are shorter, or empty when there are fewer units than
/// workers.
pub fn partition(units: Vec<WorkUnit>, worker_count: usize) -> Vec<WorkerShard> {
    let worker_count = worker_count.max(1);
    let chunk = units.len().div_ceil(worker_count).max(1);

    let mut shards: Vec<WorkerShard> = Vec::with_capacity(worker_count);
    let mut iter = units.into_iter();
    for worker_id in 0..worker_count {
        let units: Vec<WorkUnit> = iter.by_ref().take(chunk).collect();
        shards.push(WorkerShard { worker_id, units });
    }

    shards
}
