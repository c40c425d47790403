//! Frontier: the work units a run has to visit
//!
//! Two variants exist:
//! - `PaginatedFrontier` discovers how many result pages each seed has and
//!   yields one unit per page
//! - `FlatFrontier` yields a pre-enumerated list of targets minus the checkpoint
//!
//! Both are consumed by `enumerate`, so a frontier can only be walked once per run.

mod flat;
mod paginated;

pub use flat::FlatFrontier;
pub use paginated::{discover_page_count, page_target, PageProbe, PaginatedFrontier};

use crate::state::CheckpointState;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// One addressable target to fetch
///
/// The target string is the unit's identity: it is used for deduplication,
/// as the checkpoint key and as the merge key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkUnit {
    target: String,
}

impl WorkUnit {
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn id(&self) -> &str {
        &self.target
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.target)
    }
}

/// Removes checkpointed and repeated units, keeping first occurrences in order
pub fn remaining(units: Vec<WorkUnit>, checkpoint: &CheckpointState) -> Vec<WorkUnit> {
    let mut seen = HashSet::new();
    units
        .into_iter()
        .filter(|unit| !checkpoint.contains(unit.id()))
        .filter(|unit| seen.insert(unit.id().to_string()))
        .collect()
}
