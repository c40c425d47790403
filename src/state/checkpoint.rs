use std::collections::HashSet;

/// The set of work unit identities already completed by earlier runs
///
/// Loaded once at run start and handed to the frontier as a read-only
/// snapshot; only the merge step ever adds to the durable copy.
#[derive(Debug, Clone, Default)]
pub struct CheckpointState {
    completed: HashSet<String>,
}

impl CheckpointState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, unit_id: &str) -> bool {
        self.completed.contains(unit_id)
    }

    pub fn len(&self) -> usize {
        self.completed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed.is_empty()
    }
}

impl FromIterator<String> for CheckpointState {
    fn from_iter<I: IntoIterator<Item = String>>(iter: I) -> Self {
        Self {
            completed: iter.into_iter().collect(),
        }
    }
}
