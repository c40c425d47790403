use crate::frontier::{remaining, WorkUnit};
use crate::state::CheckpointState;

/// Frontier over a pre-enumerated list of targets
///
/// Yields exactly the targets missing from the checkpoint, in their original
/// relative order. Blank targets are skipped and repeats collapse onto their
/// first occurrence.
#[derive(Debug, Clone)]
pub struct FlatFrontier {
    targets: Vec<String>,
    checkpoint: CheckpointState,
}

impl FlatFrontier {
    pub fn new(targets: Vec<String>, checkpoint: CheckpointState) -> Self {
        Self {
            targets,
            checkpoint,
        }
    }

    /// Builds the frontier from a text file holding one target per line
    pub fn from_targets_file(
        path: &std::path::Path,
        checkpoint: CheckpointState,
    ) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let targets = content.lines().map(str::to_string).collect();
        Ok(Self::new(targets, checkpoint))
    }

    pub fn enumerate(self) -> Vec<WorkUnit> {
        let units = self
            .targets
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .map(WorkUnit::new)
            .collect();
        remaining(units, &self.checkpoint)
    }
}
