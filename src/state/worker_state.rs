/// Worker lifecycle states
///
/// `Idle -> Running -> {Flushing <-> Running} -> Draining -> Terminated`, with
/// a direct `Running | Idle -> Terminated(Unrecoverable)` escape when no
/// session can be opened.
use crate::CrawlError;
use std::fmt;

/// Why a worker stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// Every unit of the shard was attempted
    Exhausted,
    /// An external stop signal was observed
    Stopped,
    /// Sessions could not be (re)opened within the retry budget
    Unrecoverable,
}

/// Represents the current state of a worker loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerState {
    /// Created, no session yet
    Idle,

    /// Pulling and processing work units
    Running,

    /// Persisting the in-memory batch
    Flushing,

    /// Shard exhausted or stop requested; final flush and session close pending
    Draining,

    /// Finished; no further transitions
    Terminated(TerminationReason),
}

impl WorkerState {
    /// Returns true if the worker has stopped for good
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated(_))
    }

    /// Checks whether moving to `next` is a legal transition
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Idle, Running)
                | (Running, Running)
                | (Running, Flushing)
                | (Flushing, Running)
                | (Flushing, Draining)
                | (Running, Draining)
                | (Draining, Flushing)
                | (Draining, Terminated(_))
                | (Flushing, Terminated(_))
                | (Idle, Terminated(TerminationReason::Unrecoverable))
                | (Idle, Terminated(TerminationReason::Stopped))
                | (Running, Terminated(TerminationReason::Unrecoverable))
        )
    }

    /// Performs a transition, rejecting illegal ones
    pub fn transition(&mut self, next: WorkerState) -> Result<(), CrawlError> {
        if !self.can_transition_to(next) {
            return Err(CrawlError::InvalidTransition {
                from: *self,
                to: next,
            });
        }
        *self = next;
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Flushing => "flushing",
            Self::Draining => "draining",
            Self::Terminated(TerminationReason::Exhausted) => "terminated(exhausted)",
            Self::Terminated(TerminationReason::Stopped) => "terminated(stopped)",
            Self::Terminated(TerminationReason::Unrecoverable) => "terminated(unrecoverable)",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
