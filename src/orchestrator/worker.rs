//! The worker loop: one session, one shard, one partial file
//!
//! A worker walks its shard in order. Each unit is fetched, extracted and
//! appended to the batch; the batch is flushed to the worker's partial file
//! whenever it reaches the flush interval, and once more when the worker
//! drains. Recoverable fetch errors replace the session and move on to the
//! next unit; the failed unit is recorded and retried by a later run.

use crate::config::{DelayRange, OrchestratorConfig};
use crate::extract::ExtractionPipeline;
use crate::orchestrator::batch::{Batch, PartialWriter, UnitOutcome};
use crate::orchestrator::shard::WorkerShard;
use crate::session::{Session, SessionManager};
use crate::state::{TerminationReason, WorkerState};
use crate::Result;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Loop tuning of one worker
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub flush_interval: usize,
    pub request_delay_range: DelayRange,
    pub open_attempts: u32,
    pub retry_delay: Duration,
    pub start_delay: Duration,
}

impl WorkerSettings {
    /// Derives the settings of worker `worker_id`, including its start stagger
    pub fn for_worker(config: &OrchestratorConfig, worker_id: usize) -> Self {
        Self {
            flush_interval: config.flush_interval.max(1),
            request_delay_range: config.request_delay_range,
            open_attempts: config.session_open_attempts.max(1),
            retry_delay: config.session_retry_delay(),
            start_delay: config.worker_start_stagger() * worker_id as u32,
        }
    }
}

/// What a worker did, returned when it terminates
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub shard_size: usize,
    /// Units whose fetch ran to an outcome
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Units left unvisited because no session could be opened
    pub abandoned: usize,
    /// Units left unvisited because of a stop request
    pub unvisited: usize,
    pub records_flushed: usize,
    pub flushes: u64,
    pub sessions_opened: u32,
    pub final_state: WorkerState,
    pub partial_path: PathBuf,
    pub flush_error: Option<String>,
}

impl WorkerReport {
    fn new(worker_id: usize, shard_size: usize, partial_path: PathBuf) -> Self {
        Self {
            worker_id,
            shard_size,
            attempted: 0,
            succeeded: 0,
            failed: 0,
            abandoned: 0,
            unvisited: 0,
            records_flushed: 0,
            flushes: 0,
            sessions_opened: 0,
            final_state: WorkerState::Idle,
            partial_path,
            flush_error: None,
        }
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        match self.final_state {
            WorkerState::Terminated(reason) => Some(reason),
            _ => None,
        }
    }
}

enum OpenOutcome {
    Opened(Session),
    Stopped,
    GaveUp,
}

/// One isolated worker
pub struct Worker {
    shard: WorkerShard,
    sessions: SessionManager,
    pipeline: ExtractionPipeline,
    writer: PartialWriter,
    settings: WorkerSettings,
    cancel: CancellationToken,
    state: WorkerState,
    batch: Batch,
    report: WorkerReport,
}

impl Worker {
    pub fn new(
        shard: WorkerShard,
        sessions: SessionManager,
        pipeline: ExtractionPipeline,
        writer: PartialWriter,
        settings: WorkerSettings,
        cancel: CancellationToken,
    ) -> Self {
        let report = WorkerReport::new(shard.worker_id, shard.len(), writer.path().to_path_buf());
        Self {
            shard,
            sessions,
            pipeline,
            writer,
            settings,
            cancel,
            state: WorkerState::Idle,
            batch: Batch::new(),
            report,
        }
    }

    /// Runs the shard to completion, a stop request, or session exhaustion
    pub async fn run(mut self) -> Result<WorkerReport> {
        let worker_id = self.shard.worker_id;
        let units = std::mem::take(&mut self.shard.units);
        let total = units.len();

        if !self.settings.start_delay.is_zero() && self.pause(self.settings.start_delay).await {
            self.report.unvisited = total;
            return self.terminate(TerminationReason::Stopped);
        }

        let mut session = match self.open_session().await {
            OpenOutcome::Opened(session) => session,
            OpenOutcome::Stopped => {
                self.report.unvisited = total;
                return self.terminate(TerminationReason::Stopped);
            }
            OpenOutcome::GaveUp => {
                self.report.abandoned = total;
                return self.terminate(TerminationReason::Unrecoverable);
            }
        };

        self.state.transition(WorkerState::Running)?;
        tracing::info!("Worker {} started on {} unit(s)", worker_id, total);

        let mut reason = TerminationReason::Exhausted;

        for (index, unit) in units.iter().enumerate() {
            if self.cancel.is_cancelled() {
                reason = TerminationReason::Stopped;
                self.report.unvisited = total - index;
                break;
            }

            let fetched = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.sessions.fetch(&mut session, unit) => Some(result),
            };

            let Some(result) = fetched else {
                tracing::info!("Worker {}: stop requested, discarding {}", worker_id, unit);
                reason = TerminationReason::Stopped;
                self.report.unvisited = total - index;
                break;
            };

            self.report.attempted += 1;

            match result {
                Ok(page) if page.is_success() => {
                    let records = self.pipeline.extract(&page);
                    tracing::debug!(
                        "Worker {}: {} -> {} record(s)",
                        worker_id,
                        unit,
                        records.len()
                    );
                    self.report.succeeded += 1;
                    self.batch.push(UnitOutcome::Completed {
                        unit_id: unit.id().to_string(),
                        records,
                    });
                }
                Ok(_) => {
                    tracing::warn!("Worker {}: blank page at {}", worker_id, unit);
                    self.report.failed += 1;
                    self.batch.push(UnitOutcome::Failed {
                        unit_id: unit.id().to_string(),
                        kind: "empty_page".to_string(),
                        reason: "page rendered no markup".to_string(),
                    });
                }
                Err(e) => {
                    tracing::warn!("Worker {}: {}", worker_id, e);
                    self.report.failed += 1;
                    self.batch.push(UnitOutcome::Failed {
                        unit_id: unit.id().to_string(),
                        kind: e.kind().to_string(),
                        reason: e.to_string(),
                    });

                    if e.requires_replacement() {
                        self.sessions.close(&mut session).await;
                        match self.open_session().await {
                            OpenOutcome::Opened(fresh) => {
                                session = fresh;
                                self.state.transition(WorkerState::Running)?;
                            }
                            OpenOutcome::Stopped => {
                                reason = TerminationReason::Stopped;
                                self.report.unvisited = total - index - 1;
                                break;
                            }
                            OpenOutcome::GaveUp => {
                                reason = TerminationReason::Unrecoverable;
                                self.report.abandoned = total - index - 1;
                                break;
                            }
                        }
                    }
                }
            }

            if self.batch.weight() >= self.settings.flush_interval {
                self.state.transition(WorkerState::Flushing)?;
                self.flush();
                self.state.transition(WorkerState::Running)?;
            }

            if index + 1 < total {
                let delay = self.settings.request_delay_range.sample();
                if !delay.is_zero() {
                    self.pause(delay).await;
                }
            }
        }

        self.state.transition(WorkerState::Draining)?;
        self.state.transition(WorkerState::Flushing)?;
        self.flush();
        self.sessions.close(&mut session).await;

        self.terminate(reason)
    }

    /// Opens a session, retrying within the attempt budget
    async fn open_session(&mut self) -> OpenOutcome {
        let worker_id = self.shard.worker_id;
        let attempts = self.settings.open_attempts;

        for attempt in 1..=attempts {
            let opened = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                result = self.sessions.open() => Some(result),
            };

            match opened {
                None => return OpenOutcome::Stopped,
                Some(Ok(session)) => return OpenOutcome::Opened(session),
                Some(Err(e)) => {
                    tracing::warn!(
                        "Worker {}: session open attempt {}/{} failed: {}",
                        worker_id,
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts && self.pause(self.settings.retry_delay).await {
                        return OpenOutcome::Stopped;
                    }
                }
            }
        }

        tracing::error!(
            "Worker {} could not open a session after {} attempt(s), abandoning its shard",
            worker_id,
            attempts
        );
        OpenOutcome::GaveUp
    }

    /// Sleeps unless stopped first; returns true when a stop was requested
    async fn pause(&self, delay: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        }
    }

    fn flush(&mut self) {
        if self.batch.is_empty() {
            return;
        }

        let units = self.batch.len();
        match self.writer.flush(&mut self.batch) {
            Ok(records) => {
                self.report.records_flushed += records;
                tracing::info!(
                    "Worker {} flushed {} unit(s), {} record(s) ({}/{} attempted)",
                    self.shard.worker_id,
                    units,
                    records,
                    self.report.attempted,
                    self.report.shard_size
                );
            }
            Err(e) => {
                tracing::error!(
                    "Worker {} failed to flush to {}: {}",
                    self.shard.worker_id,
                    self.writer.path().display(),
                    e
                );
                self.report.flush_error = Some(e.to_string());
            }
        }
    }

    fn terminate(mut self, reason: TerminationReason) -> Result<WorkerReport> {
        self.state.transition(WorkerState::Terminated(reason))?;
        self.report.final_state = self.state;
        self.report.flushes = self.writer.flushes();
        self.report.sessions_opened = self.sessions.sessions_opened();

        if !self.batch.is_empty() {
            tracing::error!(
                "Worker {} terminated with {} unflushed unit(s)",
                self.shard.worker_id,
                self.batch.len()
            );
        }
        tracing::info!(
            "Worker {} terminated ({}): {} succeeded, {} failed, {} abandoned",
            self.shard.worker_id,
            self.state,
            self.report.succeeded,
            self.report.failed,
            self.report.abandoned
        );

        Ok(self.report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::extract::DetailRule;
    use crate::frontier::WorkUnit;
    use crate::orchestrator::batch::read_partial;
    use crate::orchestrator::testing::{detail_page, Script, ScriptedEngine};
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    fn settings(flush_interval: usize) -> WorkerSettings {
        WorkerSettings {
            flush_interval,
            request_delay_range: DelayRange::zero(),
            open_attempts: 2,
            retry_delay: Duration::ZERO,
            start_delay: Duration::ZERO,
        }
    }

    fn session_config() -> SessionConfig {
        SessionConfig {
            page_timeout: 5,
            settle_delay_range: DelayRange::zero(),
            user_agent: None,
        }
    }

    fn worker(
        engine: Arc<ScriptedEngine>,
        targets: &[&str],
        flush_interval: usize,
        dir: &std::path::Path,
        cancel: CancellationToken,
    ) -> Worker {
        let shard = WorkerShard {
            worker_id: 0,
            units: targets.iter().map(|t| WorkUnit::new(*t)).collect(),
        };
        let sessions =
            SessionManager::new(engine, session_config(), 0, Arc::new(Semaphore::new(1)));
        let writer = PartialWriter::create(dir, "details", 1, 0).unwrap();
        Worker::new(
            shard,
            sessions,
            ExtractionPipeline::new(Arc::new(DetailRule)),
            writer,
            settings(flush_interval),
            cancel,
        )
    }

    #[tokio::test]
    async fn test_worker_exhausts_shard_and_flushes_by_interval() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            ScriptedEngine::new()
                .page("a", detail_page("A", Some("1 TL")))
                .page("b", detail_page("B", None))
                .page("c", detail_page("C", Some("3 TL"))),
        );

        let report = worker(engine, &["a", "b", "c"], 2, dir.path(), CancellationToken::new())
            .run()
            .await
            .unwrap();

        assert_eq!(report.final_state, WorkerState::Terminated(TerminationReason::Exhausted));
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.records_flushed, 3);
        // One flush at the interval, one final
        assert_eq!(report.flushes, 2);

        let frames = read_partial(&report.partial_path).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].entries.len(), 2);
        assert_eq!(frames[1].entries[0].unit_id(), "c");
    }

    #[tokio::test]
    async fn test_recoverable_error_replaces_session_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            ScriptedEngine::new()
                .page("a", detail_page("A", None))
                .script("b", Script::Dead)
                .script("c", Script::Timeout)
                .page("d", detail_page("D", None)),
        );

        let report = worker(
            engine.clone(),
            &["a", "b", "c", "d", "missing"],
            10,
            dir.path(),
            CancellationToken::new(),
        )
        .run()
        .await
        .unwrap();

        assert_eq!(report.final_state, WorkerState::Terminated(TerminationReason::Exhausted));
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 3);
        // Initial session plus one replacement each for "b" and "c"; the 404 keeps its session
        assert_eq!(report.sessions_opened, 3);
        assert_eq!(engine.launches(), 3);

        let frames = read_partial(&report.partial_path).unwrap();
        let kinds: Vec<String> = frames[0]
            .entries
            .iter()
            .filter_map(|e| match e {
                UnitOutcome::Failed { kind, .. } => Some(kind.clone()),
                UnitOutcome::Completed { .. } => None,
            })
            .collect();
        assert_eq!(kinds, vec!["invalid_session", "fetch_timeout", "navigation"]);
    }

    #[tokio::test]
    async fn test_open_failure_is_unrecoverable() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new().max_launches(0));

        let report = worker(engine.clone(), &["a", "b"], 2, dir.path(), CancellationToken::new())
            .run()
            .await
            .unwrap();

        assert_eq!(report.termination(), Some(TerminationReason::Unrecoverable));
        assert_eq!(report.attempted, 0);
        assert_eq!(report.abandoned, 2);
        assert_eq!(engine.launches(), 2);
    }

    #[tokio::test]
    async fn test_failed_replacement_abandons_rest_but_keeps_flushed_work() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(
            ScriptedEngine::new()
                .page("a", detail_page("A", None))
                .script("b", Script::Dead)
                .page("c", detail_page("C", None))
                .max_launches(1),
        );

        let report = worker(engine, &["a", "b", "c"], 10, dir.path(), CancellationToken::new())
            .run()
            .await
            .unwrap();

        assert_eq!(report.termination(), Some(TerminationReason::Unrecoverable));
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        assert_eq!(report.abandoned, 1);

        let frames = read_partial(&report.partial_path).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].entries.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_before_start_visits_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Arc::new(ScriptedEngine::new().page("a", detail_page("A", None)));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = worker(engine.clone(), &["a"], 1, dir.path(), cancel)
            .run()
            .await
            .unwrap();

        assert_eq!(report.termination(), Some(TerminationReason::Stopped));
        assert_eq!(report.unvisited, 1);
        assert!(engine.visits().is_empty());
    }

    #[tokio::test]
    async fn test_stop_mid_shard_discards_in_flight_unit_and_flushes_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let engine = Arc::new(
            ScriptedEngine::new()
                .page("a", detail_page("A", None))
                .page("b", detail_page("B", None))
                .script("c", Script::Stall(cancel.clone()))
                .page("d", detail_page("D", None))
                .page("e", detail_page("E", None)),
        );

        let report = worker(engine.clone(), &["a", "b", "c", "d", "e"], 10, dir.path(), cancel)
            .run()
            .await
            .unwrap();

        assert_eq!(report.termination(), Some(TerminationReason::Stopped));
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);
        assert_eq!(report.unvisited, 3);
        assert_eq!(engine.visits(), vec!["a", "b", "c"]);

        // The drain flush carries the completed units and nothing of "c"
        let frames = read_partial(&report.partial_path).unwrap();
        assert_eq!(frames.len(), 1);
        let units: Vec<_> = frames[0].entries.iter().map(|e| e.unit_id()).collect();
        assert_eq!(units, vec!["a", "b"]);
    }
}
