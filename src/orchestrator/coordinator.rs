//! Orchestrator: plans a run, drives the workers and merges their output
//!
//! A run goes through these steps:
//! 1. Merge partial files left behind by an earlier run that never merged
//! 2. Read the checkpoint (or start from nothing with `--fresh`)
//! 3. Enumerate the frontier and drop checkpointed units
//! 4. Partition the rest into one shard per worker and spawn the workers,
//!    unless a stop was requested while the frontier was built
//! 5. Join every worker, then merge all partial files in one transaction
//! 6. Record the run's status and counts

use crate::config::{Config, CrawlConfig, CrawlKind};
use crate::extract::ExtractionPipeline;
use crate::frontier::{self, FlatFrontier, PageProbe, PaginatedFrontier, WorkUnit};
use crate::orchestrator::batch::PartialWriter;
use crate::orchestrator::merge::{leftover_partials, merge_partials};
use crate::orchestrator::shard::partition;
use crate::orchestrator::summary::{RunOutcome, RunSummary};
use crate::orchestrator::worker::{Worker, WorkerSettings};
use crate::session::{RenderEngine, Session, SessionManager};
use crate::state::CheckpointState;
use crate::storage::{open_storage, FieldPatch, RunCounts, RunStatus, SqliteStorage, Storage};
use crate::{ConfigError, CrawlError, Result};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Runs one named crawl of a configuration
pub struct Orchestrator {
    config: Arc<Config>,
    crawl: CrawlConfig,
    storage: SqliteStorage,
    engine: Arc<dyn RenderEngine>,
    config_hash: String,
    resume: bool,
}

impl Orchestrator {
    /// Creates an orchestrator for `crawl_name`, opening the configured store
    pub fn new(config: Config, crawl_name: &str, engine: Arc<dyn RenderEngine>) -> Result<Self> {
        let crawl = config
            .crawl(crawl_name)
            .cloned()
            .ok_or_else(|| CrawlError::UnknownCrawl(crawl_name.to_string()))?;

        let storage = open_storage(Path::new(&config.output.database_path))?;
        let resume = config.orchestrator.resume_from_checkpoint;

        Ok(Self {
            config: Arc::new(config),
            crawl,
            storage,
            engine,
            config_hash: String::new(),
            resume,
        })
    }

    /// Sets the configuration hash recorded with each run
    pub fn with_config_hash(mut self, config_hash: impl Into<String>) -> Self {
        self.config_hash = config_hash.into();
        self
    }

    /// Overrides `resume-from-checkpoint`
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn crawl(&self) -> &CrawlConfig {
        &self.crawl
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    /// Counts the units a run would visit, without fetching anything
    ///
    /// Returns `None` for paginated crawls, whose frontier is only known
    /// after probing each seed.
    pub fn planned_units(&self) -> Result<Option<usize>> {
        if self.crawl.kind == CrawlKind::Links {
            return Ok(None);
        }
        let checkpoint = self.load_checkpoint()?;
        Ok(Some(self.flat_frontier(checkpoint)?.enumerate().len()))
    }

    /// Executes one run until every worker has terminated and output is merged
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<RunSummary> {
        let started = Instant::now();
        let name = self.crawl.name.clone();
        let partials_dir = PathBuf::from(&self.config.output.partials_dir);
        let worker_count = self.config.orchestrator.worker_count.max(1);

        self.recover_leftovers(&partials_dir)?;

        let checkpoint = self.load_checkpoint()?;
        let slots = Arc::new(Semaphore::new(worker_count));
        let units = self.build_frontier(&checkpoint, &slots, &cancel).await?;
        let frontier_size = units.len();
        let remaining = frontier::remaining(units, &checkpoint);

        let run_id = self.storage.create_run(&name, &self.config_hash)?;
        let mut summary = RunSummary::new(run_id, &name, frontier_size, remaining.len());

        // The frontier may be incomplete, so this outranks "nothing to do"
        if cancel.is_cancelled() {
            tracing::info!(
                "Stop requested before dispatch, {} unit(s) of {} left for the next run",
                remaining.len(),
                name
            );
            summary.unvisited = remaining.len();
            summary.outcome = RunOutcome::Interrupted;
            summary.elapsed = started.elapsed();
            self.storage
                .finish_run(run_id, RunStatus::Interrupted, summary.counts())?;
            return Ok(summary);
        }

        if remaining.is_empty() {
            tracing::info!(
                "Nothing to do for {}: all {} unit(s) already completed",
                name,
                frontier_size
            );
            self.storage
                .finish_run(run_id, RunStatus::NothingToDo, RunCounts::default())?;
            summary.elapsed = started.elapsed();
            return Ok(summary);
        }

        tracing::info!(
            "Run {} of {}: {} of {} unit(s) remaining, {} worker(s)",
            run_id,
            name,
            remaining.len(),
            frontier_size,
            worker_count
        );

        let pipeline = ExtractionPipeline::for_crawl(&self.crawl);
        let mut handles = Vec::new();

        for shard in partition(remaining, worker_count) {
            if shard.is_empty() {
                continue;
            }
            let worker_id = shard.worker_id;
            let writer = PartialWriter::create(&partials_dir, &name, run_id, worker_id)?;
            let partial_path = writer.path().to_path_buf();
            let sessions = SessionManager::new(
                self.engine.clone(),
                self.config.session.clone(),
                worker_id,
                slots.clone(),
            );
            let settings = WorkerSettings::for_worker(&self.config.orchestrator, worker_id);
            let worker = Worker::new(
                shard,
                sessions,
                pipeline.clone(),
                writer,
                settings,
                cancel.clone(),
            );

            handles.push((worker_id, partial_path, tokio::spawn(worker.run())));
        }

        let mut partials = Vec::with_capacity(handles.len());
        for (worker_id, partial_path, handle) in handles {
            partials.push(partial_path);
            match handle.await {
                Ok(Ok(report)) => summary.add_worker(report),
                Ok(Err(e)) => {
                    tracing::error!("Worker {} failed: {}", worker_id, e);
                    summary.crashed_workers.push(worker_id);
                }
                Err(e) => {
                    let err = CrawlError::WorkerPanic {
                        worker_id,
                        message: e.to_string(),
                    };
                    tracing::error!("{}", err);
                    summary.crashed_workers.push(worker_id);
                }
            }
        }

        let patch = self.field_patch();
        summary.merge = merge_partials(&mut self.storage, &name, patch.as_ref(), &partials)?;
        summary.resolve_outcome(cancel.is_cancelled());
        summary.elapsed = started.elapsed();

        self.storage
            .finish_run(run_id, summary.outcome.status(), summary.counts())?;

        tracing::info!(
            "Run {} finished ({}): {} attempted, {} succeeded, {} failed, {} abandoned in {:.1}s",
            run_id,
            summary.outcome.as_str(),
            summary.attempted,
            summary.succeeded,
            summary.failed,
            summary.abandoned,
            summary.elapsed.as_secs_f64()
        );

        Ok(summary)
    }

    /// Merges partial files of this crawl that a crashed run never merged
    fn recover_leftovers(&mut self, partials_dir: &Path) -> Result<()> {
        let leftovers = leftover_partials(partials_dir, &self.crawl.name)?;
        if leftovers.is_empty() {
            return Ok(());
        }

        tracing::warn!(
            "Recovering {} unmerged partial file(s) of {}",
            leftovers.len(),
            self.crawl.name
        );
        let patch = self.field_patch();
        merge_partials(&mut self.storage, &self.crawl.name, patch.as_ref(), &leftovers)?;
        Ok(())
    }

    fn load_checkpoint(&self) -> Result<CheckpointState> {
        if !self.resume {
            tracing::info!("Ignoring checkpoint of {} (fresh run)", self.crawl.name);
            return Ok(CheckpointState::new());
        }
        let checkpoint = self.storage.load_checkpoint(&self.crawl.name)?;
        tracing::info!(
            "Checkpoint of {}: {} completed unit(s)",
            self.crawl.name,
            checkpoint.len()
        );
        Ok(checkpoint)
    }

    async fn build_frontier(
        &self,
        checkpoint: &CheckpointState,
        slots: &Arc<Semaphore>,
        cancel: &CancellationToken,
    ) -> Result<Vec<WorkUnit>> {
        match self.crawl.kind {
            CrawlKind::Links => {
                let seeds = self.link_seeds()?;
                let sessions = SessionManager::new(
                    self.engine.clone(),
                    self.config.session.clone(),
                    0,
                    slots.clone(),
                );
                let mut probe = SessionProbe::new(
                    sessions,
                    self.config.orchestrator.session_open_attempts.max(1),
                    self.config.orchestrator.session_retry_delay(),
                    cancel.clone(),
                );
                let units = PaginatedFrontier::new(seeds, self.crawl.last_page_title.clone())
                    .enumerate(&mut probe, cancel)
                    .await;
                probe.close().await;
                Ok(units)
            }
            CrawlKind::Brands | CrawlKind::Details | CrawlKind::Repair => {
                Ok(self.flat_frontier(checkpoint.clone())?.enumerate())
            }
        }
    }

    /// Seeds of a links crawl: configured seeds, then the sorted brand URLs of its source
    fn link_seeds(&self) -> Result<Vec<String>> {
        let mut seeds = self.crawl.seeds.clone();
        if let Some(source) = &self.crawl.source {
            self.require_source(source)?;
            let discovered: BTreeSet<String> =
                self.storage.field_values(source, "url")?.into_iter().collect();
            tracing::info!("{} seed(s) discovered by {}", discovered.len(), source);
            seeds.extend(discovered);
        }
        Ok(seeds)
    }

    fn require_source(&self, source: &str) -> Result<()> {
        if self.storage.count_records(source)? == 0 {
            return Err(CrawlError::EmptySource(source.to_string()));
        }
        Ok(())
    }

    /// Frontier of a brands, details or repair crawl
    fn flat_frontier(&self, checkpoint: CheckpointState) -> Result<FlatFrontier> {
        let crawl = &self.crawl;

        if crawl.kind == CrawlKind::Brands {
            return Ok(FlatFrontier::new(crawl.seeds.clone(), checkpoint));
        }

        if crawl.kind == CrawlKind::Details {
            if let Some(path) = &crawl.targets_file {
                return Ok(FlatFrontier::from_targets_file(Path::new(path), checkpoint)?);
            }
        }

        let source = crawl.source.as_deref().ok_or_else(|| {
            ConfigError::Validation(format!("crawl '{}' has no source", crawl.name))
        })?;
        self.require_source(source)?;

        let targets = match crawl.kind {
            CrawlKind::Repair => {
                let field = crawl.field.as_deref().ok_or_else(|| {
                    ConfigError::Validation(format!("crawl '{}' has no field", crawl.name))
                })?;
                self.storage.units_missing_field(source, field)?
            }
            _ => self.storage.field_values(source, "url")?,
        };
        Ok(FlatFrontier::new(targets, checkpoint))
    }

    fn field_patch(&self) -> Option<FieldPatch> {
        if self.crawl.kind != CrawlKind::Repair {
            return None;
        }
        Some(FieldPatch {
            target_crawl: self.crawl.source.clone()?,
            field: self.crawl.field.clone()?,
        })
    }
}

/// Loads seed pages through a session so their pagination can be read
///
/// Every wait (session open, retry pause, navigation) gives way to a stop
/// request, after which the probe reports the page as not loaded.
struct SessionProbe {
    sessions: SessionManager,
    session: Option<Session>,
    open_attempts: u32,
    retry_delay: Duration,
    cancel: CancellationToken,
    gave_up: bool,
}

impl SessionProbe {
    fn new(
        sessions: SessionManager,
        open_attempts: u32,
        retry_delay: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sessions,
            session: None,
            open_attempts,
            retry_delay,
            cancel,
            gave_up: false,
        }
    }

    async fn ensure_session(&mut self) -> Option<&mut Session> {
        if self.session.is_none() && !self.gave_up {
            for attempt in 1..=self.open_attempts {
                let opened = tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return None,
                    result = self.sessions.open() => result,
                };
                match opened {
                    Ok(session) => {
                        self.session = Some(session);
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            "Probe session open attempt {}/{} failed: {}",
                            attempt,
                            self.open_attempts,
                            e
                        );
                        if attempt < self.open_attempts {
                            tokio::select! {
                                _ = self.cancel.cancelled() => return None,
                                _ = tokio::time::sleep(self.retry_delay) => {}
                            }
                        }
                    }
                }
            }
            self.gave_up = self.session.is_none();
        }
        self.session.as_mut()
    }

    async fn close(&mut self) {
        if let Some(mut session) = self.session.take() {
            self.sessions.close(&mut session).await;
        }
    }
}

#[async_trait]
impl PageProbe for SessionProbe {
    async fn probe(&mut self, unit: &WorkUnit) -> Option<String> {
        self.ensure_session().await?;
        let session = self.session.as_mut()?;

        let fetched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return None,
            result = self.sessions.fetch(session, unit) => result,
        };

        match fetched {
            Ok(page) if page.is_success() => Some(page.markup),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("Probe of {} failed: {}", unit, e);
                if e.requires_replacement() {
                    self.close().await;
                }
                None
            }
        }
    }
}
