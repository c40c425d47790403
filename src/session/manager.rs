use crate::config::SessionConfig;
use crate::frontier::WorkUnit;
use crate::session::engine::{NavigationError, RenderEngine, RenderSession};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Session-level failures, as seen by the worker loop
#[derive(Debug, Clone, Error)]
pub enum SessionError {
    #[error("Failed to open session for worker {worker_id}: {message}")]
    Init { worker_id: usize, message: String },

    #[error("Fetch timeout for {url}")]
    FetchTimeout { url: String },

    #[error("Invalid session while fetching {url}: {message}")]
    InvalidSession { url: String, message: String },

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },
}

impl SessionError {
    /// True for errors after which the session must be closed and replaced
    pub fn requires_replacement(&self) -> bool {
        matches!(self, Self::FetchTimeout { .. } | Self::InvalidSession { .. })
    }

    /// Short tag stored alongside failed work units
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init { .. } => "session_init",
            Self::FetchTimeout { .. } => "fetch_timeout",
            Self::InvalidSession { .. } => "invalid_session",
            Self::Navigation { .. } => "navigation",
        }
    }
}

/// Markup fetched for one work unit
///
/// Lives for a single worker iteration and is dropped after extraction.
#[derive(Debug, Clone)]
pub struct PageFetchResult {
    pub unit: WorkUnit,
    pub markup: String,
}

impl PageFetchResult {
    /// Blank markup is treated as a failed fetch and never reaches extraction
    pub fn is_success(&self) -> bool {
        !self.markup.trim().is_empty()
    }
}

/// A live session owned by exactly one worker
pub struct Session {
    worker_id: usize,
    generation: u32,
    opened_at: Instant,
    inner: Option<Box<dyn RenderSession>>,
    _permit: Option<OwnedSemaphorePermit>,
}

impl Session {
    pub fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    /// How many sessions this worker opened before this one
    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("worker_id", &self.worker_id)
            .field("generation", &self.generation)
            .field("open", &self.is_open())
            .field("age", &self.opened_at.elapsed())
            .finish()
    }
}

/// Opens, drives and closes the sessions of one worker
///
/// Performs no retries of its own; the worker loop decides when to replace a
/// session. The shared semaphore bounds how many sessions are open across
/// all workers at once.
pub struct SessionManager {
    engine: Arc<dyn RenderEngine>,
    config: SessionConfig,
    worker_id: usize,
    slots: Arc<Semaphore>,
    opened: u32,
}

impl SessionManager {
    pub fn new(
        engine: Arc<dyn RenderEngine>,
        config: SessionConfig,
        worker_id: usize,
        slots: Arc<Semaphore>,
    ) -> Self {
        Self {
            engine,
            config,
            worker_id,
            slots,
            opened: 0,
        }
    }

    /// Opens a new session
    pub async fn open(&mut self) -> Result<Session, SessionError> {
        let permit = self
            .slots
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| SessionError::Init {
                worker_id: self.worker_id,
                message: "session slots closed".to_string(),
            })?;

        let launched =
            tokio::time::timeout(self.config.page_timeout(), self.engine.launch(self.worker_id))
                .await;

        let inner = match launched {
            Ok(Ok(inner)) => inner,
            Ok(Err(e)) => {
                return Err(SessionError::Init {
                    worker_id: self.worker_id,
                    message: e.to_string(),
                })
            }
            Err(_) => {
                return Err(SessionError::Init {
                    worker_id: self.worker_id,
                    message: "launch timed out".to_string(),
                })
            }
        };

        let generation = self.opened;
        self.opened += 1;
        tracing::debug!(
            "Worker {} opened session (generation {})",
            self.worker_id,
            generation
        );

        Ok(Session {
            worker_id: self.worker_id,
            generation,
            opened_at: Instant::now(),
            inner: Some(inner),
            _permit: Some(permit),
        })
    }

    /// Navigates the session to a work unit and returns the settled markup
    ///
    /// After navigation the manager waits a jittered settle delay so
    /// client-side rendering can finish before the markup is read.
    pub async fn fetch(
        &self,
        session: &mut Session,
        unit: &WorkUnit,
    ) -> Result<PageFetchResult, SessionError> {
        let url = unit.target();
        let timeout = self.config.page_timeout();

        let inner = session
            .inner
            .as_mut()
            .ok_or_else(|| SessionError::InvalidSession {
                url: url.to_string(),
                message: "session already closed".to_string(),
            })?;

        match tokio::time::timeout(timeout, inner.navigate(url, timeout)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(map_navigation_error(url, e)),
            Err(_) => {
                return Err(SessionError::FetchTimeout {
                    url: url.to_string(),
                })
            }
        }

        tokio::time::sleep(self.config.settle_delay_range.sample()).await;

        let markup = match tokio::time::timeout(timeout, inner.page_source()).await {
            Ok(Ok(markup)) => markup,
            Ok(Err(e)) => return Err(map_navigation_error(url, e)),
            Err(_) => {
                return Err(SessionError::FetchTimeout {
                    url: url.to_string(),
                })
            }
        };

        Ok(PageFetchResult {
            unit: unit.clone(),
            markup,
        })
    }

    /// Closes the session; calling it again is a no-op
    pub async fn close(&self, session: &mut Session) {
        if let Some(mut inner) = session.inner.take() {
            inner.shutdown().await;
            tracing::debug!(
                "Worker {} closed session (generation {})",
                self.worker_id,
                session.generation
            );
        }
        session._permit = None;
    }

    pub fn sessions_opened(&self) -> u32 {
        self.opened
    }
}

fn map_navigation_error(url: &str, error: NavigationError) -> SessionError {
    match error {
        NavigationError::Timeout => SessionError::FetchTimeout {
            url: url.to_string(),
        },
        NavigationError::InvalidSession(message) => SessionError::InvalidSession {
            url: url.to_string(),
            message,
        },
        NavigationError::Launch(message) | NavigationError::Failed(message) => {
            SessionError::Navigation {
                url: url.to_string(),
                message,
            }
        }
    }
}
