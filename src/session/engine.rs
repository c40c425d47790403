//! The rendering engine collaborator
//!
//! The engine is a black box that can launch browser-like sessions, navigate
//! them and hand back the rendered markup.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors reported by a rendering engine
#[derive(Debug, Clone, Error)]
pub enum NavigationError {
    #[error("navigation timed out")]
    Timeout,

    #[error("session is no longer valid: {0}")]
    InvalidSession(String),

    #[error("failed to launch session: {0}")]
    Launch(String),

    #[error("navigation failed: {0}")]
    Failed(String),
}

/// Launches sessions; one launch consumes one browser process
#[async_trait]
pub trait RenderEngine: Send + Sync {
    async fn launch(&self, worker_id: usize) -> Result<Box<dyn RenderSession>, NavigationError>;
}

/// One live browser-driving handle
#[async_trait]
pub trait RenderSession: Send {
    /// Loads `url`, giving up after `timeout`
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), NavigationError>;

    /// Returns the markup of the currently loaded page
    async fn page_source(&mut self) -> Result<String, NavigationError>;

    /// Releases the underlying process; must not fail
    async fn shutdown(&mut self);
}
