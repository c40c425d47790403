//! HTTP rendering engine
//!
//! Serves pages whose markup is complete without client-side scripts. Every
//! session owns its own client, so a broken connection pool never leaks into
//! another worker.

use crate::config::SessionConfig;
use crate::session::engine::{NavigationError, RenderEngine, RenderSession};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/108.0.0.0 Safari/537.36";

/// Engine that "renders" pages with plain HTTP GET requests
#[derive(Debug, Clone)]
pub struct HttpEngine {
    user_agent: String,
    timeout: Duration,
}

impl HttpEngine {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            user_agent: config
                .user_agent
                .clone()
                .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string()),
            timeout: config.page_timeout(),
        }
    }
}

#[async_trait]
impl RenderEngine for HttpEngine {
    async fn launch(&self, worker_id: usize) -> Result<Box<dyn RenderSession>, NavigationError> {
        let client = Client::builder()
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout)
            .connect_timeout(Duration::from_secs(10))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| NavigationError::Launch(e.to_string()))?;

        tracing::trace!("Launched HTTP session for worker {}", worker_id);

        Ok(Box::new(HttpSession {
            client: Some(client),
            current: None,
        }))
    }
}

struct HttpSession {
    client: Option<Client>,
    current: Option<String>,
}

#[async_trait]
impl RenderSession for HttpSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<(), NavigationError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| NavigationError::InvalidSession("session shut down".to_string()))?;

        self.current = None;

        let response = client
            .get(url)
            .timeout(timeout)
            .send()
            .await
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(NavigationError::Failed(format!("HTTP {}", status.as_u16())));
        }

        let body = response.text().await.map_err(classify_error)?;
        self.current = Some(body);
        Ok(())
    }

    async fn page_source(&mut self) -> Result<String, NavigationError> {
        self.current
            .clone()
            .ok_or_else(|| NavigationError::InvalidSession("no page loaded".to_string()))
    }

    async fn shutdown(&mut self) {
        self.client = None;
        self.current = None;
    }
}

fn classify_error(e: reqwest::Error) -> NavigationError {
    if e.is_timeout() {
        NavigationError::Timeout
    } else {
        NavigationError::Failed(e.to_string())
    }
}
