//! In-memory rendering engine for orchestrator tests

use crate::session::{NavigationError, RenderEngine, RenderSession};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What navigating to a scripted target does
#[derive(Debug, Clone)]
pub(crate) enum Script {
    Page(String),
    Timeout,
    Dead,
    /// Requests a stop, then never finishes loading
    Stall(CancellationToken),
}

/// Serves scripted pages; unknown targets answer `HTTP 404`
#[derive(Default)]
pub(crate) struct ScriptedEngine {
    pages: HashMap<String, Script>,
    max_launches: Option<usize>,
    launches: AtomicUsize,
    visits: Arc<Mutex<Vec<String>>>,
}

impl ScriptedEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn page(mut self, target: &str, markup: impl Into<String>) -> Self {
        self.pages
            .insert(target.to_string(), Script::Page(markup.into()));
        self
    }

    pub(crate) fn script(mut self, target: &str, script: Script) -> Self {
        self.pages.insert(target.to_string(), script);
        self
    }

    /// Every launch after the first `n` fails
    pub(crate) fn max_launches(mut self, n: usize) -> Self {
        self.max_launches = Some(n);
        self
    }

    pub(crate) fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }

    pub(crate) fn visits(&self) -> Vec<String> {
        self.visits.lock().map(|v| v.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RenderEngine for ScriptedEngine {
    async fn launch(&self, _worker_id: usize) -> Result<Box<dyn RenderSession>, NavigationError> {
        let launched = self.launches.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = self.max_launches {
            if launched >= max {
                return Err(NavigationError::Launch("browser refused to start".to_string()));
            }
        }
        Ok(Box::new(ScriptedSession {
            pages: self.pages.clone(),
            visits: self.visits.clone(),
            loaded: None,
            dead: false,
        }))
    }
}

struct ScriptedSession {
    pages: HashMap<String, Script>,
    visits: Arc<Mutex<Vec<String>>>,
    loaded: Option<String>,
    dead: bool,
}

#[async_trait]
impl RenderSession for ScriptedSession {
    async fn navigate(&mut self, url: &str, _timeout: Duration) -> Result<(), NavigationError> {
        if self.dead {
            return Err(NavigationError::InvalidSession("session crashed".to_string()));
        }
        if let Ok(mut visits) = self.visits.lock() {
            visits.push(url.to_string());
        }
        match self.pages.get(url) {
            Some(Script::Page(markup)) => {
                self.loaded = Some(markup.clone());
                Ok(())
            }
            Some(Script::Timeout) => Err(NavigationError::Timeout),
            Some(Script::Dead) => {
                self.dead = true;
                Err(NavigationError::InvalidSession("session crashed".to_string()))
            }
            Some(Script::Stall(cancel)) => {
                cancel.cancel();
                std::future::pending().await
            }
            None => Err(NavigationError::Failed("HTTP 404".to_string())),
        }
    }

    async fn page_source(&mut self) -> Result<String, NavigationError> {
        self.loaded
            .clone()
            .ok_or_else(|| NavigationError::InvalidSession("nothing loaded".to_string()))
    }

    async fn shutdown(&mut self) {}
}

/// Markup of one listing results page with the given rows and page count
pub(crate) fn listing_page(rows: &[(&str, &str)], pages: u32) -> String {
    let mut html = String::from("<html><body><table>");
    for (id, title) in rows {
        html.push_str(&format!(
            "<tr class=\"listing-list-item\" id=\"{id}\"><td class=\"listing-modelname\"><a href=\"/ilan/{id}\">{title}</a></td></tr>"
        ));
    }
    html.push_str("</table>");
    if pages > 1 {
        html.push_str("<ul class=\"pagination\">");
        for page in 1..=pages {
            html.push_str(&format!("<li><a href=\"?page={page}\">{page}</a></li>"));
        }
        html.push_str(&format!(
            "<li><a title=\"Son Sayfa\" href=\"?page={pages}\">Son</a></li></ul>"
        ));
    }
    html.push_str("</body></html>");
    html
}

/// Markup of one listing detail page
pub(crate) fn detail_page(title: &str, price: Option<&str>) -> String {
    let price = price
        .map(|p| format!("<span class=\"product-price-new\">{}</span>", p))
        .unwrap_or_default();
    format!(
        "<html><body><div class=\"product-title\">{}</div>{}</body></html>",
        title, price
    )
}
