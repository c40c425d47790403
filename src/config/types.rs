use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for the listing crawler
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub session: SessionConfig,
    pub output: OutputConfig,
    #[serde(default, rename = "crawl")]
    pub crawls: Vec<CrawlConfig>,
}

impl Config {
    /// Looks up a crawl entry by name
    pub fn crawl(&self, name: &str) -> Option<&CrawlConfig> {
        self.crawls.iter().find(|c| c.name == name)
    }
}

/// Work partitioning and worker loop configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    /// Number of concurrent workers (and therefore open sessions)
    #[serde(rename = "worker-count")]
    pub worker_count: usize,

    /// Number of records a worker buffers before flushing its batch
    #[serde(rename = "flush-interval")]
    pub flush_interval: usize,

    /// Randomized pause between two work units, in seconds
    #[serde(rename = "request-delay-range")]
    pub request_delay_range: DelayRange,

    /// Skip work units already present in the checkpoint
    #[serde(rename = "resume-from-checkpoint", default = "default_true")]
    pub resume_from_checkpoint: bool,

    /// Attempts made to open a session before the worker gives up
    #[serde(rename = "session-open-attempts", default = "default_open_attempts")]
    pub session_open_attempts: u32,

    /// Pause between two session open attempts (milliseconds)
    #[serde(rename = "session-retry-delay", default = "default_retry_delay")]
    pub session_retry_delay: u64,

    /// Start delay per worker index (milliseconds)
    #[serde(rename = "worker-start-stagger", default)]
    pub worker_start_stagger: u64,
}

impl OrchestratorConfig {
    pub fn session_retry_delay(&self) -> Duration {
        Duration::from_millis(self.session_retry_delay)
    }

    pub fn worker_start_stagger(&self) -> Duration {
        Duration::from_millis(self.worker_start_stagger)
    }
}

/// Per-session rendering configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Navigation timeout in seconds
    #[serde(rename = "page-timeout", default = "default_page_timeout")]
    pub page_timeout: u64,

    /// Wait after navigation for client-side rendering to settle, in seconds
    #[serde(rename = "settle-delay-range", default = "default_settle_delay")]
    pub settle_delay_range: DelayRange,

    /// User agent presented by each session
    #[serde(rename = "user-agent", default)]
    pub user_agent: Option<String>,
}

impl SessionConfig {
    pub fn page_timeout(&self) -> Duration {
        Duration::from_secs(self.page_timeout)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_timeout: default_page_timeout(),
            settle_delay_range: default_settle_delay(),
            user_agent: None,
        }
    }
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database holding the canonical store and checkpoint
    #[serde(rename = "database-path")]
    pub database_path: String,

    /// Directory receiving per-worker partial files
    #[serde(rename = "partials-dir")]
    pub partials_dir: String,
}

/// The pass a crawl entry performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlKind {
    /// Visit category pages and collect one record per brand listing link
    Brands,
    /// Paginate seed listing pages and collect one record per listing row
    Links,
    /// Visit individual listing URLs and collect one record per page
    Details,
    /// Revisit records missing a field and patch the field in place
    Repair,
}

impl CrawlKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Brands => "brands",
            Self::Links => "links",
            Self::Details => "details",
            Self::Repair => "repair",
        }
    }
}

/// One named crawl pass
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlConfig {
    /// Unique name, also the namespace of the crawl's records and checkpoint
    pub name: String,

    pub kind: CrawlKind,

    /// Seed listing targets (links) or category pages (brands)
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Title attribute of the "last page" pagination link (links)
    #[serde(rename = "last-page-title", default = "default_last_page_title")]
    pub last_page_title: String,

    /// Base used to resolve relative listing links when the page target is not a URL
    #[serde(rename = "site-base", default)]
    pub site_base: Option<String>,

    /// Crawl whose records supply the targets (details, repair) or extra seeds (links)
    #[serde(default)]
    pub source: Option<String>,

    /// File with one target per line (details)
    #[serde(rename = "targets-file", default)]
    pub targets_file: Option<String>,

    /// Field to repair (repair)
    #[serde(default)]
    pub field: Option<String>,
}

/// An inclusive `[min, max]` range of seconds
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(from = "[f64; 2]")]
pub struct DelayRange {
    pub min: f64,
    pub max: f64,
}

impl DelayRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    /// A range that never waits
    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    /// Longest delay a range may ask for, in seconds
    pub const MAX_SECS: f64 = 3600.0;

    /// Draws a uniformly distributed duration from the range
    ///
    /// Draws are clamped to `[0, MAX_SECS]`; a range that is not a number
    /// never waits.
    pub fn sample(&self) -> Duration {
        let span = (self.max - self.min).max(0.0);
        let secs = (self.min + fastrand::f64() * span).clamp(0.0, Self::MAX_SECS);
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

impl From<[f64; 2]> for DelayRange {
    fn from(pair: [f64; 2]) -> Self {
        Self::new(pair[0], pair[1])
    }
}

fn default_true() -> bool {
    true
}

fn default_open_attempts() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    3000
}

fn default_page_timeout() -> u64 {
    20
}

fn default_settle_delay() -> DelayRange {
    DelayRange::new(0.5, 1.5)
}

fn default_last_page_title() -> String {
    "Son Sayfa".to_string()
}

/// Configuration used across unit tests: a links, details and repair crawl chain
#[cfg(test)]
pub(crate) fn default_test_config() -> Config {
    Config {
        orchestrator: OrchestratorConfig {
            worker_count: 2,
            flush_interval: 2,
            request_delay_range: DelayRange::zero(),
            resume_from_checkpoint: true,
            session_open_attempts: 2,
            session_retry_delay: 0,
            worker_start_stagger: 0,
        },
        session: SessionConfig {
            page_timeout: 5,
            settle_delay_range: DelayRange::zero(),
            user_agent: None,
        },
        output: OutputConfig {
            database_path: "./test.db".to_string(),
            partials_dir: "./partials".to_string(),
        },
        crawls: vec![
            CrawlConfig {
                name: "links".to_string(),
                kind: CrawlKind::Links,
                seeds: vec!["https://www.example.com/otomobil/brandx".to_string()],
                last_page_title: default_last_page_title(),
                site_base: Some("https://www.example.com".to_string()),
                source: None,
                targets_file: None,
                field: None,
            },
            CrawlConfig {
                name: "details".to_string(),
                kind: CrawlKind::Details,
                seeds: vec![],
                last_page_title: default_last_page_title(),
                site_base: None,
                source: Some("links".to_string()),
                targets_file: None,
                field: None,
            },
            CrawlConfig {
                name: "prices".to_string(),
                kind: CrawlKind::Repair,
                seeds: vec![],
                last_page_title: default_last_page_title(),
                site_base: None,
                source: Some("details".to_string()),
                targets_file: None,
                field: Some("price".to_string()),
            },
        ],
    }
}
