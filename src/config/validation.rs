use crate::config::types::{
    Config, CrawlConfig, CrawlKind, DelayRange, OrchestratorConfig, OutputConfig, SessionConfig,
};
use crate::ConfigError;
use std::collections::HashSet;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_orchestrator_config(&config.orchestrator)?;
    validate_session_config(&config.session)?;
    validate_output_config(&config.output)?;
    validate_crawls(&config.crawls)?;
    Ok(())
}

/// Validates worker partitioning settings
fn validate_orchestrator_config(config: &OrchestratorConfig) -> Result<(), ConfigError> {
    if config.worker_count < 1 || config.worker_count > 64 {
        return Err(ConfigError::Validation(format!(
            "worker_count must be between 1 and 64, got {}",
            config.worker_count
        )));
    }

    if config.flush_interval < 1 {
        return Err(ConfigError::Validation(
            "flush_interval must be >= 1".to_string(),
        ));
    }

    if config.session_open_attempts < 1 {
        return Err(ConfigError::Validation(
            "session_open_attempts must be >= 1".to_string(),
        ));
    }

    validate_delay_range("request_delay_range", &config.request_delay_range)
}

/// Validates session settings
fn validate_session_config(config: &SessionConfig) -> Result<(), ConfigError> {
    if config.page_timeout < 1 {
        return Err(ConfigError::Validation(format!(
            "page_timeout must be >= 1s, got {}s",
            config.page_timeout
        )));
    }

    validate_delay_range("settle_delay_range", &config.settle_delay_range)
}

fn validate_delay_range(name: &str, range: &DelayRange) -> Result<(), ConfigError> {
    if !range.min.is_finite() || !range.max.is_finite() || range.min < 0.0 {
        return Err(ConfigError::Validation(format!(
            "{} bounds must be finite and non-negative, got [{}, {}]",
            name, range.min, range.max
        )));
    }

    if range.max > DelayRange::MAX_SECS {
        return Err(ConfigError::Validation(format!(
            "{} max must not exceed {}s, got {}",
            name,
            DelayRange::MAX_SECS,
            range.max
        )));
    }

    if range.min > range.max {
        return Err(ConfigError::Validation(format!(
            "{} min must not exceed max, got [{}, {}]",
            name, range.min, range.max
        )));
    }

    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    if config.partials_dir.is_empty() {
        return Err(ConfigError::Validation(
            "partials_dir cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates crawl entries and the references between them
fn validate_crawls(crawls: &[CrawlConfig]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for crawl in crawls {
        if crawl.name.is_empty() {
            return Err(ConfigError::Validation(
                "crawl name cannot be empty".to_string(),
            ));
        }
        if !names.insert(crawl.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate crawl name '{}'",
                crawl.name
            )));
        }
    }

    for crawl in crawls {
        match crawl.kind {
            CrawlKind::Brands => validate_brands_crawl(crawl)?,
            CrawlKind::Links => validate_links_crawl(crawl)?,
            CrawlKind::Details => {
                if crawl.source.is_none() && crawl.targets_file.is_none() {
                    return Err(ConfigError::Validation(format!(
                        "details crawl '{}' needs either source or targets-file",
                        crawl.name
                    )));
                }
            }
            CrawlKind::Repair => {
                if crawl.source.is_none() {
                    return Err(ConfigError::Validation(format!(
                        "repair crawl '{}' needs a source crawl",
                        crawl.name
                    )));
                }
                if crawl.field.as_deref().map_or(true, str::is_empty) {
                    return Err(ConfigError::Validation(format!(
                        "repair crawl '{}' needs a field to repair",
                        crawl.name
                    )));
                }
            }
        }

        if let Some(source) = &crawl.source {
            if source == &crawl.name {
                return Err(ConfigError::Validation(format!(
                    "crawl '{}' cannot use itself as source",
                    crawl.name
                )));
            }
            if !names.contains(source.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "crawl '{}' references unknown source '{}'",
                    crawl.name, source
                )));
            }
        }
    }

    Ok(())
}

fn validate_brands_crawl(crawl: &CrawlConfig) -> Result<(), ConfigError> {
    if crawl.seeds.is_empty() {
        return Err(ConfigError::Validation(format!(
            "brands crawl '{}' must have at least one category page",
            crawl.name
        )));
    }

    validate_seeds(crawl)
}

fn validate_links_crawl(crawl: &CrawlConfig) -> Result<(), ConfigError> {
    if crawl.seeds.is_empty() && crawl.source.is_none() {
        return Err(ConfigError::Validation(format!(
            "links crawl '{}' needs seeds or a source crawl",
            crawl.name
        )));
    }

    validate_seeds(crawl)
}

fn validate_seeds(crawl: &CrawlConfig) -> Result<(), ConfigError> {
    if crawl.seeds.iter().any(|s| s.trim().is_empty()) {
        return Err(ConfigError::Validation(format!(
            "{} crawl '{}' has an empty seed",
            crawl.kind.as_str(),
            crawl.name
        )));
    }

    if let Some(base) = &crawl.site_base {
        Url::parse(base).map_err(|e| {
            ConfigError::InvalidUrl(format!("Invalid site-base '{}': {}", base, e))
        })?;
    }

    Ok(())
}
