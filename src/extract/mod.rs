//! Extraction pipeline: rendered markup in, fielded records out
//!
//! Rules are pure functions of the markup, so a single pipeline can be shared
//! by every worker without coordination. Missing fields are absent values,
//! never errors.

mod brands;
mod detail;
mod listing;
mod repair;

pub use brands::BrandLinksRule;
pub use detail::DetailRule;
pub use listing::ListingRowsRule;
pub use repair::RepairRule;

use crate::config::{CrawlConfig, CrawlKind};
use crate::session::PageFetchResult;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use url::Url;

/// Field name to value; `None` marks a field the page did not provide
pub type Fields = BTreeMap<String, Option<String>>;

/// One extracted record, tied to the work unit it came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub unit_id: String,
    pub fields: Fields,
}

impl Record {
    pub fn new(unit_id: impl Into<String>, fields: Fields) -> Self {
        Self {
            unit_id: unit_id.into(),
            fields,
        }
    }

    /// Returns the value of a field, treating absent and null alike
    pub fn get(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_deref())
    }
}

/// A template-specific extraction rule
pub trait ExtractionRule: Send + Sync {
    /// Parses markup into zero or more field mappings
    fn parse(&self, markup: &str, unit_target: &str) -> Vec<Fields>;

    /// True when every page yields exactly one record
    fn single_record(&self) -> bool;
}

/// Turns fetched pages into records using one rule
#[derive(Clone)]
pub struct ExtractionPipeline {
    rule: Arc<dyn ExtractionRule>,
}

impl ExtractionPipeline {
    pub fn new(rule: Arc<dyn ExtractionRule>) -> Self {
        Self { rule }
    }

    /// Builds the pipeline matching a crawl entry's kind
    pub fn for_crawl(crawl: &CrawlConfig) -> Self {
        let site_base = crawl.site_base.as_deref().and_then(|b| Url::parse(b).ok());
        let rule: Arc<dyn ExtractionRule> = match crawl.kind {
            CrawlKind::Brands => Arc::new(BrandLinksRule::new(site_base)),
            CrawlKind::Links => Arc::new(ListingRowsRule::new(site_base)),
            CrawlKind::Details => Arc::new(DetailRule),
            CrawlKind::Repair => Arc::new(RepairRule::price(
                crawl.field.clone().unwrap_or_else(|| "price".to_string()),
            )),
        };
        Self::new(rule)
    }

    /// Extracts the records of one successfully fetched page
    ///
    /// Single-record rules always produce exactly one record, even when the
    /// rule found nothing on the page.
    pub fn extract(&self, page: &PageFetchResult) -> Vec<Record> {
        let unit_id = page.unit.id();
        let mut parsed = self.rule.parse(&page.markup, page.unit.target());

        if self.rule.single_record() {
            let fields = if parsed.is_empty() {
                Fields::new()
            } else {
                parsed.swap_remove(0)
            };
            return vec![Record::new(unit_id, fields)];
        }

        parsed
            .into_iter()
            .map(|fields| Record::new(unit_id, fields))
            .collect()
    }
}

impl std::fmt::Debug for ExtractionPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractionPipeline")
            .field("single_record", &self.rule.single_record())
            .finish()
    }
}

/// Collects the trimmed text of an element, `None` when blank
pub(crate) fn element_text(element: ElementRef<'_>) -> Option<String> {
    let text = element.text().collect::<String>();
    let trimmed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

/// Text of the first element matching `selector`
pub(crate) fn first_text(document: &Html, selector: &str) -> Option<String> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next().and_then(element_text)
}
