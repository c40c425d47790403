use crate::frontier::WorkUnit;
use async_trait::async_trait;
use scraper::{Html, Selector};
use std::collections::HashSet;
use tokio_util::sync::CancellationToken;

/// Fetches the first page of a seed so its pagination control can be read
#[async_trait]
pub trait PageProbe: Send {
    /// Returns the page markup, or `None` when the page could not be loaded
    async fn probe(&mut self, unit: &WorkUnit) -> Option<String>;
}

/// Frontier over the result pages of one or more paginated seeds
#[derive(Debug, Clone)]
pub struct PaginatedFrontier {
    seeds: Vec<String>,
    last_page_title: String,
}

impl PaginatedFrontier {
    pub fn new(seeds: Vec<String>, last_page_title: impl Into<String>) -> Self {
        Self {
            seeds,
            last_page_title: last_page_title.into(),
        }
    }

    /// Probes every seed and yields one unit per discovered page, pages 1..=n in order
    ///
    /// Probing stops at the first seed reached after `cancel` fires; the
    /// units enumerated so far are returned.
    pub async fn enumerate<P>(self, probe: &mut P, cancel: &CancellationToken) -> Vec<WorkUnit>
    where
        P: PageProbe + ?Sized,
    {
        let mut seen_seeds = HashSet::new();
        let mut seen_units = HashSet::new();
        let mut units = Vec::new();

        for seed in &self.seeds {
            if cancel.is_cancelled() {
                tracing::info!("Stop requested, remaining seeds skipped");
                break;
            }
            let seed = seed.trim();
            if seed.is_empty() || !seen_seeds.insert(seed.to_string()) {
                continue;
            }

            let probed = probe.probe(&WorkUnit::new(seed)).await;
            if cancel.is_cancelled() {
                tracing::info!("Stop requested while reading pagination of {}", seed);
                break;
            }

            let pages = match probed {
                Some(markup) => discover_page_count(&markup, &self.last_page_title),
                None => {
                    tracing::warn!("Could not load {} to read pagination, assuming 1 page", seed);
                    1
                }
            };
            tracing::info!("{}: {} page(s) to crawl", seed, pages);

            for page in 1..=pages {
                let unit = WorkUnit::new(page_target(seed, page));
                if seen_units.insert(unit.id().to_string()) {
                    units.push(unit);
                }
            }
        }

        units
    }
}

/// Builds the target of result page `page` of `seed`
pub fn page_target(seed: &str, page: u32) -> String {
    let separator = if seed.contains('?') { '&' } else { '?' };
    format!("{}{}page={}", seed, separator, page)
}

/// Reads the number of result pages from a listing page's pagination control
///
/// - No `ul.pagination` at all: 1 page
/// - A "last page" link titled `last_page_title`: the number after `page=` in its href
/// - Otherwise, a list with more than two entries: the second-to-last entry's text
/// - Anything unparseable: 1 page
pub fn discover_page_count(markup: &str, last_page_title: &str) -> u32 {
    let document = Html::parse_document(markup);

    let Ok(pagination_selector) = Selector::parse("ul.pagination") else {
        return 1;
    };
    let Some(pagination) = document.select(&pagination_selector).next() else {
        return 1;
    };

    if let Ok(link_selector) = Selector::parse("a[title]") {
        let last_link = pagination
            .select(&link_selector)
            .find(|a| a.value().attr("title") == Some(last_page_title));

        if let Some(link) = last_link {
            return link
                .value()
                .attr("href")
                .and_then(|href| href.rsplit("page=").next())
                .and_then(leading_number)
                .unwrap_or(1)
                .max(1);
        }
    }

    let Ok(item_selector) = Selector::parse("li") else {
        return 1;
    };
    let items: Vec<_> = pagination.select(&item_selector).collect();
    if items.len() > 2 {
        let text = items[items.len() - 2].text().collect::<String>();
        return text.trim().parse::<u32>().unwrap_or(1).max(1);
    }

    1
}

fn leading_number(s: &str) -> Option<u32> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}
