use crate::extract::{element_text, ExtractionRule, Fields};
use scraper::{Html, Selector};
use url::Url;

/// Extracts one record per listing row of a search result page
///
/// Fields: `listing_id`, `url` (absolute) and `title`. A row without a model
/// link still yields a record with those fields absent.
#[derive(Debug, Clone)]
pub struct ListingRowsRule {
    site_base: Option<Url>,
}

impl ListingRowsRule {
    pub fn new(site_base: Option<Url>) -> Self {
        Self { site_base }
    }

    fn resolve(&self, href: &str, unit_target: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with("javascript:") || href.starts_with('#') {
            return None;
        }

        let base = Url::parse(unit_target).ok().or_else(|| self.site_base.clone());
        match base {
            Some(base) => base.join(href).ok().map(|u| u.to_string()),
            None => Url::parse(href).ok().map(|u| u.to_string()),
        }
    }
}

impl ExtractionRule for ListingRowsRule {
    fn parse(&self, markup: &str, unit_target: &str) -> Vec<Fields> {
        let document = Html::parse_document(markup);

        let (Ok(row_selector), Ok(link_selector)) = (
            Selector::parse("tr.listing-list-item[id]"),
            Selector::parse("td.listing-modelname a"),
        ) else {
            return Vec::new();
        };

        document
            .select(&row_selector)
            .map(|row| {
                let link = row.select(&link_selector).next();

                let mut fields = Fields::new();
                fields.insert(
                    "listing_id".to_string(),
                    row.value().attr("id").map(str::to_string),
                );
                fields.insert(
                    "url".to_string(),
                    link.and_then(|a| a.value().attr("href"))
                        .and_then(|href| self.resolve(href, unit_target)),
                );
                fields.insert("title".to_string(), link.and_then(element_text));
                fields
            })
            .collect()
    }

    fn single_record(&self) -> bool {
        false
    }
}
