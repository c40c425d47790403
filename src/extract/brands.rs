use crate::extract::{element_text, ExtractionRule, Fields};
use scraper::{Html, Selector};
use std::collections::BTreeMap;
use url::Url;

/// Extracts the brand listing links of a category page
///
/// One record per distinct brand link, sorted by absolute URL. Fields: `url`
/// and `brand` (anchor text). Only site-relative links (`href` starting with
/// `/`) inside the category list count as brands.
#[derive(Debug, Clone)]
pub struct BrandLinksRule {
    site_base: Option<Url>,
}

impl BrandLinksRule {
    pub fn new(site_base: Option<Url>) -> Self {
        Self { site_base }
    }

    fn resolve(&self, href: &str, unit_target: &str) -> Option<String> {
        let base = self
            .site_base
            .clone()
            .or_else(|| Url::parse(unit_target).ok())?;
        base.join(href).ok().map(|u| u.to_string())
    }
}

impl ExtractionRule for BrandLinksRule {
    fn parse(&self, markup: &str, unit_target: &str) -> Vec<Fields> {
        let document = Html::parse_document(markup);
        let Ok(selector) = Selector::parse(r#"div.category-list-wrapper a.list-item[href^="/"]"#)
        else {
            return Vec::new();
        };

        let mut brands: BTreeMap<String, Option<String>> = BTreeMap::new();
        for link in document.select(&selector) {
            let Some(url) = link
                .value()
                .attr("href")
                .and_then(|href| self.resolve(href.trim(), unit_target))
            else {
                continue;
            };
            brands.entry(url).or_insert_with(|| element_text(link));
        }

        brands
            .into_iter()
            .map(|(url, brand)| {
                let mut fields = Fields::new();
                fields.insert("url".to_string(), Some(url));
                fields.insert("brand".to_string(), brand);
                fields
            })
            .collect()
    }

    fn single_record(&self) -> bool {
        false
    }
}
