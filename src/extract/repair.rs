use crate::extract::{element_text, ExtractionRule, Fields};
use scraper::{Html, Selector};

/// Price containers, most specific first
const PRICE_SELECTORS: [&str; 5] = [
    "div.desktop-information-price",
    "div.product-price",
    "span.product-price-new",
    "span.price",
    "div.price-container",
];

/// Re-extracts one field of a record from a selector cascade
///
/// The first element whose text looks like a value wins; the record is
/// produced even when no selector matched, with the field absent.
#[derive(Debug, Clone)]
pub struct RepairRule {
    field: String,
    selectors: Vec<String>,
}

impl RepairRule {
    pub fn new(field: impl Into<String>, selectors: Vec<String>) -> Self {
        Self {
            field: field.into(),
            selectors,
        }
    }

    /// Cascade tuned for listing prices
    pub fn price(field: impl Into<String>) -> Self {
        Self::new(field, PRICE_SELECTORS.iter().map(|s| s.to_string()).collect())
    }

    pub fn field(&self) -> &str {
        &self.field
    }
}

impl ExtractionRule for RepairRule {
    fn parse(&self, markup: &str, _unit_target: &str) -> Vec<Fields> {
        let document = Html::parse_document(markup);

        let found = self
            .selectors
            .iter()
            .filter_map(|s| Selector::parse(s).ok())
            .find_map(|selector| {
                document
                    .select(&selector)
                    .next()
                    .and_then(element_text)
                    .filter(|text| looks_like_value(text))
            });

        let mut fields = Fields::new();
        fields.insert(self.field.clone(), found);
        vec![fields]
    }

    fn single_record(&self) -> bool {
        true
    }
}

fn looks_like_value(text: &str) -> bool {
    text.contains("TL") || text.chars().any(|c| c.is_ascii_digit())
}
