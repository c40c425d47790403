use crate::extract::{element_text, first_text, ExtractionRule, Fields};
use scraper::{Html, Selector};

/// Damage status labels and the field each one fills
const DAMAGE_FIELDS: [(&str, &str); 3] = [
    ("Boyalı", "painted_parts"),
    ("Lokal boyalı", "locally_painted_parts"),
    ("Değişmiş", "replaced_parts"),
];

/// Extracts the single record of a listing detail page
///
/// Fixed fields are always present in the mapping (possibly `None`); every
/// `property-item` key/value pair found on the page is added under its own
/// label.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetailRule;

impl ExtractionRule for DetailRule {
    fn parse(&self, markup: &str, _unit_target: &str) -> Vec<Fields> {
        let document = Html::parse_document(markup);
        let mut fields = Fields::new();

        for (key, value) in property_items(&document) {
            fields.insert(key, Some(value));
        }

        fields.insert("title".to_string(), first_text(&document, "div.product-title"));
        fields.insert(
            "price".to_string(),
            first_text(&document, "span.product-price-new"),
        );
        fields.insert(
            "tramer".to_string(),
            first_text(&document, ".tramer-info .property-value"),
        );

        let damage = damage_summary(&document);
        for (label, field) in DAMAGE_FIELDS {
            let value = damage
                .iter()
                .find(|(status, _)| status == label)
                .map(|(_, parts)| parts.clone());
            fields.insert(field.to_string(), value);
        }

        vec![fields]
    }

    fn single_record(&self) -> bool {
        true
    }
}

fn property_items(document: &Html) -> Vec<(String, String)> {
    let (Ok(item), Ok(key), Ok(value)) = (
        Selector::parse("div.property-item"),
        Selector::parse("div.property-key"),
        Selector::parse("div.property-value"),
    ) else {
        return Vec::new();
    };

    document
        .select(&item)
        .filter_map(|element| {
            let k = element.select(&key).next().and_then(element_text)?;
            let v = element.select(&value).next().and_then(element_text)?;
            Some((k, v))
        })
        .collect()
}

/// Status label -> comma separated part names ("none" when the list is empty)
fn damage_summary(document: &Html) -> Vec<(String, String)> {
    let (Ok(item), Ok(status), Ok(part)) = (
        Selector::parse("div.car-damage-info div.car-damage-info-item"),
        Selector::parse("p"),
        Selector::parse("li"),
    ) else {
        return Vec::new();
    };

    document
        .select(&item)
        .filter_map(|element| {
            let label = element.select(&status).next().and_then(element_text)?;
            let parts: Vec<String> = element
                .select(&part)
                .filter_map(element_text)
                .filter(|p| p != "-")
                .collect();
            let joined = if parts.is_empty() {
                "none".to_string()
            } else {
                parts.join(", ")
            };
            Some((label, joined))
        })
        .collect()
}
