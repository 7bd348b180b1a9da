//! Source adapter contracts + adapter implementations for every property and fact source.

use async_trait::async_trait;
use reap_core::{Property, SearchCriteria};
use reap_fetch::FetchError;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};

pub mod classifieds;
pub mod dataset;
pub mod facts;
pub mod listing_api;
pub mod registry;

pub use classifieds::ClassifiedsAdapter;
pub use dataset::{DatasetAdapter, DatasetRecord};
pub use facts::{
    CrimeApiClient, CrimeDataSource, CrimeStats, FairMarketRents, FmrBasis, FmrQuote, HudFmrClient,
    OffenderRecord, OffenderRegistry, OffenderRegistryClient, SchoolRatings, SchoolRatingsClient,
    SchoolRecord, SubsidyRateSource,
};
pub use listing_api::{ListingSearchAdapter, VendorProfile};
pub use registry::{CountyConfig, CountyRegistry, RegistryAdapter};

pub const CRATE_NAME: &str = "reap-adapters";

/// Whether a source needs paid credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTier {
    Free,
    Paid,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid selector `{selector}`: {reason}")]
    Selector { selector: String, reason: String },
    #[error("source unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn tier(&self) -> SourceTier;

    /// Fallible lookup. Implementations narrow raw payloads into [`Property`] here.
    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<Property>, AdapterError>;

    /// Never fails: errors are logged and become an empty result.
    async fn search(&self, criteria: &SearchCriteria) -> Vec<Property> {
        match self.fetch(criteria).await {
            Ok(properties) => {
                info!(source_id = self.source_id(), count = properties.len(), "source search complete");
                properties
            }
            Err(err) => {
                warn!(source_id = self.source_id(), error = %err, "source search failed");
                Vec::new()
            }
        }
    }
}

pub(crate) fn text_or_none(value: impl AsRef<str>) -> Option<String> {
    let collapsed = value
        .as_ref()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Selector {
        selector: selector.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn select_first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|n| text_or_none(n.text().collect::<String>()))
}

pub(crate) fn select_first_attr(element: ElementRef<'_>, selector: &Selector, attr: &str) -> Option<String> {
    element
        .select(selector)
        .next()
        .and_then(|n| n.value().attr(attr))
        .and_then(text_or_none)
}

pub(crate) fn document_rows<'a>(document: &'a Html, selector: &Selector) -> Vec<ElementRef<'a>> {
    document.select(selector).collect()
}

pub(crate) fn extract_numbers(text: &str) -> Vec<f64> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut seen_dot = false;
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        if ch == '.' && !seen_dot && !current.is_empty() {
            current.push(ch);
            seen_dot = true;
            continue;
        }
        if !current.is_empty() {
            if let Ok(v) = current.trim_end_matches('.').parse::<f64>() {
                out.push(v);
            }
            current.clear();
            seen_dot = false;
        }
    }
    if !current.is_empty() {
        if let Ok(v) = current.trim_end_matches('.').parse::<f64>() {
            out.push(v);
        }
    }
    out
}

/// First money amount in `text`, tolerating `$` and thousands separators. `$185k` is 185,000.
pub(crate) fn parse_money(text: &str) -> Option<f64> {
    let cleaned = text.replace(',', "");
    let lower = cleaned.to_ascii_lowercase();
    let value = extract_numbers(&lower).into_iter().next()?;
    let digits_end = lower
        .find(|c: char| c.is_ascii_digit())
        .and_then(|start| {
            lower[start..]
                .find(|c: char| !(c.is_ascii_digit() || c == '.'))
                .map(|off| start + off)
        });
    let multiplier = match digits_end.and_then(|i| lower[i..].chars().next()) {
        Some('k') => 1_000.0,
        Some('m') => 1_000_000.0,
        _ => 1.0,
    };
    let amount = value * multiplier;
    if amount > 0.0 {
        Some(amount)
    } else {
        None
    }
}

/// Resolves a dotted path (`a.b.0.c`) into a JSON value.
pub(crate) fn json_at<'a>(value: &'a JsonValue, path: &str) -> Option<&'a JsonValue> {
    if path.is_empty() {
        return Some(value);
    }
    let mut cur = value;
    for segment in path.split('.') {
        cur = match cur {
            JsonValue::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => cur.get(segment)?,
        };
    }
    if cur.is_null() {
        None
    } else {
        Some(cur)
    }
}

pub(crate) fn json_str(value: &JsonValue, path: &str) -> Option<String> {
    match json_at(value, path)? {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Numbers or numeric strings (`"$250,000"`).
pub(crate) fn json_f64(value: &JsonValue, path: &str) -> Option<f64> {
    match json_at(value, path)? {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().parse::<f64>().ok().or_else(|| parse_money(s)),
        _ => None,
    }
}

pub(crate) fn json_u32(value: &JsonValue, path: &str) -> Option<u32> {
    json_f64(value, path)
        .filter(|v| v.is_finite() && *v >= 0.0)
        .map(|v| v.round() as u32)
}

/// Image URLs from an array of strings or of `{url|href|src}` objects.
pub(crate) fn json_image_urls(value: &JsonValue, path: &str) -> Vec<String> {
    let Some(JsonValue::Array(items)) = json_at(value, path) else {
        return match json_str(value, path) {
            Some(single) => vec![single],
            None => Vec::new(),
        };
    };
    items
        .iter()
        .filter_map(|item| match item {
            JsonValue::String(s) => text_or_none(s),
            JsonValue::Object(_) => ["url", "href", "src"]
                .iter()
                .find_map(|field| json_str(item, field)),
            _ => None,
        })
        .collect()
}

/// First path among alternatives that resolves.
pub(crate) fn first_str(value: &JsonValue, paths: &[&str]) -> Option<String> {
    paths.iter().find_map(|p| json_str(value, p))
}

pub(crate) fn first_f64(value: &JsonValue, paths: &[&str]) -> Option<f64> {
    paths.iter().find_map(|p| json_f64(value, p))
}

pub(crate) fn first_u32(value: &JsonValue, paths: &[&str]) -> Option<u32> {
    paths.iter().find_map(|p| json_u32(value, p))
}

pub(crate) fn first_images(value: &JsonValue, paths: &[&str]) -> Vec<String> {
    paths
        .iter()
        .map(|p| json_image_urls(value, p))
        .find(|urls| !urls.is_empty())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn money_parsing_handles_separators_and_suffixes() {
        assert_eq!(parse_money("$250,000"), Some(250_000.0));
        assert_eq!(parse_money("Opening bid: $12,500.50"), Some(12_500.5));
        assert_eq!(parse_money("$185k"), Some(185_000.0));
        assert_eq!(parse_money("1.2M"), Some(1_200_000.0));
        assert_eq!(parse_money("call for price"), None);
        assert_eq!(parse_money("$0"), None);
    }

    #[test]
    fn json_paths_walk_objects_and_arrays() {
        let value = json!({
            "data": {"results": [{"location": {"address": {"line": "1 Elm St"}}}]},
            "price": "$199,900",
            "beds": 3.0,
            "photos": [{"href": "a.jpg"}, "b.jpg", 7]
        });
        assert_eq!(json_str(&value, "data.results.0.location.address.line"), Some("1 Elm St".into()));
        assert_eq!(json_f64(&value, "price"), Some(199_900.0));
        assert_eq!(json_u32(&value, "beds"), Some(3));
        assert_eq!(json_image_urls(&value, "photos"), vec!["a.jpg".to_string(), "b.jpg".to_string()]);
        assert_eq!(first_str(&value, &["missing", "data.results.0.location.address.line"]), Some("1 Elm St".into()));
        assert!(json_at(&value, "data.results.5").is_none());
    }

    #[test]
    fn extract_numbers_splits_runs() {
        assert_eq!(extract_numbers("3br 2ba 1500ft2"), vec![3.0, 2.0, 1500.0, 2.0]);
        assert_eq!(extract_numbers("ends with dot 12."), vec![12.0]);
    }
}
