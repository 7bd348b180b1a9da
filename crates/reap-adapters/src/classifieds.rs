//! Classifieds search for seller-financed listings.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use reap_core::{normalize_fragment, Property, PropertyMetadata, PropertyType, SearchCriteria};
use reap_fetch::{FetchRequest, HttpFetcher};
use scraper::Html;
use tracing::{debug, warn};

use crate::{
    document_rows, extract_numbers, parse_money, parse_selector, select_first_attr,
    select_first_text, AdapterError, SourceAdapter, SourceTier,
};

pub const SOURCE_ID: &str = "classifieds";

pub const FINANCING_TERMS: [&str; 4] = ["owner finance", "seller finance", "owner will carry", "rent to own"];

const FINANCING_PHRASES: [&str; 7] = [
    "owner financ",
    "seller financ",
    "owner will carry",
    "owner carry",
    "rent to own",
    "lease option",
    "contract for deed",
];

const CITY_SUBDOMAINS: &[(&str, &str)] = &[
    ("atlanta", "atlanta"),
    ("austin", "austin"),
    ("birmingham", "bham"),
    ("charlotte", "charlotte"),
    ("chicago", "chicago"),
    ("cleveland", "cleveland"),
    ("columbus", "columbus"),
    ("dallas", "dallas"),
    ("dayton", "dayton"),
    ("detroit", "detroit"),
    ("houston", "houston"),
    ("indianapolis", "indianapolis"),
    ("jacksonville", "jacksonville"),
    ("kansas city", "kansascity"),
    ("memphis", "memphis"),
    ("nashville", "nashville"),
    ("phoenix", "phoenix"),
    ("san antonio", "sanantonio"),
    ("st louis", "stlouis"),
    ("tampa", "tampa"),
];

pub fn subdomain_for_city(city: &str) -> Option<&'static str> {
    let wanted = normalize_fragment(city);
    CITY_SUBDOMAINS
        .iter()
        .find(|(name, _)| *name == wanted)
        .map(|(_, sub)| *sub)
}

pub fn mentions_owner_financing(text: &str) -> bool {
    let lower = text.to_ascii_lowercase();
    FINANCING_PHRASES.iter().any(|phrase| lower.contains(phrase))
}

/// Bedrooms and square feet from listing text such as `3br - 1450ft2`.
fn housing_figures(text: &str) -> (Option<u32>, Option<u32>) {
    let lower = text.to_ascii_lowercase();
    let mut beds = None;
    let mut sqft = None;
    for token in lower.split_whitespace() {
        let value = extract_numbers(token).first().copied();
        if token.ends_with("br") || token.ends_with("bd") || token.ends_with("bed") || token.ends_with("beds") {
            beds = beds.or(value.map(|v| v as u32));
        } else if token.ends_with("ft2") || token.ends_with("sqft") {
            sqft = sqft.or(value.map(|v| v as u32));
        }
    }
    (beds, sqft)
}

pub fn parse_search_results(html: &str, criteria: &SearchCriteria) -> Result<Vec<Property>, AdapterError> {
    let row = parse_selector("li.cl-static-search-result")?;
    let link = parse_selector("a")?;
    let title = parse_selector(".title")?;
    let price = parse_selector(".price")?;
    let location = parse_selector(".location")?;
    let details = parse_selector(".details, .housing")?;

    let document = Html::parse_document(html);
    let properties = document_rows(&document, &row)
        .into_iter()
        .filter_map(|node| {
            let title_text = select_first_text(node, &title)?;
            let detail_text = select_first_text(node, &details).unwrap_or_default();
            let context = format!("{title_text} {detail_text}");
            let (bedrooms, square_feet) = housing_figures(&context);
            let neighborhood = select_first_text(node, &location);
            Some(Property {
                address: title_text.clone(),
                city: criteria.city_or_empty().to_string(),
                state: criteria.state_or_empty().to_string(),
                bedrooms,
                square_feet,
                property_type: PropertyType::infer_from_text(&context),
                price: select_first_text(node, &price).as_deref().and_then(parse_money),
                source: SOURCE_ID.to_string(),
                source_url: select_first_attr(node, &link, "href"),
                description: Some(match neighborhood {
                    Some(area) => format!("{title_text} ({area})"),
                    None => title_text.clone(),
                }),
                metadata: PropertyMetadata {
                    mentions_owner_financing: Some(mentions_owner_financing(&context)),
                    ..Default::default()
                },
                ..Default::default()
            })
        })
        .collect();
    Ok(properties)
}

/// Keeps the first occurrence of each listing URL. Listings without a URL are kept.
pub fn dedupe_by_url(properties: Vec<Property>) -> Vec<Property> {
    let mut seen = HashSet::new();
    properties
        .into_iter()
        .filter(|p| match &p.source_url {
            Some(url) => seen.insert(url.clone()),
            None => true,
        })
        .collect()
}

pub struct ClassifiedsAdapter {
    fetcher: Arc<HttpFetcher>,
    url_template: String,
}

impl ClassifiedsAdapter {
    pub fn new(fetcher: Arc<HttpFetcher>) -> Self {
        Self {
            fetcher,
            url_template: "https://{subdomain}.craigslist.org/search/rea".to_string(),
        }
    }

    pub fn with_url_template(mut self, template: impl Into<String>) -> Self {
        self.url_template = template.into();
        self
    }

    async fn search_term(&self, url: &str, term: &str, criteria: &SearchCriteria) -> Result<Vec<Property>, AdapterError> {
        let request = FetchRequest::get(url).query("query", term);
        let html = self.fetcher.get_text(SOURCE_ID, &request).await?;
        parse_search_results(&html, criteria)
    }
}

#[async_trait]
impl SourceAdapter for ClassifiedsAdapter {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Free
    }

    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<Property>, AdapterError> {
        let Some(subdomain) = subdomain_for_city(criteria.city_or_empty()) else {
            debug!(city = criteria.city_or_empty(), "no classifieds site for city");
            return Ok(Vec::new());
        };
        let url = self.url_template.replace("{subdomain}", subdomain);

        let results = join_all(
            FINANCING_TERMS
                .iter()
                .map(|term| self.search_term(&url, term, criteria)),
        )
        .await;

        let mut combined = Vec::new();
        for (term, result) in FINANCING_TERMS.iter().zip(results) {
            match result {
                Ok(mut props) => combined.append(&mut props),
                Err(err) => warn!(term, error = %err, "classifieds term search failed"),
            }
        }
        Ok(dedupe_by_url(combined))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULTS_HTML: &str = r#"
        <ol>
          <li class="cl-static-search-result">
            <a href="https://memphis.craigslist.org/reb/d/1.html">
              <div class="title">3br Owner Finance brick home, $5k down</div>
              <div class="details"><div class="price">$89,500</div><div class="location">Frayser</div>
              <span class="housing">3br - 1250ft2</span></div>
            </a>
          </li>
          <li class="cl-static-search-result">
            <a href="https://memphis.craigslist.org/reb/d/2.html">
              <div class="title">Duplex for sale by owner</div>
              <div class="price">$120,000</div>
            </a>
          </li>
          <li class="cl-static-search-result"><a href="x"><div class="price">$1</div></a></li>
        </ol>"#;

    #[test]
    fn results_parse_with_financing_flag() {
        let props = parse_search_results(RESULTS_HTML, &SearchCriteria::for_city("Memphis", "TN")).unwrap();

        assert_eq!(props.len(), 2);
        let first = &props[0];
        assert_eq!(first.price, Some(89_500.0));
        assert_eq!(first.bedrooms, Some(3));
        assert_eq!(first.square_feet, Some(1250));
        assert_eq!(first.city, "Memphis");
        assert_eq!(first.metadata.mentions_owner_financing, Some(true));
        assert_eq!(first.source_url.as_deref(), Some("https://memphis.craigslist.org/reb/d/1.html"));
        assert_eq!(props[1].property_type, PropertyType::Duplex);
        assert_eq!(props[1].metadata.mentions_owner_financing, Some(false));
    }

    #[test]
    fn financing_phrases_are_case_insensitive() {
        assert!(mentions_owner_financing("SELLER FINANCING available"));
        assert!(mentions_owner_financing("Contract for Deed"));
        assert!(!mentions_owner_financing("cash only, no financing"));
    }

    #[test]
    fn duplicate_urls_keep_first_in_order() {
        let listing = |url: &str, title: &str| Property {
            address: title.into(),
            source_url: Some(url.into()),
            ..Default::default()
        };
        let deduped = dedupe_by_url(vec![
            listing("u1", "a"),
            listing("u2", "b"),
            listing("u1", "c"),
            Property::default(),
        ]);
        let titles: Vec<_> = deduped.iter().map(|p| p.address.as_str()).collect();
        assert_eq!(titles, vec!["a", "b", ""]);
    }

    #[test]
    fn city_subdomains_are_normalized() {
        assert_eq!(subdomain_for_city("San Antonio"), Some("sanantonio"));
        assert_eq!(subdomain_for_city("St. Louis"), Some("stlouis"));
        assert_eq!(subdomain_for_city("Nowhere"), None);
    }
}
