//! Public county registries: tax-sale and sheriff-sale listing pages, plus optional open-data feeds.

use std::sync::Arc;

use async_trait::async_trait;
use reap_core::{normalize_fragment, Property, PropertyMetadata, PropertyType, SearchCriteria};
use reap_fetch::{FetchRequest, HttpFetcher};
use scraper::{ElementRef, Html, Selector};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{
    document_rows, json_f64, json_str, parse_money, parse_selector, select_first_attr,
    select_first_text, text_or_none, AdapterError, SourceAdapter, SourceTier,
};

pub const SOURCE_ID: &str = "county-registry";

const EMBEDDED_COUNTIES: &str = include_str!("counties.yaml");

#[derive(Debug, Clone, Deserialize)]
pub struct CountySelectors {
    pub row: String,
    pub address: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub auction_date: Option<String>,
    #[serde(default)]
    pub parcel_id: Option<String>,
    #[serde(default)]
    pub link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenDataFields {
    pub address: String,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub zip: Option<String>,
    #[serde(default)]
    pub price: Option<String>,
    #[serde(default)]
    pub auction_date: Option<String>,
    #[serde(default)]
    pub parcel_id: Option<String>,
    #[serde(default)]
    pub latitude: Option<String>,
    #[serde(default)]
    pub longitude: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenDataFeed {
    pub url: String,
    pub city_field: String,
    #[serde(default = "default_feed_limit")]
    pub limit: u32,
    pub fields: OpenDataFields,
}

fn default_feed_limit() -> u32 {
    100
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountyConfig {
    pub id: String,
    pub name: String,
    pub state: String,
    pub cities: Vec<String>,
    pub base_url: String,
    pub listing_path: String,
    pub selectors: CountySelectors,
    #[serde(default)]
    pub open_data: Option<OpenDataFeed>,
}

impl CountyConfig {
    pub fn listing_url(&self) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), self.listing_path)
    }

    fn absolute_url(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_string()
        } else {
            format!("{}/{}", self.base_url.trim_end_matches('/'), href.trim_start_matches('/'))
        }
    }

    fn serves(&self, city: &str, state: &str) -> bool {
        let city = normalize_fragment(city);
        (state.is_empty() || self.state.eq_ignore_ascii_case(state))
            && self.cities.iter().any(|c| normalize_fragment(c) == city)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CountyRegistry {
    pub counties: Vec<CountyConfig>,
}

impl CountyRegistry {
    pub fn from_yaml(text: &str) -> Result<Self, AdapterError> {
        serde_yaml::from_str(text).map_err(|e| AdapterError::Message(format!("county table: {e}")))
    }

    /// The compiled-in county table.
    pub fn embedded() -> Result<Self, AdapterError> {
        Self::from_yaml(EMBEDDED_COUNTIES)
    }

    pub fn lookup(&self, city: &str, state: &str) -> Option<&CountyConfig> {
        if city.trim().is_empty() {
            return None;
        }
        self.counties.iter().find(|c| c.serves(city, state.trim()))
    }
}

struct RowSelectors {
    row: Selector,
    address: Selector,
    city: Option<Selector>,
    zip: Option<Selector>,
    price: Option<Selector>,
    auction_date: Option<Selector>,
    parcel_id: Option<Selector>,
    link: Option<Selector>,
}

impl RowSelectors {
    fn compile(raw: &CountySelectors) -> Result<Self, AdapterError> {
        let optional = |s: &Option<String>| s.as_deref().map(parse_selector).transpose();
        Ok(Self {
            row: parse_selector(&raw.row)?,
            address: parse_selector(&raw.address)?,
            city: optional(&raw.city)?,
            zip: optional(&raw.zip)?,
            price: optional(&raw.price)?,
            auction_date: optional(&raw.auction_date)?,
            parcel_id: optional(&raw.parcel_id)?,
            link: optional(&raw.link)?,
        })
    }
}

fn cell(row: ElementRef<'_>, selector: &Option<Selector>) -> Option<String> {
    selector.as_ref().and_then(|sel| select_first_text(row, sel))
}

fn registry_property(
    county: &CountyConfig,
    criteria: &SearchCriteria,
    address: String,
    parts: RegistryParts,
) -> Property {
    let mut metadata = PropertyMetadata {
        auction_date: parts.auction_date,
        ..Default::default()
    };
    metadata.extra.insert("county".into(), JsonValue::from(county.name.clone()));
    if let Some(parcel) = &parts.parcel_id {
        metadata.extra.insert("parcelId".into(), JsonValue::from(parcel.clone()));
    }
    let property_type = PropertyType::infer_from_text(&parts.context_text);
    Property {
        address,
        city: parts.city.unwrap_or_else(|| criteria.city_or_empty().to_string()),
        state: county.state.clone(),
        zip_code: parts.zip.unwrap_or_default(),
        latitude: parts.latitude,
        longitude: parts.longitude,
        property_type,
        price: parts.price,
        source: SOURCE_ID.to_string(),
        external_id: parts.parcel_id,
        source_url: parts.link,
        description: text_or_none(&parts.context_text),
        metadata,
        ..Default::default()
    }
}

#[derive(Default)]
struct RegistryParts {
    city: Option<String>,
    zip: Option<String>,
    price: Option<f64>,
    auction_date: Option<String>,
    parcel_id: Option<String>,
    link: Option<String>,
    latitude: Option<f64>,
    longitude: Option<f64>,
    context_text: String,
}

/// Rows without an address are skipped.
pub fn parse_listing_html(
    county: &CountyConfig,
    criteria: &SearchCriteria,
    html: &str,
) -> Result<Vec<Property>, AdapterError> {
    let selectors = RowSelectors::compile(&county.selectors)?;
    let document = Html::parse_document(html);
    let properties = document_rows(&document, &selectors.row)
        .into_iter()
        .filter_map(|row| {
            let address = select_first_text(row, &selectors.address)?;
            let parts = RegistryParts {
                city: cell(row, &selectors.city),
                zip: cell(row, &selectors.zip),
                price: cell(row, &selectors.price).as_deref().and_then(parse_money),
                auction_date: cell(row, &selectors.auction_date),
                parcel_id: cell(row, &selectors.parcel_id),
                link: selectors
                    .link
                    .as_ref()
                    .and_then(|sel| select_first_attr(row, sel, "href"))
                    .map(|href| county.absolute_url(&href)),
                context_text: row.text().collect::<Vec<_>>().join(" "),
                ..Default::default()
            };
            Some(registry_property(county, criteria, address, parts))
        })
        .collect();
    Ok(properties)
}

pub fn parse_open_data(
    county: &CountyConfig,
    feed: &OpenDataFeed,
    criteria: &SearchCriteria,
    body: &JsonValue,
) -> Vec<Property> {
    let Some(items) = body.as_array() else {
        return Vec::new();
    };
    let field = |item: &JsonValue, name: &Option<String>| name.as_deref().and_then(|n| json_str(item, n));
    let number = |item: &JsonValue, name: &Option<String>| name.as_deref().and_then(|n| json_f64(item, n));
    items
        .iter()
        .filter_map(|item| {
            let address = json_str(item, &feed.fields.address)?;
            let parts = RegistryParts {
                city: field(item, &feed.fields.city),
                zip: field(item, &feed.fields.zip),
                price: number(item, &feed.fields.price),
                auction_date: field(item, &feed.fields.auction_date),
                parcel_id: field(item, &feed.fields.parcel_id),
                latitude: number(item, &feed.fields.latitude),
                longitude: number(item, &feed.fields.longitude),
                context_text: String::new(),
                ..Default::default()
            };
            Some(registry_property(county, criteria, address, parts))
        })
        .collect()
}

pub struct RegistryAdapter {
    fetcher: Arc<HttpFetcher>,
    registry: CountyRegistry,
}

impl RegistryAdapter {
    pub fn new(fetcher: Arc<HttpFetcher>, registry: CountyRegistry) -> Self {
        Self { fetcher, registry }
    }

    pub fn with_embedded_counties(fetcher: Arc<HttpFetcher>) -> Result<Self, AdapterError> {
        Ok(Self::new(fetcher, CountyRegistry::embedded()?))
    }

    async fn scrape_listing_page(
        &self,
        county: &CountyConfig,
        criteria: &SearchCriteria,
    ) -> Result<Vec<Property>, AdapterError> {
        let request = FetchRequest::get(county.listing_url());
        let html = self.fetcher.get_text(SOURCE_ID, &request).await?;
        parse_listing_html(county, criteria, &html)
    }

    async fn query_open_data(
        &self,
        county: &CountyConfig,
        criteria: &SearchCriteria,
    ) -> Result<Vec<Property>, AdapterError> {
        let Some(feed) = &county.open_data else {
            return Ok(Vec::new());
        };
        let request = FetchRequest::get(feed.url.clone())
            .query(feed.city_field.clone(), criteria.city_or_empty().to_ascii_uppercase())
            .query("$limit", feed.limit.to_string());
        let body: JsonValue = self.fetcher.get_json(SOURCE_ID, &request).await?;
        Ok(parse_open_data(county, feed, criteria, &body))
    }
}

#[async_trait]
impl SourceAdapter for RegistryAdapter {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Free
    }

    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<Property>, AdapterError> {
        let Some(county) = self
            .registry
            .lookup(criteria.city_or_empty(), criteria.state_or_empty())
        else {
            debug!(city = criteria.city_or_empty(), "no county registry configured for city");
            return Ok(Vec::new());
        };

        let (listing, open_data) = tokio::join!(
            self.scrape_listing_page(county, criteria),
            self.query_open_data(county, criteria)
        );

        match (listing, open_data) {
            (Err(listing_err), Err(open_err)) => {
                warn!(county = %county.id, error = %open_err, "open data feed failed");
                Err(listing_err)
            }
            (listing, open_data) => {
                let mut out = Vec::new();
                for (channel, result) in [("listing_page", listing), ("open_data", open_data)] {
                    match result {
                        Ok(mut props) => out.append(&mut props),
                        Err(err) => warn!(county = %county.id, channel, error = %err, "registry channel failed"),
                    }
                }
                Ok(out)
            }
        }
    }
}
