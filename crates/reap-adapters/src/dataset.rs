//! Bulk-dataset vendor: one trigger/snapshot cycle per search, flat records per listing.

use async_trait::async_trait;
use reap_core::{Property, PropertyMetadata, PropertyType, SearchCriteria};
use reap_fetch::{JobOrchestrator, RetryPolicy};
use serde_json::{json, Value as JsonValue};
use tracing::debug;

use crate::{
    first_f64, first_images, first_str, first_u32, AdapterError, SourceAdapter, SourceTier,
};

pub const SOURCE_ID: &str = "bulk-dataset";
pub const DEFAULT_SEARCH_URL_TEMPLATE: &str = "https://www.zillow.com/homes/{location}_rb/";
pub const DATASET_POLL_ATTEMPTS: u32 = 15;

/// One vendor record, narrowed out of the snapshot payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DatasetRecord {
    pub external_id: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub living_area: Option<u32>,
    pub lot_size: Option<f64>,
    pub year_built: Option<u32>,
    pub home_type: Option<String>,
    pub price: Option<f64>,
    pub value_estimate: Option<f64>,
    pub rent_estimate: Option<f64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub url: Option<String>,
    pub images: Vec<String>,
    pub days_on_market: Option<u32>,
    pub description: Option<String>,
}

impl DatasetRecord {
    /// `None` for anything that is not an object. Address may be flat or nested.
    pub fn from_json(item: &JsonValue) -> Option<Self> {
        if !item.is_object() {
            return None;
        }
        Some(Self {
            external_id: first_str(item, &["zpid", "id", "listing_id"]),
            street: first_str(item, &["address.streetAddress", "streetAddress", "address", "address_line"]),
            city: first_str(item, &["address.city", "city"]),
            state: first_str(item, &["address.state", "state"]),
            zip_code: first_str(item, &["address.zipcode", "zipcode", "zip_code", "postal_code"]),
            bedrooms: first_u32(item, &["bedrooms", "beds"]),
            bathrooms: first_f64(item, &["bathrooms", "baths"]),
            living_area: first_u32(item, &["livingArea", "living_area", "sqft"]),
            lot_size: first_f64(item, &["lotSize", "lotAreaValue", "lot_size"]),
            year_built: first_u32(item, &["yearBuilt", "year_built"]),
            home_type: first_str(item, &["homeType", "home_type", "propertyType"]),
            price: first_f64(item, &["price", "unformattedPrice", "listPrice"]),
            value_estimate: first_f64(item, &["zestimate", "estimate", "value_estimate"]),
            rent_estimate: first_f64(item, &["rentZestimate", "rent_estimate"]),
            latitude: first_f64(item, &["latitude", "latLong.latitude"]),
            longitude: first_f64(item, &["longitude", "latLong.longitude"]),
            url: first_str(item, &["url", "hdpUrl", "detailUrl"]),
            images: first_images(item, &["photos", "images", "imgSrc"]),
            days_on_market: first_u32(item, &["daysOnZillow", "days_on_market", "timeOnZillow"]),
            description: first_str(item, &["description"]),
        })
    }

    pub fn into_property(self, criteria: &SearchCriteria) -> Option<Property> {
        let street = self.street?;
        let property_type = match &self.home_type {
            Some(raw) => PropertyType::from_vendor(raw),
            None => PropertyType::infer_from_text(self.description.as_deref().unwrap_or_default()),
        };
        Some(Property {
            address: street,
            city: self.city.unwrap_or_else(|| criteria.city_or_empty().to_string()),
            state: self.state.unwrap_or_else(|| criteria.state_or_empty().to_string()),
            zip_code: self.zip_code.unwrap_or_default(),
            latitude: self.latitude,
            longitude: self.longitude,
            bedrooms: self.bedrooms,
            bathrooms: self.bathrooms,
            square_feet: self.living_area,
            lot_size: self.lot_size,
            year_built: self.year_built,
            property_type,
            price: self.price,
            estimated_value: self.value_estimate,
            estimated_rent: self.rent_estimate,
            source: SOURCE_ID.to_string(),
            external_id: self.external_id,
            source_url: self.url,
            images: self.images,
            description: self.description,
            metadata: PropertyMetadata {
                days_on_market: self.days_on_market,
                ..Default::default()
            },
        })
    }
}

pub struct DatasetAdapter {
    jobs: JobOrchestrator,
    search_url_template: String,
}

impl DatasetAdapter {
    pub fn new(jobs: JobOrchestrator) -> Self {
        let policy = jobs.policy().with_attempts(DATASET_POLL_ATTEMPTS);
        Self {
            jobs: jobs.with_policy(policy),
            search_url_template: DEFAULT_SEARCH_URL_TEMPLATE.to_string(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.jobs = self.jobs.with_policy(policy);
        self
    }

    pub fn with_search_url_template(mut self, template: impl Into<String>) -> Self {
        self.search_url_template = template.into();
        self
    }

    pub fn search_url(&self, criteria: &SearchCriteria) -> String {
        let location = match criteria.zip_code.as_deref().filter(|z| !z.trim().is_empty()) {
            Some(zip) => zip.trim().to_string(),
            None => format!("{}-{}", criteria.city_or_empty(), criteria.state_or_empty()),
        };
        let slug = location
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .to_ascii_lowercase();
        self.search_url_template.replace("{location}", &slug)
    }
}

pub fn normalize_records(items: &[JsonValue], criteria: &SearchCriteria) -> Vec<Property> {
    items
        .iter()
        .filter_map(|item| {
            let record = DatasetRecord::from_json(item);
            if record.is_none() {
                debug!(source_id = SOURCE_ID, "skipping non-object dataset item");
            }
            record
        })
        .filter_map(|record| record.into_property(criteria))
        .collect()
}

#[async_trait]
impl SourceAdapter for DatasetAdapter {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Paid
    }

    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<Property>, AdapterError> {
        let target = self.search_url(criteria);
        let payload = json!([{ "url": target }]);
        let items = self.jobs.run(&target, &payload).await;
        Ok(normalize_records(&items, criteria))
    }
}
