//! Keyed listing-search vendors. One adapter, parameterized by a [`VendorProfile`] per vendor.

use std::sync::Arc;

use async_trait::async_trait;
use reap_core::{Property, PropertyMetadata, PropertyType, SearchCriteria};
use reap_fetch::{FetchRequest, HttpFetcher};
use serde_json::Value as JsonValue;

use crate::{
    first_f64, first_images, first_str, first_u32, json_at, AdapterError, SourceAdapter, SourceTier,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VendorAuth {
    Header(&'static str),
    Bearer,
    Query(&'static str),
}

/// Where each normalized field lives in one vendor's result objects.
#[derive(Debug, Clone)]
pub struct VendorFields {
    pub external_id: &'static [&'static str],
    pub address: &'static [&'static str],
    pub city: &'static [&'static str],
    pub state: &'static [&'static str],
    pub zip_code: &'static [&'static str],
    pub latitude: &'static [&'static str],
    pub longitude: &'static [&'static str],
    pub bedrooms: &'static [&'static str],
    pub bathrooms: &'static [&'static str],
    pub square_feet: &'static [&'static str],
    pub lot_size: &'static [&'static str],
    pub year_built: &'static [&'static str],
    pub property_type: &'static [&'static str],
    pub price: &'static [&'static str],
    pub estimated_value: &'static [&'static str],
    pub estimated_rent: &'static [&'static str],
    pub url: &'static [&'static str],
    pub images: &'static [&'static str],
    pub days_on_market: &'static [&'static str],
    pub description: &'static [&'static str],
}

#[derive(Debug, Clone)]
pub struct VendorProfile {
    pub source_id: &'static str,
    pub base_url: String,
    pub search_path: &'static str,
    pub auth: VendorAuth,
    /// Dotted path to the result array; empty when the body itself is the array.
    pub results_path: &'static str,
    pub city_param: &'static str,
    pub state_param: &'static str,
    pub zip_param: &'static str,
    pub limit_param: &'static str,
    pub fields: VendorFields,
}

impl VendorProfile {
    pub fn listings_api() -> Self {
        Self {
            source_id: "listings-api",
            base_url: "https://api.rentcast.io/v1".to_string(),
            search_path: "/listings/sale",
            auth: VendorAuth::Header("X-Api-Key"),
            results_path: "",
            city_param: "city",
            state_param: "state",
            zip_param: "zipCode",
            limit_param: "limit",
            fields: VendorFields {
                external_id: &["id"],
                address: &["addressLine1", "formattedAddress"],
                city: &["city"],
                state: &["state"],
                zip_code: &["zipCode"],
                latitude: &["latitude"],
                longitude: &["longitude"],
                bedrooms: &["bedrooms"],
                bathrooms: &["bathrooms"],
                square_feet: &["squareFootage"],
                lot_size: &["lotSize"],
                year_built: &["yearBuilt"],
                property_type: &["propertyType"],
                price: &["price"],
                estimated_value: &["estimatedValue"],
                estimated_rent: &["rentEstimate"],
                url: &["listingUrl"],
                images: &["photos"],
                days_on_market: &["daysOnMarket"],
                description: &["description"],
            },
        }
    }

    pub fn property_data_api() -> Self {
        Self {
            source_id: "property-data-api",
            base_url: "https://realty-in-us.p.rapidapi.com".to_string(),
            search_path: "/properties/v3/list",
            auth: VendorAuth::Header("X-RapidAPI-Key"),
            results_path: "data.home_search.results",
            city_param: "city",
            state_param: "state_code",
            zip_param: "postal_code",
            limit_param: "limit",
            fields: VendorFields {
                external_id: &["property_id", "listing_id"],
                address: &["location.address.line"],
                city: &["location.address.city"],
                state: &["location.address.state_code"],
                zip_code: &["location.address.postal_code"],
                latitude: &["location.address.coordinate.lat"],
                longitude: &["location.address.coordinate.lon"],
                bedrooms: &["description.beds"],
                bathrooms: &["description.baths"],
                square_feet: &["description.sqft"],
                lot_size: &["description.lot_sqft"],
                year_built: &["description.year_built"],
                property_type: &["description.type"],
                price: &["list_price"],
                estimated_value: &["estimate.estimate"],
                estimated_rent: &[],
                url: &["href", "permalink"],
                images: &["photos", "primary_photo.href"],
                days_on_market: &["days_on_market"],
                description: &["description.text"],
            },
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn request(&self, criteria: &SearchCriteria, api_key: &str) -> FetchRequest {
        let url = format!("{}{}", self.base_url.trim_end_matches('/'), self.search_path);
        let mut req = FetchRequest::get(url);
        if let Some(zip) = criteria.zip_code.as_deref().filter(|z| !z.trim().is_empty()) {
            req = req.query(self.zip_param, zip.trim());
        } else {
            req = req
                .query(self.city_param, criteria.city_or_empty())
                .query(self.state_param, criteria.state_or_empty());
        }
        if let Some(limit) = criteria.limit {
            req = req.query(self.limit_param, limit.to_string());
        }
        match self.auth {
            VendorAuth::Header(name) => req.header(name, api_key),
            VendorAuth::Bearer => req.bearer(api_key),
            VendorAuth::Query(name) => req.query(name, api_key),
        }
    }

    pub fn normalize(&self, body: &JsonValue, criteria: &SearchCriteria) -> Vec<Property> {
        let Some(JsonValue::Array(items)) = json_at(body, self.results_path) else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|item| self.normalize_one(item, criteria))
            .collect()
    }

    fn normalize_one(&self, item: &JsonValue, criteria: &SearchCriteria) -> Option<Property> {
        let f = &self.fields;
        let address = first_str(item, f.address)?;
        let description = first_str(item, f.description);
        let property_type = match first_str(item, f.property_type) {
            Some(raw) => PropertyType::from_vendor(&raw),
            None => PropertyType::infer_from_text(description.as_deref().unwrap_or_default()),
        };
        Some(Property {
            address,
            city: first_str(item, f.city).unwrap_or_else(|| criteria.city_or_empty().to_string()),
            state: first_str(item, f.state).unwrap_or_else(|| criteria.state_or_empty().to_string()),
            zip_code: first_str(item, f.zip_code).unwrap_or_default(),
            latitude: first_f64(item, f.latitude),
            longitude: first_f64(item, f.longitude),
            bedrooms: first_u32(item, f.bedrooms),
            bathrooms: first_f64(item, f.bathrooms),
            square_feet: first_u32(item, f.square_feet),
            lot_size: first_f64(item, f.lot_size),
            year_built: first_u32(item, f.year_built),
            property_type,
            price: first_f64(item, f.price),
            estimated_value: first_f64(item, f.estimated_value),
            estimated_rent: first_f64(item, f.estimated_rent),
            source: self.source_id.to_string(),
            external_id: first_str(item, f.external_id),
            source_url: first_str(item, f.url),
            images: first_images(item, f.images),
            description,
            metadata: PropertyMetadata {
                days_on_market: first_u32(item, f.days_on_market),
                ..Default::default()
            },
        })
    }
}

pub struct ListingSearchAdapter {
    fetcher: Arc<HttpFetcher>,
    profile: VendorProfile,
    api_key: Option<String>,
}

impl ListingSearchAdapter {
    pub fn new(fetcher: Arc<HttpFetcher>, profile: VendorProfile, api_key: Option<String>) -> Self {
        Self {
            fetcher,
            profile,
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }

    pub fn profile(&self) -> &VendorProfile {
        &self.profile
    }
}

#[async_trait]
impl SourceAdapter for ListingSearchAdapter {
    fn source_id(&self) -> &'static str {
        self.profile.source_id
    }

    fn tier(&self) -> SourceTier {
        SourceTier::Paid
    }

    async fn fetch(&self, criteria: &SearchCriteria) -> Result<Vec<Property>, AdapterError> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| AdapterError::Unavailable(format!("{} has no api key", self.profile.source_id)))?;
        let request = self.profile.request(criteria, api_key);
        let body: JsonValue = self.fetcher.get_json(self.profile.source_id, &request).await?;
        Ok(self.profile.normalize(&body, criteria))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reap_fetch::HttpClientConfig;
    use serde_json::json;

    #[test]
    fn listings_profile_reads_root_array() {
        let body = json!([
            {
                "id": "abc", "formattedAddress": "12 Elm St, Dayton, OH 45402", "addressLine1": "12 Elm St",
                "city": "Dayton", "state": "OH", "zipCode": "45402", "bedrooms": 3, "bathrooms": 1.5,
                "squareFootage": 1200, "propertyType": "Single Family", "price": 89000, "daysOnMarket": 41
            },
            {"id": "no-address", "price": 1000}
        ]);
        let props = VendorProfile::listings_api().normalize(&body, &SearchCriteria::for_city("Dayton", "OH"));

        assert_eq!(props.len(), 1);
        let p = &props[0];
        assert_eq!(p.address, "12 Elm St");
        assert_eq!(p.bathrooms, Some(1.5));
        assert_eq!(p.property_type, PropertyType::SingleFamily);
        assert_eq!(p.metadata.days_on_market, Some(41));
        assert_eq!(p.source, "listings-api");
    }

    #[test]
    fn property_data_profile_reads_nested_results() {
        let body = json!({"data": {"home_search": {"results": [{
            "property_id": "9",
            "location": {"address": {"line": "400 Vine Ave", "city": "Memphis", "state_code": "TN",
                "postal_code": "38104", "coordinate": {"lat": 35.1, "lon": -90.0}}},
            "description": {"beds": 4, "baths": 2, "sqft": 1800, "type": "condos", "year_built": 1965},
            "list_price": 145000,
            "photos": [{"href": "p1.jpg"}, {"href": "p2.jpg"}],
            "href": "https://example.test/400-vine"
        }]}}});
        let props = VendorProfile::property_data_api().normalize(&body, &SearchCriteria::for_city("Memphis", "TN"));

        assert_eq!(props.len(), 1);
        let p = &props[0];
        assert_eq!(p.zip_code, "38104");
        assert_eq!(p.bedrooms, Some(4));
        assert_eq!(p.image_count(), 2);
        assert_eq!(p.latitude, Some(35.1));
        assert_eq!(p.source_url.as_deref(), Some("https://example.test/400-vine"));
    }

    #[test]
    fn wrong_shape_yields_nothing() {
        let profile = VendorProfile::property_data_api();
        assert!(profile.normalize(&json!({"data": null}), &SearchCriteria::default()).is_empty());
        assert!(profile.normalize(&json!("oops"), &SearchCriteria::default()).is_empty());
    }

    #[test]
    fn request_prefers_zip_and_attaches_key() {
        let profile = VendorProfile::listings_api().with_base_url("http://localhost:9/v1/");
        let criteria = SearchCriteria {
            zip_code: Some("45402".into()),
            limit: Some(25),
            ..SearchCriteria::for_city("Dayton", "OH")
        };
        let req = profile.request(&criteria, "k");
        assert_eq!(req.url, "http://localhost:9/v1/listings/sale");
        assert_eq!(
            req.query,
            vec![("zipCode".to_string(), "45402".to_string()), ("limit".to_string(), "25".to_string())]
        );
        assert_eq!(req.headers, vec![("X-Api-Key".to_string(), "k".to_string())]);
    }

    #[tokio::test]
    async fn missing_key_is_unavailable_and_search_swallows_it() {
        let fetcher = Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap());
        let adapter = ListingSearchAdapter::new(fetcher, VendorProfile::listings_api(), Some("  ".into()));
        let criteria = SearchCriteria::for_city("Dayton", "OH");

        assert!(matches!(adapter.fetch(&criteria).await, Err(AdapterError::Unavailable(_))));
        assert!(adapter.search(&criteria).await.is_empty());
    }
}
