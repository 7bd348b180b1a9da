//! Secondary facts about an area: crime, registered offenders, schools and rent-subsidy rates.

use std::sync::Arc;

use async_trait::async_trait;
use reap_core::{AreaLocation, GeoPoint, JobStatus};
use reap_fetch::{FetchRequest, HttpFetcher, JobOrchestrator};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, warn};

use crate::{first_f64, first_str, first_u32, json_at, AdapterError};

#[derive(Debug, Clone, PartialEq)]
pub struct CrimeStats {
    /// 0-100, higher is safer.
    pub safety_score: f64,
    pub violent_incidents: Option<u32>,
    pub property_incidents: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OffenderRecord {
    pub name: Option<String>,
    pub point: GeoPoint,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchoolRecord {
    pub name: String,
    /// 0-10.
    pub rating: f64,
    pub distance_miles: Option<f64>,
}

#[async_trait]
pub trait CrimeDataSource: Send + Sync {
    async fn crime_stats(&self, location: &AreaLocation) -> Result<CrimeStats, AdapterError>;
}

#[async_trait]
pub trait OffenderRegistry: Send + Sync {
    async fn offenders_near(&self, location: &AreaLocation, radius_miles: f64) -> Result<Vec<OffenderRecord>, AdapterError>;
}

#[async_trait]
pub trait SchoolRatings: Send + Sync {
    async fn schools_near(&self, location: &AreaLocation) -> Result<Vec<SchoolRecord>, AdapterError>;
}

#[async_trait]
pub trait SubsidyRateSource: Send + Sync {
    /// Monthly fair-market rent for `bedrooms` (0 = studio) in the area containing `zip_code`.
    async fn monthly_rent(&self, zip_code: &str, bedrooms: u32) -> Result<f64, AdapterError>;
}

fn require_point(location: &AreaLocation, what: &str) -> Result<GeoPoint, AdapterError> {
    location
        .point
        .ok_or_else(|| AdapterError::Unavailable(format!("{what} lookup needs coordinates")))
}

fn location_query(mut request: FetchRequest, location: &AreaLocation) -> FetchRequest {
    match location.point {
        Some(point) => {
            request = request
                .query("lat", point.latitude.to_string())
                .query("lon", point.longitude.to_string());
        }
        None => {
            request = request.query("zip", location.zip_code.clone());
        }
    }
    request
}

pub struct CrimeApiClient {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    api_key: String,
}

impl CrimeApiClient {
    pub const SOURCE_ID: &'static str = "crime-api";

    pub fn new(fetcher: Arc<HttpFetcher>, api_key: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: "https://api.crimeometer.com/v2".to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Accepts a direct safety score or a crime index where higher means more crime.
pub fn parse_crime_stats(body: &JsonValue) -> Option<CrimeStats> {
    let safety_score = first_f64(body, &["safetyScore", "safety_score", "data.safetyScore"])
        .or_else(|| first_f64(body, &["crimeIndex", "crime_index", "data.crimeIndex"]).map(|idx| 100.0 - idx))?
        .clamp(0.0, 100.0);
    Some(CrimeStats {
        safety_score,
        violent_incidents: first_u32(body, &["violentCrimes", "violent_incidents", "data.violent"]),
        property_incidents: first_u32(body, &["propertyCrimes", "property_incidents", "data.property"]),
    })
}

#[async_trait]
impl CrimeDataSource for CrimeApiClient {
    async fn crime_stats(&self, location: &AreaLocation) -> Result<CrimeStats, AdapterError> {
        let url = format!("{}/crime-stats", self.base_url.trim_end_matches('/'));
        let request = location_query(FetchRequest::get(url), location)
            .query("distance", "1mi")
            .header("x-api-key", self.api_key.clone());
        let body: JsonValue = self.fetcher.get_json(Self::SOURCE_ID, &request).await?;
        parse_crime_stats(&body).ok_or_else(|| AdapterError::Message("crime response had no score".into()))
    }
}

/// Job-based scrape of the public offender registry.
pub struct OffenderRegistryClient {
    jobs: JobOrchestrator,
    search_url: String,
}

impl OffenderRegistryClient {
    pub fn new(jobs: JobOrchestrator) -> Self {
        Self {
            jobs,
            search_url: "https://www.nsopw.gov/search-public-sex-offender-registries".to_string(),
        }
    }

    fn target_url(&self, point: GeoPoint, radius_miles: f64) -> String {
        format!(
            "{}?lat={}&lon={}&radius={}",
            self.search_url, point.latitude, point.longitude, radius_miles
        )
    }
}

pub fn parse_offenders(items: &[JsonValue]) -> Vec<OffenderRecord> {
    items
        .iter()
        .filter_map(|item| {
            let latitude = first_f64(item, &["latitude", "lat", "location.lat"])?;
            let longitude = first_f64(item, &["longitude", "lon", "lng", "location.lon", "location.lng"])?;
            Some(OffenderRecord {
                name: first_str(item, &["name", "fullName"]),
                point: GeoPoint { latitude, longitude },
            })
        })
        .collect()
}

#[async_trait]
impl OffenderRegistry for OffenderRegistryClient {
    async fn offenders_near(&self, location: &AreaLocation, radius_miles: f64) -> Result<Vec<OffenderRecord>, AdapterError> {
        let point = require_point(location, "offender")?;
        let target = self.target_url(point, radius_miles);
        let payload = json!([{ "url": target }]);
        let Some(mut job) = self.jobs.trigger(&target, &payload).await else {
            return Err(AdapterError::Unavailable("offender registry job not started".into()));
        };
        let items = self.jobs.poll_until_ready(&mut job).await;
        // An unfinished job is not the same as an area with no offenders.
        if job.status != JobStatus::Ready {
            return Err(AdapterError::Unavailable(format!(
                "offender registry job {} ended {:?}",
                job.job_id, job.status
            )));
        }
        Ok(parse_offenders(&items))
    }
}

pub struct SchoolRatingsClient {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    api_key: String,
}

impl SchoolRatingsClient {
    pub const SOURCE_ID: &'static str = "school-ratings";

    pub fn new(fetcher: Arc<HttpFetcher>, api_key: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: "https://gs-api.greatschools.org".to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Ratings above 10 are taken to be on a 0-100 scale.
pub fn parse_schools(body: &JsonValue) -> Vec<SchoolRecord> {
    let items = match body {
        JsonValue::Array(items) => items.as_slice(),
        _ => match json_at(body, "schools") {
            Some(JsonValue::Array(items)) => items.as_slice(),
            _ => return Vec::new(),
        },
    };
    items
        .iter()
        .filter_map(|item| {
            let raw = first_f64(item, &["rating", "gsRating", "overall_rating"])?;
            let rating = if raw > 10.0 { raw / 10.0 } else { raw };
            Some(SchoolRecord {
                name: first_str(item, &["name"]).unwrap_or_else(|| "Unnamed school".to_string()),
                rating: rating.clamp(0.0, 10.0),
                distance_miles: first_f64(item, &["distance", "distance_miles"]),
            })
        })
        .collect()
}

#[async_trait]
impl SchoolRatings for SchoolRatingsClient {
    async fn schools_near(&self, location: &AreaLocation) -> Result<Vec<SchoolRecord>, AdapterError> {
        let url = format!("{}/nearby-schools", self.base_url.trim_end_matches('/'));
        let request = location_query(FetchRequest::get(url), location)
            .query("distance", "5")
            .header("x-api-key", self.api_key.clone());
        let body: JsonValue = self.fetcher.get_json(Self::SOURCE_ID, &request).await?;
        Ok(parse_schools(&body))
    }
}

/// HUD USER fair-market-rent API.
pub struct HudFmrClient {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    token: String,
}

impl HudFmrClient {
    pub const SOURCE_ID: &'static str = "hud-fmr";

    pub fn new(fetcher: Arc<HttpFetcher>, token: impl Into<String>) -> Self {
        Self {
            fetcher,
            base_url: "https://www.huduser.gov/hudapi/public/fmr".to_string(),
            token: token.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

const FMR_KEYS: [&str; 5] = ["Efficiency", "One-Bedroom", "Two-Bedroom", "Three-Bedroom", "Four-Bedroom"];

/// `basicdata` is an object for a single area, or one row per zip for small-area FMR metros.
pub fn parse_hud_fmr(body: &JsonValue, zip_code: &str, bedrooms: u32) -> Option<f64> {
    let key = FMR_KEYS[clamp_bedrooms(bedrooms) as usize];
    let rent = match json_at(body, "data.basicdata")? {
        row @ JsonValue::Object(_) => first_f64(row, &[key]),
        JsonValue::Array(rows) => rows
            .iter()
            .find(|row| first_str(row, &["zip_code"]).as_deref() == Some(zip_code))
            .or_else(|| rows.first())
            .and_then(|row| first_f64(row, &[key])),
        _ => None,
    };
    rent.filter(|rent| *rent > 0.0)
}

#[async_trait]
impl SubsidyRateSource for HudFmrClient {
    async fn monthly_rent(&self, zip_code: &str, bedrooms: u32) -> Result<f64, AdapterError> {
        let url = format!("{}/data/{}", self.base_url.trim_end_matches('/'), zip_code.trim());
        let request = FetchRequest::get(url).bearer(&self.token);
        let body: JsonValue = self.fetcher.get_json(Self::SOURCE_ID, &request).await?;
        parse_hud_fmr(&body, zip_code.trim(), bedrooms)
            .ok_or_else(|| AdapterError::Message(format!("no fair market rent for {zip_code}")))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FmrBasis {
    Live,
    Regional,
    Generic,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FmrQuote {
    pub monthly_rent: f64,
    pub bedrooms: u32,
    pub basis: FmrBasis,
}

/// Studio through four bedrooms.
pub const GENERIC_FMR: [f64; 5] = [900.0, 1050.0, 1300.0, 1700.0, 2000.0];

const REGIONAL_FMR: &[(&str, [f64; 5])] = &[
    ("282", [1180.0, 1250.0, 1420.0, 1840.0, 2260.0]),
    ("303", [1430.0, 1470.0, 1640.0, 2040.0, 2470.0]),
    ("322", [1190.0, 1270.0, 1500.0, 1980.0, 2380.0]),
    ("336", [1310.0, 1390.0, 1690.0, 2210.0, 2680.0]),
    ("352", [880.0, 950.0, 1110.0, 1430.0, 1610.0]),
    ("372", [1310.0, 1370.0, 1560.0, 2010.0, 2380.0]),
    ("381", [900.0, 970.0, 1120.0, 1470.0, 1620.0]),
    ("432", [960.0, 1060.0, 1270.0, 1680.0, 1940.0]),
    ("441", [800.0, 890.0, 1080.0, 1380.0, 1510.0]),
    ("454", [770.0, 860.0, 1050.0, 1380.0, 1530.0]),
    ("462", [910.0, 1010.0, 1190.0, 1540.0, 1730.0]),
    ("482", [890.0, 990.0, 1200.0, 1500.0, 1640.0]),
    ("606", [1260.0, 1370.0, 1560.0, 1930.0, 2260.0]),
    ("631", [880.0, 980.0, 1160.0, 1500.0, 1700.0]),
    ("641", [950.0, 1060.0, 1260.0, 1660.0, 1900.0]),
    ("752", [1300.0, 1380.0, 1630.0, 2090.0, 2600.0]),
    ("770", [1120.0, 1200.0, 1440.0, 1880.0, 2300.0]),
    ("782", [1050.0, 1150.0, 1370.0, 1760.0, 2080.0]),
    ("787", [1370.0, 1480.0, 1740.0, 2220.0, 2650.0]),
    ("850", [1300.0, 1400.0, 1650.0, 2260.0, 2650.0]),
];

fn clamp_bedrooms(bedrooms: u32) -> u32 {
    bedrooms.min(4)
}

pub fn regional_fmr(zip_code: &str, bedrooms: u32) -> Option<f64> {
    let prefix = zip_code.trim().get(..3)?;
    REGIONAL_FMR
        .iter()
        .find(|(zip3, _)| *zip3 == prefix)
        .map(|(_, rents)| rents[clamp_bedrooms(bedrooms) as usize])
}

/// Rent-subsidy lookup that always answers: live source, then regional table, then generic table.
#[derive(Clone, Default)]
pub struct FairMarketRents {
    live: Option<Arc<dyn SubsidyRateSource>>,
}

impl FairMarketRents {
    pub fn new(live: Option<Arc<dyn SubsidyRateSource>>) -> Self {
        Self { live }
    }

    /// Unknown bedroom counts are quoted as two bedrooms.
    pub async fn quote(&self, zip_code: &str, bedrooms: Option<u32>) -> FmrQuote {
        let bedrooms = clamp_bedrooms(bedrooms.unwrap_or(2));
        if let Some(live) = &self.live {
            match live.monthly_rent(zip_code, bedrooms).await {
                Ok(monthly_rent) => {
                    return FmrQuote {
                        monthly_rent,
                        bedrooms,
                        basis: FmrBasis::Live,
                    }
                }
                Err(err) => warn!(zip_code, error = %err, "live fair market rent failed; using fallback table"),
            }
        }
        match regional_fmr(zip_code, bedrooms) {
            Some(monthly_rent) => FmrQuote {
                monthly_rent,
                bedrooms,
                basis: FmrBasis::Regional,
            },
            None => {
                debug!(zip_code, "no regional fair market rent; using generic table");
                FmrQuote {
                    monthly_rent: GENERIC_FMR[bedrooms as usize],
                    bedrooms,
                    basis: FmrBasis::Generic,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reap_fetch::{FetchError, JobTransport, PollResponse, RetryPolicy};

    struct FixedRent(Result<f64, ()>);

    #[async_trait]
    impl SubsidyRateSource for FixedRent {
        async fn monthly_rent(&self, _zip_code: &str, _bedrooms: u32) -> Result<f64, AdapterError> {
            self.0.map_err(|_| AdapterError::Unavailable("down".into()))
        }
    }

    struct NeverReady;

    #[async_trait]
    impl JobTransport for NeverReady {
        async fn trigger(&self, _target_url: &str, _payload: &JsonValue) -> Result<Option<String>, FetchError> {
            Ok(Some("job-1".into()))
        }

        async fn poll(&self, _job_id: &str) -> Result<PollResponse, FetchError> {
            Ok(PollResponse::NotReady)
        }
    }

    fn located() -> AreaLocation {
        AreaLocation {
            point: Some(GeoPoint { latitude: 39.77, longitude: -86.16 }),
            city: "Indianapolis".into(),
            state: "IN".into(),
            zip_code: "46201".into(),
        }
    }

    #[tokio::test]
    async fn fmr_prefers_live_then_regional_then_generic() {
        let live = FairMarketRents::new(Some(Arc::new(FixedRent(Ok(1234.0)))));
        let quote = live.quote("46201", Some(3)).await;
        assert_eq!(quote, FmrQuote { monthly_rent: 1234.0, bedrooms: 3, basis: FmrBasis::Live });

        let outage = FairMarketRents::new(Some(Arc::new(FixedRent(Err(())))));
        let quote = outage.quote("46201", Some(3)).await;
        assert_eq!(quote.basis, FmrBasis::Regional);
        assert_eq!(quote.monthly_rent, 1540.0);

        let quote = FairMarketRents::default().quote("99999", Some(7)).await;
        assert_eq!(quote, FmrQuote { monthly_rent: 2000.0, bedrooms: 4, basis: FmrBasis::Generic });

        let quote = FairMarketRents::default().quote("", None).await;
        assert_eq!(quote.bedrooms, 2);
        assert_eq!(quote.monthly_rent, 1300.0);
    }

    #[test]
    fn hud_payload_handles_object_and_zip_rows() {
        let single = json!({"data": {"basicdata": {"Efficiency": 780, "Two-Bedroom": 1120, "Four-Bedroom": 1650}}});
        assert_eq!(parse_hud_fmr(&single, "46201", 2), Some(1120.0));
        assert_eq!(parse_hud_fmr(&single, "46201", 6), Some(1650.0));

        let rows = json!({"data": {"basicdata": [
            {"zip_code": "78701", "Two-Bedroom": 2100},
            {"zip_code": "78702", "Two-Bedroom": 1900}
        ]}});
        assert_eq!(parse_hud_fmr(&rows, "78702", 2), Some(1900.0));
        assert_eq!(parse_hud_fmr(&rows, "78799", 2), Some(2100.0));
        assert_eq!(parse_hud_fmr(&json!({"error": "bad token"}), "78702", 2), None);
    }

    #[test]
    fn crime_score_accepts_inverted_index() {
        let direct = parse_crime_stats(&json!({"safetyScore": 82, "violentCrimes": 3})).unwrap();
        assert_eq!(direct.safety_score, 82.0);
        assert_eq!(direct.violent_incidents, Some(3));

        let inverted = parse_crime_stats(&json!({"crimeIndex": 35})).unwrap();
        assert_eq!(inverted.safety_score, 65.0);
        assert!(parse_crime_stats(&json!({})).is_none());
    }

    #[test]
    fn schools_rescale_hundred_point_ratings() {
        let body = json!({"schools": [
            {"name": "Lincoln Elementary", "rating": 8, "distance": 0.4},
            {"name": "Central High", "rating": 65},
            {"name": "Unrated Academy"}
        ]});
        let schools = parse_schools(&body);
        assert_eq!(schools.len(), 2);
        assert_eq!(schools[0].rating, 8.0);
        assert_eq!(schools[1].rating, 6.5);
        assert_eq!(schools[0].distance_miles, Some(0.4));
    }

    #[test]
    fn offender_rows_need_coordinates() {
        let items = vec![
            json!({"name": "A", "latitude": 39.7, "longitude": -86.1}),
            json!({"name": "B", "location": {"lat": "39.8", "lng": "-86.2"}}),
            json!({"name": "C"}),
        ];
        let offenders = parse_offenders(&items);
        assert_eq!(offenders.len(), 2);
        assert_eq!(offenders[1].point.longitude, -86.2);
    }

    #[tokio::test]
    async fn unfinished_offender_job_is_unavailable_not_empty() {
        let jobs = JobOrchestrator::new(Arc::new(NeverReady), RetryPolicy::immediate(3));
        let client = OffenderRegistryClient::new(jobs);

        let result = client.offenders_near(&located(), 1.0).await;
        assert!(matches!(result, Err(AdapterError::Unavailable(_))));

        let no_point = AreaLocation { point: None, ..located() };
        assert!(client.offenders_near(&no_point, 1.0).await.is_err());
    }
}
