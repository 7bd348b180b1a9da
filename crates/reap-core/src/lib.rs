//! Core domain model for REAP: properties, scrape jobs, comparables, area ratings and expert opinions.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "reap-core";

pub const EARTH_RADIUS_MILES: f64 = 3959.0;
pub const FEET_PER_MILE: f64 = 5280.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PropertyType {
    #[default]
    SingleFamily,
    Condo,
    Townhouse,
    MultiFamily,
    Duplex,
    Land,
    Mobile,
}

impl PropertyType {
    /// Maps a vendor's property-type string onto the closed enum. Unknown values are single family.
    pub fn from_vendor(raw: &str) -> Self {
        let key = raw.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        match key.as_str() {
            "single_family" | "singlefamily" | "single_family_residence" | "house" | "sfr" => {
                Self::SingleFamily
            }
            "condo" | "condominium" | "apartment" | "co_op" | "coop" => Self::Condo,
            "townhouse" | "townhome" | "town_house" => Self::Townhouse,
            "multi_family" | "multifamily" | "multi_family_home" => Self::MultiFamily,
            "duplex" | "triplex" | "fourplex" => Self::Duplex,
            "land" | "lot" | "lots_land" | "lots/land" | "vacant_land" => Self::Land,
            "mobile" | "manufactured" | "mobile_home" => Self::Mobile,
            _ => Self::SingleFamily,
        }
    }

    /// Best-guess type from free text (titles, descriptions) when a source supplies none.
    pub fn infer_from_text(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        let has_word = |needle: &str| {
            lower
                .split(|c: char| !c.is_ascii_alphanumeric())
                .any(|word| word == needle)
        };
        if has_word("condo") || has_word("condominium") {
            Self::Condo
        } else if has_word("townhouse") || has_word("townhome") {
            Self::Townhouse
        } else if has_word("duplex") {
            Self::Duplex
        } else if has_word("land") || has_word("lot") || has_word("acre") || has_word("acres") {
            Self::Land
        } else {
            Self::SingleFamily
        }
    }
}

/// Lower-cases, folds punctuation to spaces and collapses whitespace.
pub fn normalize_fragment(input: &str) -> String {
    input
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Identity of a logical property: normalized (street address, city, postal code).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PropertyKey(String);

impl PropertyKey {
    pub fn new(address: &str, city: &str, postal_code: &str) -> Option<Self> {
        let address = normalize_fragment(address);
        if address.is_empty() {
            return None;
        }
        let key = format!(
            "{}|{}|{}",
            address,
            normalize_fragment(city),
            normalize_fragment(postal_code)
        );
        Some(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic id derived from the key, stable across runs and sources.
    pub fn stable_id(&self) -> Uuid {
        Uuid::new_v5(&Uuid::NAMESPACE_URL, format!("reap:property:{}", self.0).as_bytes())
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PropertyMetadata {
    #[serde(default)]
    pub is_demo: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days_on_market: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auction_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mentions_owner_financing: Option<bool>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, JsonValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Property {
    pub address: String,
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub zip_code: String,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub bedrooms: Option<u32>,
    #[serde(default)]
    pub bathrooms: Option<f64>,
    #[serde(default)]
    pub square_feet: Option<u32>,
    #[serde(default)]
    pub lot_size: Option<f64>,
    #[serde(default)]
    pub year_built: Option<u32>,
    #[serde(default)]
    pub property_type: PropertyType,
    #[serde(default)]
    pub price: Option<f64>,
    #[serde(default)]
    pub estimated_value: Option<f64>,
    #[serde(default)]
    pub estimated_rent: Option<f64>,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub external_id: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub images: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub metadata: PropertyMetadata,
}

impl Property {
    pub fn key(&self) -> Option<PropertyKey> {
        PropertyKey::new(&self.address, &self.city, &self.zip_code)
    }

    /// Number of non-blank image entries.
    pub fn image_count(&self) -> usize {
        self.images.iter().filter(|url| !url.trim().is_empty()).count()
    }

    pub fn coordinates(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(latitude), Some(longitude)) => Some(GeoPoint { latitude, longitude }),
            _ => None,
        }
    }

    /// Asking price when listed, otherwise the current value estimate.
    pub fn effective_price(&self) -> Option<f64> {
        self.price
            .filter(|p| *p > 0.0)
            .or(self.estimated_value.filter(|v| *v > 0.0))
    }

    pub fn location(&self) -> AreaLocation {
        AreaLocation {
            point: self.coordinates(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip_code: self.zip_code.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Great-circle distance in miles.
pub fn haversine_miles(a: GeoPoint, b: GeoPoint) -> f64 {
    let d_lat = (b.latitude - a.latitude).to_radians();
    let d_lon = (b.longitude - a.longitude).to_radians();
    let h = (d_lat / 2.0).sin().powi(2)
        + a.latitude.to_radians().cos() * b.latitude.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());
    EARTH_RADIUS_MILES * c
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AreaLocation {
    pub point: Option<GeoPoint>,
    pub city: String,
    pub state: String,
    pub zip_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CriteriaError {
    #[error("a city or postal code is required to search for properties")]
    MissingLocation,
    #[error("invalid price range: min {min} exceeds max {max}")]
    InvalidPriceRange { min: u64, max: u64 },
    #[error("{field} must be a finite number")]
    NonFinitePrice { field: &'static str },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SearchCriteria {
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub zip_code: Option<String>,
    #[serde(default)]
    pub min_price: Option<f64>,
    #[serde(default)]
    pub max_price: Option<f64>,
    #[serde(default)]
    pub min_beds: Option<u32>,
    #[serde(default)]
    pub property_type: Option<PropertyType>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchCriteria {
    pub fn for_city(city: impl Into<String>, state: impl Into<String>) -> Self {
        Self {
            city: Some(city.into()),
            state: Some(state.into()),
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), CriteriaError> {
        let present = |v: &Option<String>| v.as_deref().is_some_and(|s| !s.trim().is_empty());
        if !present(&self.city) && !present(&self.zip_code) {
            return Err(CriteriaError::MissingLocation);
        }
        for (field, bound) in [("minPrice", self.min_price), ("maxPrice", self.max_price)] {
            if bound.is_some_and(|v| !v.is_finite()) {
                return Err(CriteriaError::NonFinitePrice { field });
            }
        }
        if let (Some(min), Some(max)) = (self.min_price, self.max_price) {
            if min > max {
                return Err(CriteriaError::InvalidPriceRange {
                    min: min as u64,
                    max: max as u64,
                });
            }
        }
        Ok(())
    }

    pub fn city_or_empty(&self) -> &str {
        self.city.as_deref().map(str::trim).unwrap_or_default()
    }

    pub fn state_or_empty(&self) -> &str {
        self.state.as_deref().map(str::trim).unwrap_or_default()
    }

    /// Whether a normalized record satisfies the optional filters.
    pub fn matches(&self, property: &Property) -> bool {
        let price = property.effective_price();
        if let (Some(min), Some(p)) = (self.min_price, price) {
            if p < min {
                return false;
            }
        }
        if let (Some(max), Some(p)) = (self.max_price, price) {
            if p > max {
                return false;
            }
        }
        if let (Some(min_beds), Some(beds)) = (self.min_beds, property.bedrooms) {
            if beds < min_beds {
                return false;
            }
        }
        if let Some(kind) = self.property_type {
            if property.property_type != kind {
                return false;
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Triggered,
    Polling,
    Ready,
    TimedOut,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ready | Self::TimedOut | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeJob {
    pub source_url: String,
    pub job_id: String,
    pub status: JobStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl ScrapeJob {
    pub fn new(source_url: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            source_url: source_url.into(),
            job_id: job_id.into(),
            status: JobStatus::Triggered,
            attempts: 0,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comparable {
    #[serde(flatten)]
    pub property: Property,
    pub similarity: f64,
    pub distance_miles: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Self::A
        } else if score >= 80.0 {
            Self::B
        } else if score >= 70.0 {
            Self::C
        } else if score >= 60.0 {
            Self::D
        } else {
            Self::F
        }
    }

    pub fn is_poor(self) -> bool {
        matches!(self, Self::D | Self::F)
    }

    pub fn is_strong(self) -> bool {
        matches!(self, Self::A | Self::B)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let letter = match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::F => "F",
        };
        f.write_str(letter)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrimeSubScore {
    pub score: f64,
    pub grade: Grade,
    pub violent_incidents: Option<u32>,
    pub property_incidents: Option<u32>,
    /// False when the lookup failed and the neutral default was used.
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OffenderSubScore {
    pub score: f64,
    pub grade: Grade,
    pub count_within_one_mile: u32,
    pub nearest_feet: Option<f64>,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolSubScore {
    /// Average rating on a 0-10 scale.
    pub average_rating: f64,
    pub school_count: usize,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaRating {
    pub grade: Grade,
    pub score: f64,
    pub crime: CrimeSubScore,
    pub offenders: OffenderSubScore,
    pub schools: SchoolSubScore,
    pub warnings: Vec<String>,
    pub positives: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Archetype {
    Aggressive,
    Conservative,
    SubsidizedHousing,
}

impl Archetype {
    pub const ALL: [Archetype; 3] = [Self::Aggressive, Self::Conservative, Self::SubsidizedHousing];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aggressive => "aggressive",
            Self::Conservative => "conservative",
            Self::SubsidizedHousing => "subsidized-housing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    StrongBuy,
    Buy,
    Hold,
    Pass,
    StrongAvoid,
}

impl Recommendation {
    /// One step more cautious, saturating at `StrongAvoid`.
    pub fn downgrade(self) -> Self {
        match self {
            Self::StrongBuy => Self::Buy,
            Self::Buy => Self::Hold,
            Self::Hold => Self::Pass,
            Self::Pass | Self::StrongAvoid => Self::StrongAvoid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpertOpinion {
    pub archetype: Archetype,
    pub expert_name: String,
    pub recommended_offer: f64,
    pub offer_percent_of_asking: f64,
    pub exit_strategy: String,
    pub roi_estimate: f64,
    pub recommendation: Recommendation,
    pub summary: String,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    /// True when the free text came from the narrative service rather than templates.
    pub narrative_generated: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_key_normalizes_case_and_punctuation() {
        let a = PropertyKey::new("123 Main St.", "Austin", "78701").unwrap();
        let b = PropertyKey::new("  123 MAIN st ", "austin", "78701").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "123 main st|austin|78701");
        assert_eq!(a.stable_id(), b.stable_id());
    }

    #[test]
    fn property_key_requires_an_address() {
        assert!(PropertyKey::new("  ,. ", "Austin", "78701").is_none());
        assert!(PropertyKey::new("", "Austin", "78701").is_none());
    }

    #[test]
    fn vendor_type_mapping_defaults_to_single_family() {
        assert_eq!(PropertyType::from_vendor("single_family"), PropertyType::SingleFamily);
        assert_eq!(PropertyType::from_vendor("CONDO"), PropertyType::Condo);
        assert_eq!(PropertyType::from_vendor("multi-family"), PropertyType::MultiFamily);
        assert_eq!(PropertyType::from_vendor("Lots/Land"), PropertyType::Land);
        assert_eq!(PropertyType::from_vendor("castle"), PropertyType::SingleFamily);
    }

    #[test]
    fn text_inference_uses_fixed_vocabulary() {
        assert_eq!(PropertyType::infer_from_text("Cute condo near campus"), PropertyType::Condo);
        assert_eq!(PropertyType::infer_from_text("End-unit Townhome"), PropertyType::Townhouse);
        assert_eq!(PropertyType::infer_from_text("DUPLEX, owner finance"), PropertyType::Duplex);
        assert_eq!(PropertyType::infer_from_text("2 acres of land"), PropertyType::Land);
        assert_eq!(PropertyType::infer_from_text("3/2 ranch home"), PropertyType::SingleFamily);
        assert_eq!(PropertyType::infer_from_text("Parking lotus garden"), PropertyType::SingleFamily);
    }

    #[test]
    fn grade_bands_are_inclusive_lower_bounds() {
        assert_eq!(Grade::from_score(95.5), Grade::A);
        assert_eq!(Grade::from_score(90.0), Grade::A);
        assert_eq!(Grade::from_score(89.99), Grade::B);
        assert_eq!(Grade::from_score(80.0), Grade::B);
        assert_eq!(Grade::from_score(70.0), Grade::C);
        assert_eq!(Grade::from_score(60.0), Grade::D);
        assert_eq!(Grade::from_score(59.9), Grade::F);
    }

    #[test]
    fn haversine_matches_known_distance() {
        let austin = GeoPoint { latitude: 30.2672, longitude: -97.7431 };
        let dallas = GeoPoint { latitude: 32.7767, longitude: -96.7970 };
        let miles = haversine_miles(austin, dallas);
        assert!((miles - 182.0).abs() < 2.0, "got {miles}");
        assert_eq!(haversine_miles(austin, austin), 0.0);
    }

    #[test]
    fn criteria_require_city_or_zip() {
        assert_eq!(SearchCriteria::default().validate(), Err(CriteriaError::MissingLocation));
        let zip_only = SearchCriteria {
            zip_code: Some("78701".into()),
            ..Default::default()
        };
        assert!(zip_only.validate().is_ok());
        assert!(SearchCriteria::for_city("Austin", "TX").validate().is_ok());
    }

    #[test]
    fn criteria_reject_non_finite_price_bounds() {
        let nan_min = SearchCriteria {
            min_price: Some(f64::NAN),
            ..SearchCriteria::for_city("Austin", "TX")
        };
        assert_eq!(nan_min.validate(), Err(CriteriaError::NonFinitePrice { field: "minPrice" }));

        let infinite_max = SearchCriteria {
            max_price: Some(f64::INFINITY),
            ..SearchCriteria::for_city("Austin", "TX")
        };
        assert_eq!(infinite_max.validate(), Err(CriteriaError::NonFinitePrice { field: "maxPrice" }));

        let bounded = SearchCriteria {
            min_price: Some(100_000.0),
            max_price: Some(200_000.0),
            ..SearchCriteria::for_city("Austin", "TX")
        };
        assert!(bounded.validate().is_ok());
    }

    #[test]
    fn image_count_ignores_blank_entries() {
        let property = Property {
            images: vec!["a.jpg".into(), " ".into(), String::new(), "b.jpg".into()],
            ..Default::default()
        };
        assert_eq!(property.image_count(), 2);
    }

    #[test]
    fn metadata_serializes_is_demo_camel_case() {
        let mut metadata = PropertyMetadata {
            is_demo: true,
            ..Default::default()
        };
        metadata.extra.insert("parcelId".into(), JsonValue::from("R-1"));
        let json = serde_json::to_value(&metadata).unwrap();
        assert_eq!(json["isDemo"], JsonValue::Bool(true));
        assert_eq!(json["parcelId"], JsonValue::from("R-1"));
    }
}
