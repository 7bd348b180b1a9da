//! Composite A-F area grade from crime, offender proximity and school signals.

use std::sync::Arc;

use reap_adapters::{CrimeDataSource, OffenderRegistry, SchoolRatings};
use reap_core::{
    haversine_miles, AreaLocation, AreaRating, CrimeSubScore, Grade, OffenderSubScore, SchoolSubScore,
    FEET_PER_MILE,
};
use tracing::warn;

pub const NEUTRAL_CRIME_SCORE: f64 = 50.0;
pub const NEUTRAL_OFFENDER_SCORE: f64 = 50.0;
pub const NEUTRAL_SCHOOL_RATING: f64 = 5.0;

pub const CRIME_WEIGHT: f64 = 0.5;
pub const OFFENDER_WEIGHT: f64 = 0.3;
pub const SCHOOL_WEIGHT: f64 = 0.2;

const OFFENDER_RADIUS_MILES: f64 = 1.0;
const OFFENDER_CROWDED_COUNT: u32 = 5;
const OFFENDER_CLOSE_FEET: f64 = 1000.0;
const STRONG_SCHOOL_RATING: f64 = 8.0;

/// Weighted composite; the 0-10 school rating is rescaled to 0-100 first.
pub fn composite_score(crime: f64, offender: f64, school_rating: f64) -> f64 {
    crime * CRIME_WEIGHT + offender * OFFENDER_WEIGHT + school_rating * 10.0 * SCHOOL_WEIGHT
}

/// Full marks with no offenders nearby, ten points off per offender within a mile.
pub fn offender_score(count_within_one_mile: u32) -> f64 {
    (100.0 - 10.0 * f64::from(count_within_one_mile)).max(0.0)
}

#[derive(Clone, Default)]
pub struct AreaRiskScorer {
    crime: Option<Arc<dyn CrimeDataSource>>,
    offenders: Option<Arc<dyn OffenderRegistry>>,
    schools: Option<Arc<dyn SchoolRatings>>,
}

impl AreaRiskScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_crime(mut self, source: Arc<dyn CrimeDataSource>) -> Self {
        self.crime = Some(source);
        self
    }

    pub fn with_offenders(mut self, source: Arc<dyn OffenderRegistry>) -> Self {
        self.offenders = Some(source);
        self
    }

    pub fn with_schools(mut self, source: Arc<dyn SchoolRatings>) -> Self {
        self.schools = Some(source);
        self
    }

    /// Runs the three lookups together. A failed or missing lookup takes its neutral value.
    pub async fn rate(&self, location: &AreaLocation) -> AreaRating {
        let (crime, offenders, schools) = tokio::join!(
            self.crime_sub_score(location),
            self.offender_sub_score(location),
            self.school_sub_score(location)
        );

        let score = composite_score(crime.score, offenders.score, schools.average_rating);
        let (warnings, positives) = findings(&crime, &offenders, &schools);

        AreaRating {
            grade: Grade::from_score(score),
            score,
            crime,
            offenders,
            schools,
            warnings,
            positives,
        }
    }

    async fn crime_sub_score(&self, location: &AreaLocation) -> CrimeSubScore {
        let result = match &self.crime {
            Some(source) => source.crime_stats(location).await.map_err(|e| e.to_string()),
            None => Err("no crime source configured".to_string()),
        };
        match result {
            Ok(stats) => CrimeSubScore {
                score: stats.safety_score,
                grade: Grade::from_score(stats.safety_score),
                violent_incidents: stats.violent_incidents,
                property_incidents: stats.property_incidents,
                available: true,
            },
            Err(error) => {
                warn!(%error, "crime lookup unavailable; using neutral score");
                CrimeSubScore {
                    score: NEUTRAL_CRIME_SCORE,
                    grade: Grade::from_score(NEUTRAL_CRIME_SCORE),
                    violent_incidents: None,
                    property_incidents: None,
                    available: false,
                }
            }
        }
    }

    async fn offender_sub_score(&self, location: &AreaLocation) -> OffenderSubScore {
        let neutral = OffenderSubScore {
            score: NEUTRAL_OFFENDER_SCORE,
            grade: Grade::from_score(NEUTRAL_OFFENDER_SCORE),
            count_within_one_mile: 0,
            nearest_feet: None,
            available: false,
        };
        let Some(origin) = location.point else {
            warn!("offender lookup skipped; location has no coordinates");
            return neutral;
        };
        let result = match &self.offenders {
            Some(source) => source
                .offenders_near(location, OFFENDER_RADIUS_MILES)
                .await
                .map_err(|e| e.to_string()),
            None => Err("no offender registry configured".to_string()),
        };
        let records = match result {
            Ok(records) => records,
            Err(error) => {
                warn!(%error, "offender lookup unavailable; using neutral score");
                return neutral;
            }
        };

        let distances: Vec<f64> = records.iter().map(|r| haversine_miles(origin, r.point)).collect();
        let count = distances.iter().filter(|d| **d <= OFFENDER_RADIUS_MILES).count() as u32;
        let nearest_feet = distances
            .iter()
            .copied()
            .min_by(f64::total_cmp)
            .map(|miles| miles * FEET_PER_MILE);
        let score = offender_score(count);

        OffenderSubScore {
            score,
            grade: Grade::from_score(score),
            count_within_one_mile: count,
            nearest_feet,
            available: true,
        }
    }

    async fn school_sub_score(&self, location: &AreaLocation) -> SchoolSubScore {
        let result = match &self.schools {
            Some(source) => source.schools_near(location).await.map_err(|e| e.to_string()),
            None => Err("no school ratings configured".to_string()),
        };
        match result {
            Ok(schools) if !schools.is_empty() => SchoolSubScore {
                average_rating: schools.iter().map(|s| s.rating).sum::<f64>() / schools.len() as f64,
                school_count: schools.len(),
                available: true,
            },
            Ok(_) => {
                warn!("no rated schools found; using neutral rating");
                neutral_schools()
            }
            Err(error) => {
                warn!(%error, "school lookup unavailable; using neutral rating");
                neutral_schools()
            }
        }
    }
}

fn neutral_schools() -> SchoolSubScore {
    SchoolSubScore {
        average_rating: NEUTRAL_SCHOOL_RATING,
        school_count: 0,
        available: false,
    }
}

/// Rules only fire on measured data; a neutral default yields an "unavailable" note instead.
fn findings(crime: &CrimeSubScore, offenders: &OffenderSubScore, schools: &SchoolSubScore) -> (Vec<String>, Vec<String>) {
    let mut warnings = Vec::new();
    let mut positives = Vec::new();

    if !crime.available {
        warnings.push("Crime data unavailable; a neutral score was used".to_string());
    } else if crime.grade.is_poor() {
        warnings.push(format!("High crime area (grade {}, safety score {:.0})", crime.grade, crime.score));
    } else if crime.grade.is_strong() {
        positives.push(format!("Low crime area (grade {})", crime.grade));
    }

    if !offenders.available {
        warnings.push("Offender registry unavailable; a neutral score was used".to_string());
    } else {
        if offenders.count_within_one_mile > OFFENDER_CROWDED_COUNT {
            warnings.push(format!(
                "{} registered offenders within 1 mile",
                offenders.count_within_one_mile
            ));
        } else if offenders.count_within_one_mile == 0 {
            positives.push("No registered offenders within 1 mile".to_string());
        }
        if let Some(feet) = offenders.nearest_feet.filter(|f| *f <= OFFENDER_CLOSE_FEET) {
            warnings.push(format!("Registered offender within 1,000 feet ({feet:.0} ft)"));
        }
    }

    if !schools.available {
        warnings.push("School ratings unavailable; a neutral rating was used".to_string());
    } else if schools.average_rating >= STRONG_SCHOOL_RATING {
        positives.push(format!(
            "Highly rated schools nearby (average {:.1}/10)",
            schools.average_rating
        ));
    }

    (warnings, positives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reap_adapters::{AdapterError, CrimeStats, OffenderRecord, SchoolRecord};
    use reap_core::GeoPoint;

    struct Crime(Option<f64>);

    #[async_trait]
    impl CrimeDataSource for Crime {
        async fn crime_stats(&self, _location: &AreaLocation) -> Result<CrimeStats, AdapterError> {
            self.0
                .map(|safety_score| CrimeStats {
                    safety_score,
                    violent_incidents: Some(1),
                    property_incidents: Some(4),
                })
                .ok_or_else(|| AdapterError::Unavailable("crime api down".into()))
        }
    }

    struct Offenders(Vec<GeoPoint>);

    #[async_trait]
    impl OffenderRegistry for Offenders {
        async fn offenders_near(&self, _location: &AreaLocation, _radius: f64) -> Result<Vec<OffenderRecord>, AdapterError> {
            Ok(self.0.iter().map(|p| OffenderRecord { name: None, point: *p }).collect())
        }
    }

    struct Schools(Vec<f64>);

    #[async_trait]
    impl SchoolRatings for Schools {
        async fn schools_near(&self, _location: &AreaLocation) -> Result<Vec<SchoolRecord>, AdapterError> {
            Ok(self
                .0
                .iter()
                .map(|rating| SchoolRecord {
                    name: "school".into(),
                    rating: *rating,
                    distance_miles: None,
                })
                .collect())
        }
    }

    const ORIGIN: GeoPoint = GeoPoint { latitude: 39.7684, longitude: -86.1581 };

    fn location() -> AreaLocation {
        AreaLocation {
            point: Some(ORIGIN),
            city: "Indianapolis".into(),
            state: "IN".into(),
            zip_code: "46204".into(),
        }
    }

    /// Roughly `miles` north of the origin.
    fn north(miles: f64) -> GeoPoint {
        GeoPoint {
            latitude: ORIGIN.latitude + miles / 69.05,
            longitude: ORIGIN.longitude,
        }
    }

    #[test]
    fn composite_matches_worked_example() {
        let score = composite_score(95.0, 100.0, 9.0);
        assert!((score - 95.5).abs() < 1e-9);
        assert_eq!(Grade::from_score(score), Grade::A);
    }

    #[tokio::test]
    async fn strong_area_earns_positives() {
        let scorer = AreaRiskScorer::new()
            .with_crime(Arc::new(Crime(Some(95.0))))
            .with_offenders(Arc::new(Offenders(vec![])))
            .with_schools(Arc::new(Schools(vec![9.0, 9.0])));

        let rating = scorer.rate(&location()).await;

        assert!((rating.score - 95.5).abs() < 1e-9);
        assert_eq!(rating.grade, Grade::A);
        assert_eq!(rating.offenders.score, 100.0);
        assert!(rating.warnings.is_empty(), "{:?}", rating.warnings);
        assert_eq!(rating.positives.len(), 3);
    }

    #[tokio::test]
    async fn failed_lookups_take_neutral_values() {
        let scorer = AreaRiskScorer::new().with_crime(Arc::new(Crime(None)));

        let rating = scorer.rate(&location()).await;

        assert_eq!(rating.crime.score, 50.0);
        assert!(!rating.crime.available);
        assert_eq!(rating.offenders.score, 50.0);
        assert_eq!(rating.schools.average_rating, 5.0);
        // 50*0.5 + 50*0.3 + 50*0.2
        assert!((rating.score - 50.0).abs() < 1e-9);
        assert_eq!(rating.grade, Grade::F);
        assert_eq!(rating.warnings.len(), 3);
    }

    #[tokio::test]
    async fn offender_rules_count_radius_and_proximity() {
        let mut points: Vec<GeoPoint> = (0..6).map(|i| north(0.5 + f64::from(i) * 0.05)).collect();
        points.push(north(3.0));
        let scorer = AreaRiskScorer::new()
            .with_crime(Arc::new(Crime(Some(55.0))))
            .with_offenders(Arc::new(Offenders(points)));

        let rating = scorer.rate(&location()).await;

        assert_eq!(rating.offenders.count_within_one_mile, 6);
        assert_eq!(rating.offenders.score, 40.0);
        assert_eq!(rating.crime.grade, Grade::F);
        assert!(rating.warnings.iter().any(|w| w.starts_with("High crime")));
        assert!(rating.warnings.iter().any(|w| w == "6 registered offenders within 1 mile"));
        assert!(!rating.warnings.iter().any(|w| w.contains("1,000 feet")));
    }

    #[tokio::test]
    async fn single_close_offender_still_warns() {
        let scorer = AreaRiskScorer::new().with_offenders(Arc::new(Offenders(vec![north(0.1)])));

        let rating = scorer.rate(&location()).await;

        assert_eq!(rating.offenders.count_within_one_mile, 1);
        let feet = rating.offenders.nearest_feet.unwrap();
        assert!((feet - 528.0).abs() < 5.0, "{feet}");
        assert!(rating.warnings.iter().any(|w| w.contains("within 1,000 feet")));
    }

    #[tokio::test]
    async fn missing_coordinates_skip_offender_lookup() {
        let scorer = AreaRiskScorer::new().with_offenders(Arc::new(Offenders(vec![north(0.1)])));
        let rating = scorer
            .rate(&AreaLocation {
                point: None,
                ..location()
            })
            .await;
        assert!(!rating.offenders.available);
        assert_eq!(rating.offenders.score, 50.0);
    }
}
