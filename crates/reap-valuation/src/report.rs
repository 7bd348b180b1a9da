//! Valuation report assembly: comparables, area grade, subsidy rent and expert opinions.

use std::sync::Arc;

use anyhow::Context;
use reap_adapters::{
    CrimeApiClient, FairMarketRents, FmrBasis, FmrQuote, HudFmrClient, OffenderRegistryClient, SchoolRatingsClient,
    SubsidyRateSource,
};
use reap_aggregate::{Aggregator, PipelineConfig, DATASET_SNAPSHOT_URL, DATASET_TRIGGER_URL};
use reap_core::{
    AreaRating, Comparable, CrimeSubScore, ExpertOpinion, OffenderSubScore, Property, SchoolSubScore, SearchCriteria,
};
use reap_fetch::{HttpFetcher, HttpJobTransport, JobOrchestrator};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::expert::{ExpertInputs, ExpertSynthesizer};
use crate::narrative::{LlmNarrator, Narrator, TemplateNarrator};
use crate::risk::AreaRiskScorer;
use crate::similarity::{weighted_rent, Confidence, MarketTrend, Range, SimilarityEngine, MAX_COMPARABLES};
use crate::ValuationError;

const OFFENDER_SOURCE_ID: &str = "offender-registry";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationRequest {
    pub subject: Property,
    #[serde(default)]
    pub comparables: Vec<Property>,
    /// Rental listings; their asking price is read as monthly rent when no rent estimate is set.
    #[serde(default)]
    pub rental_comparables: Vec<Property>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrimeScoreReport {
    /// Grade letter.
    pub overall_score: String,
    pub score_number: f64,
    pub crime: CrimeSubScore,
    pub offenders: OffenderSubScore,
    pub schools: SchoolSubScore,
    pub warnings: Vec<String>,
    pub positives: Vec<String>,
}

impl From<AreaRating> for CrimeScoreReport {
    fn from(rating: AreaRating) -> Self {
        Self {
            overall_score: rating.grade.to_string(),
            score_number: (rating.score * 10.0).round() / 10.0,
            crime: rating.crime,
            offenders: rating.offenders,
            schools: rating.schools,
            warnings: rating.warnings,
            positives: rating.positives,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GovernmentHousing {
    pub fair_market_rent: f64,
    pub bedrooms: u32,
    pub basis: FmrBasis,
    pub zip_code: String,
    pub annual_rent: f64,
    /// Annual subsidy rent over asking price, as a percentage.
    pub gross_yield_percent: Option<f64>,
}

impl GovernmentHousing {
    fn new(quote: &FmrQuote, zip_code: &str, asking: Option<f64>) -> Self {
        let annual_rent = quote.monthly_rent * 12.0;
        Self {
            fair_market_rent: quote.monthly_rent,
            bedrooms: quote.bedrooms,
            basis: quote.basis,
            zip_code: zip_code.to_string(),
            annual_rent,
            gross_yield_percent: asking.map(|price| (annual_rent / price * 1000.0).round() / 10.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationReport {
    pub estimated_value: f64,
    pub value_range: Range,
    pub price_per_sqft: Option<f64>,
    pub estimated_rent: f64,
    pub rent_range: Range,
    pub confidence: Confidence,
    pub market_trend: MarketTrend,
    pub average_similarity: f64,
    pub comparables: Vec<Comparable>,
    pub rental_comps: Vec<Comparable>,
    pub crime_score: CrimeScoreReport,
    pub expert_analyses: [ExpertOpinion; 3],
    pub government_housing: GovernmentHousing,
}

#[derive(Default)]
pub struct ValuationService {
    engine: SimilarityEngine,
    risk: AreaRiskScorer,
    experts: ExpertSynthesizer,
    fmr: FairMarketRents,
}

impl ValuationService {
    pub fn new(risk: AreaRiskScorer, experts: ExpertSynthesizer, fmr: FairMarketRents) -> Self {
        Self {
            engine: SimilarityEngine::new(),
            risk,
            experts,
            fmr,
        }
    }

    /// Fact sources and the narrative service are wired only when their credentials are set.
    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(config.http_config()).context("building http fetcher")?);

        let mut risk = AreaRiskScorer::new();
        if let Some(key) = &config.crime_api_key {
            risk = risk.with_crime(Arc::new(CrimeApiClient::new(Arc::clone(&fetcher), key.clone())));
        }
        if let Some(key) = &config.schools_api_key {
            risk = risk.with_schools(Arc::new(SchoolRatingsClient::new(Arc::clone(&fetcher), key.clone())));
        }
        if let (Some(token), Some(dataset_id)) = (&config.dataset_api_token, &config.offender_dataset_id) {
            let transport = HttpJobTransport::new(
                Arc::clone(&fetcher),
                OFFENDER_SOURCE_ID,
                format!("{DATASET_TRIGGER_URL}?dataset_id={dataset_id}&include_errors=true"),
                DATASET_SNAPSHOT_URL,
            )
            .with_token(token.clone());
            let jobs = JobOrchestrator::new(Arc::new(transport), config.poll_policy());
            risk = risk.with_offenders(Arc::new(OffenderRegistryClient::new(jobs)));
        }

        let live_fmr: Option<Arc<dyn SubsidyRateSource>> = match &config.hud_api_token {
            Some(token) => Some(Arc::new(HudFmrClient::new(Arc::clone(&fetcher), token.clone()))),
            None => None,
        };
        let fmr = FairMarketRents::new(live_fmr);

        let narrator: Arc<dyn Narrator> = match &config.narrative_api_key {
            Some(key) => Arc::new(LlmNarrator::new(
                Arc::clone(&fetcher),
                config.narrative_base_url.clone(),
                key.clone(),
                config.narrative_model.clone(),
            )),
            None => Arc::new(TemplateNarrator),
        };

        info!(
            narrative = config.narrative_api_key.is_some(),
            live_fmr = config.hud_api_token.is_some(),
            "valuation service assembled"
        );
        Ok(Self::new(risk, ExpertSynthesizer::new(narrator), fmr))
    }

    #[instrument(skip_all, fields(address = %request.subject.address, city = %request.subject.city))]
    pub async fn value(&self, request: &ValuationRequest) -> Result<ValuationReport, ValuationError> {
        let subject = &request.subject;

        let mut comparables = self.engine.select_comparables(subject, &request.comparables);
        let estimate = self.engine.estimate(subject, &comparables)?;
        comparables.truncate(MAX_COMPARABLES);

        let rentals: Vec<Property> = request
            .rental_comparables
            .iter()
            .cloned()
            .map(|mut p| {
                p.estimated_rent = p.estimated_rent.or(p.price);
                p
            })
            .collect();
        let mut rental_comps = self.engine.select_comparables(subject, &rentals);
        rental_comps.truncate(MAX_COMPARABLES);
        let (rent, rent_range) = match weighted_rent(rental_comps.iter()) {
            Some(rent) => (rent, Range::around(rent)),
            None => (estimate.rent, estimate.rent_range),
        };

        let location = subject.location();
        let (area, fmr) = tokio::join!(
            self.risk.rate(&location),
            self.fmr.quote(&subject.zip_code, subject.bedrooms)
        );

        let asking = subject.effective_price();
        let inputs = ExpertInputs {
            subject_label: subject_label(subject),
            subject_price: asking.unwrap_or(estimate.value),
            comparable_avg_price: estimate.comparable_average_price,
            comparable_avg_rent: rent,
            area: area.clone(),
            fmr: fmr.clone(),
        };
        let expert_analyses = self.experts.synthesize(&inputs).await;

        info!(
            value = estimate.value,
            comparables = estimate.comparables_used,
            grade = %area.grade,
            "valuation complete"
        );

        Ok(ValuationReport {
            estimated_value: estimate.value,
            value_range: estimate.value_range,
            price_per_sqft: estimate.price_per_sqft,
            estimated_rent: rent,
            rent_range,
            confidence: estimate.confidence,
            market_trend: estimate.trend,
            average_similarity: estimate.average_similarity,
            comparables,
            rental_comps,
            crime_score: area.into(),
            expert_analyses,
            government_housing: GovernmentHousing::new(&fmr, &subject.zip_code, asking),
        })
    }

    /// Fills the comparables from the free sources around the subject, then values it.
    /// Supplied rental comparables are kept.
    pub async fn value_from_market(
        &self,
        aggregator: &Aggregator,
        mut request: ValuationRequest,
    ) -> Result<ValuationReport, ValuationError> {
        let criteria = market_criteria(&request.subject);
        request.comparables = aggregator.search_free(&criteria).await?;
        info!(
            candidates = request.comparables.len(),
            rentals = request.rental_comparables.len(),
            "market candidates collected"
        );
        self.value(&request).await
    }
}

/// City and state when the subject has a city, the postal code otherwise.
pub fn market_criteria(subject: &Property) -> SearchCriteria {
    let non_blank = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
    match non_blank(&subject.city) {
        Some(city) => SearchCriteria {
            city: Some(city),
            state: non_blank(&subject.state),
            ..Default::default()
        },
        None => SearchCriteria {
            zip_code: non_blank(&subject.zip_code),
            ..Default::default()
        },
    }
}

fn subject_label(subject: &Property) -> String {
    [subject.address.as_str(), subject.city.as_str(), subject.state.as_str()]
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use reap_adapters::{AdapterError, CrimeDataSource, CrimeStats, SourceAdapter, SourceTier};
    use reap_core::{AreaLocation, Archetype, PropertyType};

    fn house(address: &str, beds: u32, price: f64) -> Property {
        Property {
            address: address.into(),
            city: "Indianapolis".into(),
            state: "IN".into(),
            zip_code: "46204".into(),
            bedrooms: Some(beds),
            bathrooms: Some(2.0),
            square_feet: Some(1_500),
            property_type: PropertyType::SingleFamily,
            price: Some(price),
            source: "test".into(),
            ..Default::default()
        }
    }

    struct SafeArea;

    #[async_trait]
    impl CrimeDataSource for SafeArea {
        async fn crime_stats(&self, _location: &AreaLocation) -> Result<CrimeStats, AdapterError> {
            Ok(CrimeStats {
                safety_score: 92.0,
                violent_incidents: Some(0),
                property_incidents: Some(2),
            })
        }
    }

    fn request() -> ValuationRequest {
        ValuationRequest {
            subject: house("12 Elm St", 3, 250_000.0),
            comparables: vec![
                house("1 Oak St", 3, 300_000.0),
                house("2 Oak St", 4, 280_000.0),
                house("3 Oak St", 2, 260_000.0),
            ],
            rental_comparables: Vec::new(),
        }
    }

    #[tokio::test]
    async fn report_carries_every_section() {
        let service = ValuationService::new(
            AreaRiskScorer::new().with_crime(Arc::new(SafeArea)),
            ExpertSynthesizer::default(),
            FairMarketRents::default(),
        );

        let report = service.value(&request()).await.unwrap();

        assert!(report.estimated_value > 260_000.0 && report.estimated_value < 300_000.0);
        assert_eq!(report.comparables.len(), 3);
        assert_eq!(report.comparables[0].property.address, "1 Oak St");
        assert!(report.rental_comps.is_empty());
        // No rent anywhere, so the value proxy applies.
        assert!((report.estimated_rent - report.estimated_value * 0.005).abs() < 1e-6);
        assert!(report.crime_score.crime.available);
        assert_eq!(report.government_housing.basis, FmrBasis::Regional);
        assert_eq!(report.government_housing.fair_market_rent, 1_540.0);
        assert_eq!(report.government_housing.bedrooms, 3);
        assert_eq!(report.expert_analyses.len(), 3);
        assert_eq!(report.expert_analyses[2].archetype, Archetype::SubsidizedHousing);
    }

    #[tokio::test]
    async fn report_serializes_with_contract_names() {
        let report = ValuationService::default().value(&request()).await.unwrap();
        let json = serde_json::to_value(&report).unwrap();

        for key in [
            "estimatedValue",
            "valueRange",
            "pricePerSqft",
            "estimatedRent",
            "rentRange",
            "comparables",
            "rentalComps",
            "crimeScore",
            "expertAnalyses",
            "governmentHousing",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        // Every lookup missing: 50*0.5 + 50*0.3 + 5*10*0.2.
        assert_eq!(json["crimeScore"]["overallScore"], "F");
        assert_eq!(json["crimeScore"]["scoreNumber"], 50.0);
        assert!(json["valueRange"]["low"].as_f64().unwrap() < json["valueRange"]["high"].as_f64().unwrap());
        assert_eq!(json["expertAnalyses"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rental_listings_override_rent() {
        let mut req = request();
        req.rental_comparables = vec![house("9 Pine St", 3, 1_750.0), house("10 Pine St", 3, 1_850.0)];

        let report = ValuationService::default().value(&req).await.unwrap();

        assert_eq!(report.rental_comps.len(), 2);
        assert!((report.estimated_rent - 1_800.0).abs() < 1e-6);
        assert!((report.rent_range.low - 1_620.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn no_comparables_is_an_error() {
        let mut req = request();
        req.comparables.clear();
        let err = ValuationService::default().value(&req).await.unwrap_err();
        assert!(matches!(err, ValuationError::NoComparables));
    }

    struct Market(Vec<Property>);

    #[async_trait]
    impl SourceAdapter for Market {
        fn source_id(&self) -> &'static str {
            "market"
        }

        fn tier(&self) -> SourceTier {
            SourceTier::Free
        }

        async fn fetch(&self, _criteria: &SearchCriteria) -> Result<Vec<Property>, AdapterError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn market_valuation_uses_free_sources_and_skips_the_subject() {
        let req = request();
        let mut listings = req.comparables.clone();
        listings.push(req.subject.clone());
        let market: Arc<dyn SourceAdapter> = Arc::new(Market(listings));
        let aggregator = Aggregator::new(vec![market]);

        let report = ValuationService::default()
            .value_from_market(
                &aggregator,
                ValuationRequest {
                    subject: req.subject.clone(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(report.comparables.len(), 3);
        assert!(report.comparables.iter().all(|c| c.property.address != "12 Elm St"));
        assert!(report.rental_comps.is_empty());
    }

    #[tokio::test]
    async fn market_valuation_keeps_supplied_rentals() {
        let req = request();
        let market: Arc<dyn SourceAdapter> = Arc::new(Market(req.comparables.clone()));
        let aggregator = Aggregator::new(vec![market]);
        let with_rentals = ValuationRequest {
            subject: req.subject.clone(),
            comparables: Vec::new(),
            rental_comparables: vec![house("9 Pine St", 3, 1_900.0)],
        };

        let report = ValuationService::default()
            .value_from_market(&aggregator, with_rentals)
            .await
            .unwrap();

        assert_eq!(report.comparables.len(), 3);
        assert_eq!(report.rental_comps.len(), 1);
        assert!((report.estimated_rent - 1_900.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn market_valuation_without_location_is_rejected() {
        let aggregator = Aggregator::new(Vec::new());
        let subject = Property {
            address: "1 Nowhere Rd".into(),
            ..Default::default()
        };
        let err = ValuationService::default()
            .value_from_market(
                &aggregator,
                ValuationRequest {
                    subject,
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ValuationError::Search(_)));
    }

    #[test]
    fn market_criteria_prefers_city() {
        let criteria = market_criteria(&house("12 Elm St", 3, 1.0));
        assert_eq!(criteria.city.as_deref(), Some("Indianapolis"));
        assert_eq!(criteria.state.as_deref(), Some("IN"));
        assert!(criteria.zip_code.is_none());

        let zip_only = Property {
            zip_code: "46204".into(),
            ..Default::default()
        };
        assert_eq!(market_criteria(&zip_only).zip_code.as_deref(), Some("46204"));
    }
}
