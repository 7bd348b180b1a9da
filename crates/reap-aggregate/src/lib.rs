//! Concurrent fan-out over every property source, identity merge and placeholder fallback.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use futures::future::join_all;
use reap_adapters::{
    ClassifiedsAdapter, DatasetAdapter, ListingSearchAdapter, RegistryAdapter, SourceAdapter, SourceTier,
    VendorProfile,
};
use reap_core::{CriteriaError, Property, PropertyKey, SearchCriteria};
use reap_fetch::{HttpFetcher, HttpJobTransport, JobOrchestrator};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod config;
pub mod dedup;
pub mod demo;

pub use config::PipelineConfig;
pub use dedup::{DedupConfig, DedupEngine, DedupReviewItem};
pub use demo::{DemoSynthesizer, DEMO_SOURCE};

pub const CRATE_NAME: &str = "reap-aggregate";

pub const DATASET_TRIGGER_URL: &str = "https://api.brightdata.com/datasets/v3/trigger";
pub const DATASET_SNAPSHOT_URL: &str = "https://api.brightdata.com/datasets/v3/snapshot";

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error(transparent)]
    Criteria(#[from] CriteriaError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    pub source_id: String,
    pub tier: SourceTier,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRun {
    pub properties: Vec<Property>,
    pub per_source: Vec<SourceReport>,
    pub review_items: Vec<DedupReviewItem>,
    pub used_fallback: bool,
}

/// Merges records that share an identity key. First-seen order is kept; a later
/// record replaces an earlier one only if it has strictly more images.
/// Records without an identity key are dropped.
pub fn merge_by_identity(records: Vec<Property>) -> Vec<Property> {
    let mut merged: Vec<Property> = Vec::with_capacity(records.len());
    let mut positions: HashMap<PropertyKey, usize> = HashMap::new();

    for record in records {
        let Some(key) = record.key() else {
            debug!(source = %record.source, "dropping record without identity key");
            continue;
        };
        match positions.get(&key) {
            Some(&pos) => {
                if record.image_count() > merged[pos].image_count() {
                    merged[pos] = record;
                }
            }
            None => {
                positions.insert(key, merged.len());
                merged.push(record);
            }
        }
    }
    merged
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Scope {
    All,
    FreeOnly,
}

pub struct Aggregator {
    adapters: Vec<Arc<dyn SourceAdapter>>,
    demo: DemoSynthesizer,
    dedup: DedupEngine,
}

impl Aggregator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>) -> Self {
        Self {
            adapters,
            demo: DemoSynthesizer::default(),
            dedup: DedupEngine::default(),
        }
    }

    pub fn with_demo(mut self, demo: DemoSynthesizer) -> Self {
        self.demo = demo;
        self
    }

    pub fn with_dedup(mut self, dedup: DedupEngine) -> Self {
        self.dedup = dedup;
        self
    }

    /// Free sources are always registered; paid ones only when their credentials are set.
    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        let fetcher = Arc::new(HttpFetcher::new(config.http_config()).context("building http fetcher")?);
        let mut adapters: Vec<Arc<dyn SourceAdapter>> = vec![
            Arc::new(RegistryAdapter::with_embedded_counties(Arc::clone(&fetcher)).context("loading county table")?),
            Arc::new(ClassifiedsAdapter::new(Arc::clone(&fetcher))),
        ];

        if let (Some(token), Some(dataset_id)) = (&config.dataset_api_token, &config.dataset_id) {
            let transport = HttpJobTransport::new(
                Arc::clone(&fetcher),
                reap_adapters::dataset::SOURCE_ID,
                format!("{DATASET_TRIGGER_URL}?dataset_id={dataset_id}&include_errors=true"),
                DATASET_SNAPSHOT_URL,
            )
            .with_token(token.clone());
            let jobs = JobOrchestrator::new(Arc::new(transport), config.poll_policy());
            adapters.push(Arc::new(DatasetAdapter::new(jobs)));
        }
        if let Some(key) = &config.listings_api_key {
            adapters.push(Arc::new(ListingSearchAdapter::new(
                Arc::clone(&fetcher),
                VendorProfile::listings_api(),
                Some(key.clone()),
            )));
        }
        if let Some(key) = &config.property_data_api_key {
            adapters.push(Arc::new(ListingSearchAdapter::new(
                Arc::clone(&fetcher),
                VendorProfile::property_data_api(),
                Some(key.clone()),
            )));
        }

        info!(sources = adapters.len(), "aggregator assembled");
        Ok(Self::new(adapters).with_demo(DemoSynthesizer::new(config.demo_count)))
    }

    pub fn source_ids(&self) -> Vec<&'static str> {
        self.adapters.iter().map(|a| a.source_id()).collect()
    }

    /// Every source; falls back to placeholder listings when nothing real comes back.
    pub async fn search_all(&self, criteria: &SearchCriteria) -> Result<Vec<Property>, AggregateError> {
        Ok(self.run(criteria, Scope::All).await?.properties)
    }

    /// Free sources only, and never synthesizes placeholders.
    pub async fn search_free(&self, criteria: &SearchCriteria) -> Result<Vec<Property>, AggregateError> {
        Ok(self.run(criteria, Scope::FreeOnly).await?.properties)
    }

    pub async fn search_all_with_report(&self, criteria: &SearchCriteria) -> Result<AggregateRun, AggregateError> {
        self.run(criteria, Scope::All).await
    }

    /// Free sources only, with per-source counts and review items.
    pub async fn search_free_with_report(&self, criteria: &SearchCriteria) -> Result<AggregateRun, AggregateError> {
        self.run(criteria, Scope::FreeOnly).await
    }

    async fn run(&self, criteria: &SearchCriteria, scope: Scope) -> Result<AggregateRun, AggregateError> {
        criteria.validate()?;

        let selected: Vec<Arc<dyn SourceAdapter>> = self
            .adapters
            .iter()
            .filter(|a| scope == Scope::All || a.tier() == SourceTier::Free)
            .cloned()
            .collect();

        let outcomes = fan_out(&selected, criteria).await;
        let per_source = selected
            .iter()
            .zip(&outcomes)
            .map(|(adapter, props)| SourceReport {
                source_id: adapter.source_id().to_string(),
                tier: adapter.tier(),
                count: props.len(),
            })
            .collect();

        let merged = merge_by_identity(outcomes.into_iter().flatten().collect());
        let review_items = self.dedup.review(&merged);

        let (mut properties, used_fallback) = if merged.is_empty() && scope == Scope::All {
            info!(
                city = criteria.city_or_empty(),
                count = self.demo.count,
                "no source returned listings; synthesizing placeholders"
            );
            (self.demo.synthesize(criteria), true)
        } else {
            let filtered: Vec<Property> = merged.into_iter().filter(|p| criteria.matches(p)).collect();
            (filtered, false)
        };

        if let Some(limit) = criteria.limit {
            properties.truncate(limit);
        }

        Ok(AggregateRun {
            properties,
            per_source,
            review_items,
            used_fallback,
        })
    }
}

/// Runs every adapter as its own task and waits for all of them. A panicking
/// adapter contributes nothing, like a failing one.
async fn fan_out(adapters: &[Arc<dyn SourceAdapter>], criteria: &SearchCriteria) -> Vec<Vec<Property>> {
    let handles = adapters.iter().map(|adapter| {
        let adapter = Arc::clone(adapter);
        let criteria = criteria.clone();
        tokio::spawn(async move { adapter.search(&criteria).await })
    });

    join_all(handles)
        .await
        .into_iter()
        .zip(adapters)
        .map(|(joined, adapter)| match joined {
            Ok(props) => props,
            Err(err) => {
                warn!(source_id = adapter.source_id(), error = %err, "source task aborted");
                Vec::new()
            }
        })
        .collect()
}
