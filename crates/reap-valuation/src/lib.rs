//! Comparable-based valuation, area risk grading and investor opinions for a single property.

use reap_aggregate::AggregateError;
use thiserror::Error;

pub mod expert;
pub mod narrative;
pub mod report;
pub mod risk;
pub mod similarity;

pub use expert::{ExpertInputs, ExpertSynthesizer};
pub use narrative::{LlmNarrator, Narrative, NarrativeError, NarrativePrompt, Narrator, TemplateNarrator};
pub use report::{CrimeScoreReport, GovernmentHousing, ValuationReport, ValuationRequest, ValuationService};
pub use risk::AreaRiskScorer;
pub use similarity::{Confidence, MarketTrend, Range, SimilarityEngine, ValuationEstimate};

pub const CRATE_NAME: &str = "reap-valuation";

#[derive(Debug, Error)]
pub enum ValuationError {
    #[error("no priced comparables to value against")]
    NoComparables,
    #[error(transparent)]
    Search(#[from] AggregateError),
}
