//! Comparable scoring and the weighted value/rent estimate.

use reap_core::{haversine_miles, Comparable, Property};
use serde::{Deserialize, Serialize};

use crate::ValuationError;

pub const MAX_COMPARABLES: usize = 10;
pub const RANGE_SPREAD: f64 = 0.10;
/// Monthly rent proxy as a share of value when no comparable reports rent.
pub const RENT_TO_VALUE: f64 = 0.005;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_average_similarity(avg: f64) -> Self {
        if avg >= 80.0 {
            Self::High
        } else if avg >= 60.0 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketTrend {
    Appreciating,
    Stable,
    Declining,
}

impl MarketTrend {
    /// `None` when no comparable reports days on market.
    pub fn from_days_on_market(avg_days: Option<f64>) -> Self {
        match avg_days {
            Some(d) if d < 30.0 => Self::Appreciating,
            Some(d) if d < 60.0 => Self::Stable,
            Some(_) => Self::Declining,
            None => Self::Stable,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub low: f64,
    pub high: f64,
}

impl Range {
    pub fn around(center: f64) -> Self {
        Self {
            low: center * (1.0 - RANGE_SPREAD),
            high: center * (1.0 + RANGE_SPREAD),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuationEstimate {
    pub value: f64,
    pub value_range: Range,
    pub rent: f64,
    pub rent_range: Range,
    pub price_per_sqft: Option<f64>,
    pub confidence: Confidence,
    pub trend: MarketTrend,
    pub comparables_used: usize,
    pub average_similarity: f64,
    /// Plain average of the priced comparables that fed the estimate.
    pub comparable_average_price: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SimilarityEngine;

impl SimilarityEngine {
    pub fn new() -> Self {
        Self
    }

    /// 100 minus capped deductions; each attribute only counts when both sides know it.
    pub fn score(&self, subject: &Property, comparable: &Property) -> f64 {
        let mut score = 100.0;

        if let (Some(a), Some(b)) = (subject.bedrooms, comparable.bedrooms) {
            score -= (f64::from(a.abs_diff(b)) * 10.0).min(20.0);
        }
        if let (Some(a), Some(b)) = (subject.bathrooms, comparable.bathrooms) {
            score -= ((a - b).abs() * 7.5).min(15.0);
        }
        if let (Some(a), Some(b)) = (subject.square_feet, comparable.square_feet) {
            if a > 0 {
                let pct = f64::from(a.abs_diff(b)) / f64::from(a);
                score -= (pct * 100.0).min(25.0);
            }
        }
        if let (Some(a), Some(b)) = (subject.year_built, comparable.year_built) {
            score -= (f64::from(a.abs_diff(b)) / 2.0).min(15.0);
        }
        if subject.property_type != comparable.property_type {
            score -= 20.0;
        }
        if let Some(miles) = distance_miles(subject, comparable) {
            score -= (miles * 2.0).min(10.0);
        }

        score.clamp(0.0, 100.0)
    }

    /// Scores every candidate except the subject itself, best first.
    pub fn select_comparables(&self, subject: &Property, candidates: &[Property]) -> Vec<Comparable> {
        let subject_key = subject.key();
        let mut comparables: Vec<Comparable> = candidates
            .iter()
            .filter(|c| subject_key.is_none() || c.key() != subject_key)
            .map(|c| Comparable {
                similarity: self.score(subject, c),
                distance_miles: distance_miles(subject, c),
                property: c.clone(),
            })
            .collect();
        comparables.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        comparables
    }

    pub fn estimate(&self, subject: &Property, comparables: &[Comparable]) -> Result<ValuationEstimate, ValuationError> {
        let mut ranked: Vec<&Comparable> = comparables.iter().collect();
        ranked.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        ranked.truncate(MAX_COMPARABLES);

        let priced: Vec<(&Comparable, f64)> = ranked
            .iter()
            .filter_map(|c| c.property.effective_price().map(|p| (*c, p)))
            .collect();
        if priced.is_empty() {
            return Err(ValuationError::NoComparables);
        }

        let value = weighted_average(priced.iter().map(|(c, p)| (c.similarity, *p)));
        let rent = weighted_rent(ranked.iter().copied()).unwrap_or(value * RENT_TO_VALUE);

        let average_similarity = priced.iter().map(|(c, _)| c.similarity).sum::<f64>() / priced.len() as f64;
        let comparable_average_price = priced.iter().map(|(_, p)| p).sum::<f64>() / priced.len() as f64;

        let days: Vec<f64> = ranked
            .iter()
            .filter_map(|c| c.property.metadata.days_on_market)
            .map(f64::from)
            .collect();
        let avg_days = (!days.is_empty()).then(|| days.iter().sum::<f64>() / days.len() as f64);

        let price_per_sqft = subject
            .square_feet
            .filter(|sqft| *sqft > 0)
            .map(|sqft| value / f64::from(sqft));

        Ok(ValuationEstimate {
            value,
            value_range: Range::around(value),
            rent,
            rent_range: Range::around(rent),
            price_per_sqft,
            confidence: Confidence::from_average_similarity(average_similarity),
            trend: MarketTrend::from_days_on_market(avg_days),
            comparables_used: priced.len(),
            average_similarity,
            comparable_average_price,
        })
    }
}

fn distance_miles(a: &Property, b: &Property) -> Option<f64> {
    Some(haversine_miles(a.coordinates()?, b.coordinates()?))
}

/// Similarity-weighted mean (weight = similarity / 100). All-zero weights fall back to the plain mean.
fn weighted_average(items: impl Iterator<Item = (f64, f64)>) -> f64 {
    let (weighted, weights, sum, n) = items.fold((0.0, 0.0, 0.0, 0usize), |(ws, w, s, n), (sim, v)| {
        let weight = sim / 100.0;
        (ws + weight * v, w + weight, s + v, n + 1)
    });
    if weights > 0.0 {
        weighted / weights
    } else if n > 0 {
        sum / n as f64
    } else {
        0.0
    }
}

/// Weighted rent over comparables that report one; `None` if none do.
pub fn weighted_rent<'a>(comparables: impl Iterator<Item = &'a Comparable>) -> Option<f64> {
    let rents: Vec<(f64, f64)> = comparables
        .filter_map(|c| {
            c.property
                .estimated_rent
                .filter(|r| *r > 0.0)
                .map(|r| (c.similarity, r))
        })
        .collect();
    if rents.is_empty() {
        None
    } else {
        Some(weighted_average(rents.into_iter()))
    }
}
