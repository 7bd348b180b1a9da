use reap_core::{Property, PropertyKey};
use serde::Serialize;
use strsim::jaro_winkler;

#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub review_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            review_threshold: 0.92,
        }
    }
}

/// Two merged records whose identity keys differ but look like the same place.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DedupReviewItem {
    pub key_a: String,
    pub key_b: String,
    pub source_a: String,
    pub source_b: String,
    pub confidence_score: f64,
}

/// Near-duplicate detector. Reports pairs for review and never merges them;
/// only exact identity keys merge.
#[derive(Debug, Clone, Default)]
pub struct DedupEngine {
    config: DedupConfig,
}

impl DedupEngine {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn similarity(&self, a: &Property, b: &Property) -> Option<f64> {
        let ka = a.key()?;
        let kb = b.key()?;
        Some(jaro_winkler(ka.as_str(), kb.as_str()))
    }

    pub fn review(&self, properties: &[Property]) -> Vec<DedupReviewItem> {
        let keyed: Vec<(&Property, PropertyKey)> = properties
            .iter()
            .filter_map(|p| p.key().map(|key| (p, key)))
            .collect();

        let mut review_items = Vec::new();
        for (i, (a, ka)) in keyed.iter().enumerate() {
            for (b, kb) in &keyed[i + 1..] {
                if ka == kb {
                    continue;
                }
                let score = jaro_winkler(ka.as_str(), kb.as_str());
                if score >= self.config.review_threshold {
                    review_items.push(DedupReviewItem {
                        key_a: ka.to_string(),
                        key_b: kb.to_string(),
                        source_a: a.source.clone(),
                        source_b: b.source.clone(),
                        confidence_score: score,
                    });
                }
            }
        }
        review_items
    }
}
