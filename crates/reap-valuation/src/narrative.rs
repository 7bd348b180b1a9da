//! Optional free-text generation for expert opinions.
//!
//! The synthesizer always calls a [`Narrator`]. [`TemplateNarrator`] hands back the
//! deterministic draft; [`LlmNarrator`] asks an OpenAI-compatible chat endpoint for
//! the same JSON shape and rejects anything it cannot parse.

use std::sync::Arc;

use async_trait::async_trait;
use reap_core::Archetype;
use reap_fetch::{FetchError, FetchRequest, HttpFetcher};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Narrative {
    pub summary: String,
    pub strengths: Vec<String>,
    pub concerns: Vec<String>,
    /// Set when the text came from a generative service.
    #[serde(skip)]
    pub generated: bool,
}

#[derive(Debug, Clone)]
pub struct NarrativePrompt {
    pub archetype: Archetype,
    pub expert_name: String,
    /// Deterministic figures the text must agree with.
    pub facts: JsonValue,
    pub draft: Narrative,
}

#[derive(Debug, Error)]
pub enum NarrativeError {
    #[error("narrative service not configured")]
    NotConfigured,
    #[error(transparent)]
    Transport(#[from] FetchError),
    #[error("malformed narrative response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Narrator: Send + Sync {
    async fn narrate(&self, prompt: &NarrativePrompt) -> Result<Narrative, NarrativeError>;
}

/// Returns the hand-authored draft unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateNarrator;

#[async_trait]
impl Narrator for TemplateNarrator {
    async fn narrate(&self, prompt: &NarrativePrompt) -> Result<Narrative, NarrativeError> {
        Ok(prompt.draft.clone())
    }
}

pub struct LlmNarrator {
    fetcher: Arc<HttpFetcher>,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmNarrator {
    pub const SOURCE_ID: &'static str = "narrative";

    pub fn new(
        fetcher: Arc<HttpFetcher>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }

    pub fn request_body(&self, prompt: &NarrativePrompt) -> JsonValue {
        let system = format!(
            "You are {}, a {} real estate investor. Reply with ONLY a JSON object of the form \
             {{\"summary\": string, \"strengths\": [string], \"concerns\": [string]}}. \
             Do not change any number you are given.",
            prompt.expert_name,
            prompt.archetype.as_str()
        );
        let user = json!({
            "facts": prompt.facts,
            "draft": prompt.draft,
        });
        json!({
            "model": self.model,
            "temperature": 0.4,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user.to_string()},
            ],
        })
    }
}

#[async_trait]
impl Narrator for LlmNarrator {
    async fn narrate(&self, prompt: &NarrativePrompt) -> Result<Narrative, NarrativeError> {
        if self.api_key.trim().is_empty() {
            return Err(NarrativeError::NotConfigured);
        }
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let request = FetchRequest::post_json(url, self.request_body(prompt)).bearer(&self.api_key);
        let response: JsonValue = self.fetcher.get_json(Self::SOURCE_ID, &request).await?;
        let content = response
            .pointer("/choices/0/message/content")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| NarrativeError::Malformed("no message content".into()))?;
        parse_narrative(content)
    }
}

#[derive(Deserialize)]
struct RawNarrative {
    summary: Option<String>,
    strengths: Option<Vec<JsonValue>>,
    concerns: Option<Vec<JsonValue>>,
}

fn string_items(items: Vec<JsonValue>) -> Vec<String> {
    items
        .into_iter()
        .filter_map(|v| v.as_str().map(str::trim).filter(|s| !s.is_empty()).map(str::to_string))
        .collect()
}

/// Tolerates code fences and chatter around the object; every field must be present.
pub fn parse_narrative(content: &str) -> Result<Narrative, NarrativeError> {
    let start = content
        .find('{')
        .ok_or_else(|| NarrativeError::Malformed("no JSON object".into()))?;
    let end = content
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| NarrativeError::Malformed("unterminated JSON object".into()))?;
    let raw: RawNarrative =
        serde_json::from_str(&content[start..=end]).map_err(|e| NarrativeError::Malformed(e.to_string()))?;

    let summary = raw
        .summary
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| NarrativeError::Malformed("missing summary".into()))?;
    let strengths = raw
        .strengths
        .map(string_items)
        .ok_or_else(|| NarrativeError::Malformed("missing strengths".into()))?;
    let concerns = raw
        .concerns
        .map(string_items)
        .ok_or_else(|| NarrativeError::Malformed("missing concerns".into()))?;

    Ok(Narrative {
        summary,
        strengths,
        concerns,
        generated: true,
    })
}
