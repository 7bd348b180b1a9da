use std::time::Duration;

use reap_fetch::{HttpClientConfig, RetryPolicy};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub poll_attempts: u32,
    pub poll_delay_ms: u64,
    pub demo_count: usize,
    pub dataset_api_token: Option<String>,
    pub dataset_id: Option<String>,
    pub offender_dataset_id: Option<String>,
    pub listings_api_key: Option<String>,
    pub property_data_api_key: Option<String>,
    pub crime_api_key: Option<String>,
    pub schools_api_key: Option<String>,
    pub hud_api_token: Option<String>,
    pub narrative_api_key: Option<String>,
    pub narrative_base_url: String,
    pub narrative_model: String,
}

fn secret(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parsed<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_agent: "reap-bot/0.1".to_string(),
            http_timeout_secs: 20,
            poll_attempts: reap_fetch::DEFAULT_POLL_ATTEMPTS,
            poll_delay_ms: 2000,
            demo_count: crate::demo::DEFAULT_DEMO_COUNT,
            dataset_api_token: None,
            dataset_id: None,
            offender_dataset_id: None,
            listings_api_key: None,
            property_data_api_key: None,
            crime_api_key: None,
            schools_api_key: None,
            hud_api_token: None,
            narrative_api_key: None,
            narrative_base_url: "https://api.openai.com/v1".to_string(),
            narrative_model: "gpt-4o-mini".to_string(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            user_agent: std::env::var("REAP_USER_AGENT").unwrap_or(defaults.user_agent),
            http_timeout_secs: parsed("REAP_HTTP_TIMEOUT_SECS", defaults.http_timeout_secs),
            poll_attempts: parsed("REAP_POLL_ATTEMPTS", defaults.poll_attempts),
            poll_delay_ms: parsed("REAP_POLL_DELAY_MS", defaults.poll_delay_ms),
            demo_count: parsed("REAP_DEMO_COUNT", defaults.demo_count),
            dataset_api_token: secret("REAP_DATASET_API_TOKEN"),
            dataset_id: secret("REAP_DATASET_ID"),
            offender_dataset_id: secret("REAP_OFFENDER_DATASET_ID"),
            listings_api_key: secret("REAP_LISTINGS_API_KEY"),
            property_data_api_key: secret("REAP_PROPERTY_DATA_API_KEY"),
            crime_api_key: secret("REAP_CRIME_API_KEY"),
            schools_api_key: secret("REAP_SCHOOLS_API_KEY"),
            hud_api_token: secret("REAP_HUD_API_TOKEN"),
            narrative_api_key: secret("REAP_NARRATIVE_API_KEY"),
            narrative_base_url: std::env::var("REAP_NARRATIVE_BASE_URL").unwrap_or(defaults.narrative_base_url),
            narrative_model: std::env::var("REAP_NARRATIVE_MODEL").unwrap_or(defaults.narrative_model),
        }
    }

    pub fn http_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
            ..Default::default()
        }
    }

    /// Poll budget for job-based sources.
    pub fn poll_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.poll_attempts, Duration::from_millis(self.poll_delay_ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.http_timeout_secs, 20);
        assert_eq!(config.demo_count, 10);
        assert_eq!(config.poll_policy(), RetryPolicy::default());
        assert_eq!(config.http_config().timeout, Duration::from_secs(20));
        assert!(config.listings_api_key.is_none());
    }
}
