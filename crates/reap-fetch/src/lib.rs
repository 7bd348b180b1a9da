//! HTTP fetch utilities and the job trigger/poll orchestrator for REAP sources.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info_span, Instrument};

pub mod jobs;

pub use jobs::{HttpJobTransport, JobOrchestrator, JobTransport, PollResponse};
pub use reqwest::Method;

pub const CRATE_NAME: &str = "reap-fetch";

pub const DEFAULT_POLL_ATTEMPTS: u32 = 10;
pub const DEFAULT_POLL_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Fixed attempt budget with a fixed delay between attempts. No backoff growth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_POLL_ATTEMPTS,
            delay: DEFAULT_POLL_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            delay,
        }
    }

    /// Same attempt budget, no waiting. Used by tests.
    pub fn immediate(attempts: u32) -> Self {
        Self::new(attempts, Duration::ZERO)
    }

    pub fn with_attempts(self, attempts: u32) -> Self {
        Self::new(attempts, self.delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_source_concurrency: 4,
            retry: RetryPolicy::new(3, Duration::from_millis(500)),
        }
    }
}

/// One outbound request description, independent of the client that sends it.
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub json: Option<JsonValue>,
}

impl FetchRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            json: None,
        }
    }

    pub fn post_json(url: impl Into<String>, body: JsonValue) -> Self {
        Self {
            method: Method::POST,
            json: Some(body),
            ..Self::get(url)
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn bearer(self, token: &str) -> Self {
        self.header("Authorization", format!("Bearer {token}"))
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, FetchError> {
        serde_json::from_slice(&self.body).map_err(|source| FetchError::Decode {
            url: self.final_url.clone(),
            source,
        })
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("concurrency limiter closed")]
    LimiterClosed(#[from] AcquireError),
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    retry: RetryPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            retry: config.retry,
        })
    }

    async fn per_source_semaphore(&self, source_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    fn build(&self, request: &FetchRequest) -> reqwest::RequestBuilder {
        let mut builder = self.client.request(request.method.clone(), &request.url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.json {
            builder = builder.json(body);
        }
        builder
    }

    /// Sends exactly one request and returns whatever status came back.
    pub async fn execute(
        &self,
        source_id: &str,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url = %request.url, method = %request.method);
        self.execute_once(source_id, request).instrument(span).await
    }

    async fn execute_once(
        &self,
        source_id: &str,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let _permits = self.acquire(source_id).await?;
        let resp = self.build(request).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        let body = resp.bytes().await?.to_vec();
        debug!(status = status.as_u16(), bytes = body.len(), "response received");
        Ok(FetchedResponse {
            status,
            final_url,
            body,
        })
    }

    /// Sends the request, retrying transient failures on the fixed-delay policy.
    /// Only a success status is returned as `Ok`.
    pub async fn fetch(
        &self,
        source_id: &str,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", source_id, url = %request.url, method = %request.method);
        self.fetch_with_retry(source_id, request).instrument(span).await
    }

    async fn fetch_with_retry(
        &self,
        source_id: &str,
        request: &FetchRequest,
    ) -> Result<FetchedResponse, FetchError> {
        let _permits = self.acquire(source_id).await?;
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.build(request).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable && attempt < attempts {
                        debug!(attempt, status = status.as_u16(), "retrying");
                        attempt += 1;
                        tokio::time::sleep(self.retry.delay).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable && attempt < attempts {
                        debug!(attempt, error = %err, "retrying");
                        attempt += 1;
                        tokio::time::sleep(self.retry.delay).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }
    }

    pub async fn get_text(&self, source_id: &str, request: &FetchRequest) -> Result<String, FetchError> {
        Ok(self.fetch(source_id, request).await?.text())
    }

    pub async fn get_json<T: DeserializeOwned>(
        &self,
        source_id: &str,
        request: &FetchRequest,
    ) -> Result<T, FetchError> {
        self.fetch(source_id, request).await?.json()
    }

    async fn acquire(&self, source_id: &str) -> Result<(OwnedSemaphorePermit, OwnedSemaphorePermit), FetchError> {
        let global = Arc::clone(&self.global_limit).acquire_owned().await?;
        let source = self.per_source_semaphore(source_id).await.acquire_owned().await?;
        Ok((global, source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_retries_server_errors_and_throttling() {
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), RetryDisposition::Retryable);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), RetryDisposition::NonRetryable);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), RetryDisposition::NonRetryable);
    }

    #[test]
    fn retry_policy_is_fixed_and_never_zero_attempts() {
        let policy = RetryPolicy::new(0, Duration::from_millis(100));
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(100));

        let default = RetryPolicy::default();
        assert_eq!(default.attempts, 10);
        assert_eq!(default.delay, Duration::from_secs(2));
        assert_eq!(RetryPolicy::immediate(5).delay, Duration::ZERO);
        assert_eq!(default.with_attempts(15).delay, Duration::from_secs(2));
    }

    #[test]
    fn request_builder_collects_headers_and_query() {
        let req = FetchRequest::get("https://example.test/search")
            .bearer("tok")
            .query("city", "Austin");
        assert_eq!(req.method, Method::GET);
        assert_eq!(req.headers, vec![("Authorization".to_string(), "Bearer tok".to_string())]);
        assert_eq!(req.query, vec![("city".to_string(), "Austin".to_string())]);

        let post = FetchRequest::post_json("https://example.test/trigger", serde_json::json!([]));
        assert_eq!(post.method, Method::POST);
        assert!(post.json.is_some());
    }

    #[test]
    fn fetched_response_decodes_json_and_reports_url_on_failure() {
        let ok = FetchedResponse {
            status: StatusCode::OK,
            final_url: "https://example.test".into(),
            body: br#"{"a":1}"#.to_vec(),
        };
        let value: JsonValue = ok.json().unwrap();
        assert_eq!(value["a"], 1);

        let bad = FetchedResponse {
            body: b"<html>".to_vec(),
            ..ok
        };
        let err = bad.json::<JsonValue>().unwrap_err();
        assert!(err.to_string().contains("https://example.test"));
    }

    #[tokio::test]
    async fn closed_limiter_fails_the_request_instead_of_panicking() {
        let fetcher = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        assert!(fetcher.acquire("registry").await.is_ok());

        fetcher.global_limit.close();
        let err = fetcher
            .fetch("registry", &FetchRequest::get("http://127.0.0.1:9/never-sent"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::LimiterClosed(_)));
    }
}
