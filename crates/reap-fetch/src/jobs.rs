//! Trigger/poll/timeout state machine shared by every job-based source.
//!
//! A job is triggered once, then polled on a fixed [`RetryPolicy`]. "Not ready"
//! answers are retried; any other failure ends the job early. Running out of
//! attempts is a soft timeout: the caller gets an empty result, never an error.

use std::sync::Arc;

use async_trait::async_trait;
use reap_core::{JobStatus, ScrapeJob};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::{FetchError, FetchRequest, HttpFetcher, RetryPolicy};

/// Outcome of a single snapshot poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollResponse {
    Ready(Vec<JsonValue>),
    NotReady,
    Failed { status: u16 },
}

#[async_trait]
pub trait JobTransport: Send + Sync {
    /// Returns the opaque job id, or `None` when the response carried none.
    async fn trigger(&self, target_url: &str, payload: &JsonValue) -> Result<Option<String>, FetchError>;

    async fn poll(&self, job_id: &str) -> Result<PollResponse, FetchError>;
}

/// Job transport over a hosted trigger endpoint and a snapshot download endpoint.
#[derive(Debug, Clone)]
pub struct HttpJobTransport {
    fetcher: Arc<HttpFetcher>,
    source_id: String,
    trigger_url: String,
    snapshot_base_url: String,
    api_token: Option<String>,
}

impl HttpJobTransport {
    pub fn new(
        fetcher: Arc<HttpFetcher>,
        source_id: impl Into<String>,
        trigger_url: impl Into<String>,
        snapshot_base_url: impl Into<String>,
    ) -> Self {
        Self {
            fetcher,
            source_id: source_id.into(),
            trigger_url: trigger_url.into(),
            snapshot_base_url: snapshot_base_url.into(),
            api_token: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    fn authorize(&self, request: FetchRequest) -> FetchRequest {
        match &self.api_token {
            Some(token) => request.bearer(token),
            None => request,
        }
    }
}

/// Pulls a job identifier out of a trigger response body.
pub fn extract_job_id(body: &JsonValue) -> Option<String> {
    ["snapshot_id", "job_id", "id"].iter().find_map(|field| {
        match body.get(*field)? {
            JsonValue::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            JsonValue::Number(n) => Some(n.to_string()),
            _ => None,
        }
    })
}

/// Interprets a snapshot response. `404`/`202` and "still running" bodies are retry signals.
pub fn interpret_snapshot(status: StatusCode, body: &[u8]) -> PollResponse {
    if status == StatusCode::NOT_FOUND || status == StatusCode::ACCEPTED {
        return PollResponse::NotReady;
    }
    if !status.is_success() {
        return PollResponse::Failed {
            status: status.as_u16(),
        };
    }
    match serde_json::from_slice::<JsonValue>(body) {
        Ok(JsonValue::Array(items)) => PollResponse::Ready(items),
        Ok(JsonValue::Object(obj)) => {
            let still_running = obj
                .get("status")
                .and_then(JsonValue::as_str)
                .is_some_and(|s| matches!(s, "running" | "building" | "starting" | "collecting"));
            if still_running {
                PollResponse::NotReady
            } else {
                PollResponse::Failed {
                    status: status.as_u16(),
                }
            }
        }
        _ => PollResponse::Failed {
            status: status.as_u16(),
        },
    }
}

#[async_trait]
impl JobTransport for HttpJobTransport {
    async fn trigger(&self, target_url: &str, payload: &JsonValue) -> Result<Option<String>, FetchError> {
        let body = if payload.is_null() {
            serde_json::json!([{ "url": target_url }])
        } else {
            payload.clone()
        };
        let request = self.authorize(FetchRequest::post_json(&self.trigger_url, body));
        let resp = self.fetcher.execute(&self.source_id, &request).await?;
        if !resp.status.is_success() {
            warn!(source_id = %self.source_id, status = resp.status.as_u16(), "job trigger rejected");
            return Ok(None);
        }
        let Ok(value) = resp.json::<JsonValue>() else {
            return Ok(None);
        };
        Ok(extract_job_id(&value))
    }

    async fn poll(&self, job_id: &str) -> Result<PollResponse, FetchError> {
        let url = format!("{}/{}", self.snapshot_base_url.trim_end_matches('/'), job_id);
        let request = self.authorize(FetchRequest::get(url).query("format", "json"));
        let resp = self.fetcher.execute(&self.source_id, &request).await?;
        Ok(interpret_snapshot(resp.status, &resp.body))
    }
}

#[derive(Clone)]
pub struct JobOrchestrator {
    transport: Arc<dyn JobTransport>,
    policy: RetryPolicy,
}

impl JobOrchestrator {
    pub fn new(transport: Arc<dyn JobTransport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    /// Same transport, different attempt budget for a particular call site.
    pub fn with_policy(&self, policy: RetryPolicy) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            policy,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Issues one trigger request. Any failure or a missing job id yields `None`.
    pub async fn trigger(&self, target_url: &str, payload: &JsonValue) -> Option<ScrapeJob> {
        match self.transport.trigger(target_url, payload).await {
            Ok(Some(job_id)) => {
                info!(%job_id, target_url, "job triggered");
                Some(ScrapeJob::new(target_url, job_id))
            }
            Ok(None) => {
                warn!(target_url, "job trigger returned no job id");
                None
            }
            Err(err) => {
                warn!(target_url, error = %err, "job trigger failed");
                None
            }
        }
    }

    /// Polls until the job is ready, fails, or the attempt budget runs out.
    /// Performs at most `policy.attempts` polls and sleeps only between them.
    pub async fn poll_until_ready(&self, job: &mut ScrapeJob) -> Vec<JsonValue> {
        if job.status.is_terminal() {
            return Vec::new();
        }
        let attempts = self.policy.attempts.max(1);
        job.status = JobStatus::Polling;

        while job.attempts < attempts {
            job.attempts += 1;
            match self.transport.poll(&job.job_id).await {
                Ok(PollResponse::Ready(items)) => {
                    info!(job_id = %job.job_id, attempt = job.attempts, records = items.len(), "job ready");
                    job.status = JobStatus::Ready;
                    return items;
                }
                Ok(PollResponse::NotReady) => {
                    debug!(job_id = %job.job_id, attempt = job.attempts, "job not ready");
                }
                Ok(PollResponse::Failed { status }) => {
                    warn!(job_id = %job.job_id, status, "job poll failed, giving up");
                    job.status = JobStatus::Failed;
                    return Vec::new();
                }
                Err(err) => {
                    warn!(job_id = %job.job_id, error = %err, "job poll errored, giving up");
                    job.status = JobStatus::Failed;
                    return Vec::new();
                }
            }
            if job.attempts < attempts && !self.policy.delay.is_zero() {
                tokio::time::sleep(self.policy.delay).await;
            }
        }

        warn!(job_id = %job.job_id, attempts, "job timed out");
        job.status = JobStatus::TimedOut;
        Vec::new()
    }

    /// Trigger followed by polling; empty on any failure.
    pub async fn run(&self, target_url: &str, payload: &JsonValue) -> Vec<JsonValue> {
        match self.trigger(target_url, payload).await {
            Some(mut job) => self.poll_until_ready(&mut job).await,
            None => Vec::new(),
        }
    }
}
