//! Axum JSON API over the aggregator and the valuation service.

use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use reap_aggregate::{AggregateError, Aggregator, PipelineConfig};
use reap_core::{CriteriaError, PropertyType, SearchCriteria};
use reap_valuation::{ValuationError, ValuationRequest, ValuationService};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "reap-web";
pub const DEFAULT_PORT: u16 = 8000;

#[derive(Clone)]
pub struct AppState {
    pub aggregator: Arc<Aggregator>,
    pub valuation: Arc<ValuationService>,
}

impl AppState {
    pub fn new(aggregator: Aggregator, valuation: ValuationService) -> Self {
        Self {
            aggregator: Arc::new(aggregator),
            valuation: Arc::new(valuation),
        }
    }

    pub fn from_config(config: &PipelineConfig) -> anyhow::Result<Self> {
        Ok(Self::new(
            Aggregator::from_config(config).context("assembling aggregator")?,
            ValuationService::from_config(config).context("assembling valuation service")?,
        ))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertiesQuery {
    city: Option<String>,
    state: Option<String>,
    zip: Option<String>,
    #[serde(default)]
    free_only: bool,
    limit: Option<usize>,
    min_price: Option<f64>,
    max_price: Option<f64>,
    min_beds: Option<u32>,
    property_type: Option<PropertyType>,
}

impl PropertiesQuery {
    fn criteria(&self) -> SearchCriteria {
        SearchCriteria {
            city: self.city.clone(),
            state: self.state.clone(),
            zip_code: self.zip.clone(),
            min_price: self.min_price,
            max_price: self.max_price,
            min_beds: self.min_beds,
            property_type: self.property_type,
            limit: self.limit,
        }
    }
}

/// Error body is always `{ "error": "..." }`.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    Unprocessable(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
            Self::Unprocessable(message) => (StatusCode::UNPROCESSABLE_ENTITY, message),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<CriteriaError> for ApiError {
    fn from(err: CriteriaError) -> Self {
        Self::BadRequest(err.to_string())
    }
}

impl From<AggregateError> for ApiError {
    fn from(err: AggregateError) -> Self {
        match err {
            AggregateError::Criteria(err) => err.into(),
        }
    }
}

impl From<ValuationError> for ApiError {
    fn from(err: ValuationError) -> Self {
        match err {
            ValuationError::NoComparables => Self::Unprocessable(err.to_string()),
            ValuationError::Search(err) => err.into(),
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/properties", get(properties_handler))
        .route("/api/valuation", post(valuation_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("REAP_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let state = AppState::from_config(&PipelineConfig::from_env())?;
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding port {port}"))?;
    info!(port, "reap web api listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn properties_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PropertiesQuery>,
) -> Result<Response, ApiError> {
    let criteria = query.criteria();
    let properties = if query.free_only {
        state.aggregator.search_free(&criteria).await?
    } else {
        state.aggregator.search_all(&criteria).await?
    };
    Ok(Json(properties).into_response())
}

/// Without supplied comparables the free sources around the subject provide them.
async fn valuation_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ValuationRequest>,
) -> Result<Response, ApiError> {
    let report = if request.comparables.is_empty() {
        state
            .valuation
            .value_from_market(&state.aggregator, request)
            .await
    } else {
        state.valuation.value(&request).await
    };
    match report {
        Ok(report) => Ok(Json(report).into_response()),
        Err(err) => {
            warn!(error = %err, "valuation rejected");
            Err(err.into())
        }
    }
}
