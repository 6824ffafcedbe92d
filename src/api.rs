// src/api.rs
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::ingest::envelope::parse_api_datetime_str;
use crate::ingest::types::{Signal, SourceKind};
use crate::payload::{build_payload, DailyPayload};
use crate::pipeline::{PipelineRunner, RunOutcome};

/// Upper bound for `/signals?limit=`.
pub const MAX_LIMIT: usize = 500;

#[derive(Clone)]
pub struct AppState {
    runner: Arc<PipelineRunner>,
}

impl AppState {
    pub fn new(runner: Arc<PipelineRunner>) -> Self {
        Self { runner }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/signals", get(list_signals))
        .route("/payload", get(daily_payload))
        .route("/run", post(manual_run))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({ "error": self.1 }))).into_response()
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(e: E) -> Self {
        let e: anyhow::Error = e.into();
        warn!(target: "api", error = %format!("{e:#}"), "request failed");
        ApiError(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct SignalsQuery {
    source: Option<String>,
    limit: Option<usize>,
    hours: Option<i64>,
}

#[derive(Debug, Serialize)]
struct SignalsResp {
    since: NaiveDateTime,
    count: usize,
    signals: Vec<Signal>,
}

async fn list_signals(
    State(state): State<AppState>,
    Query(q): Query<SignalsQuery>,
) -> Result<Json<SignalsResp>, ApiError> {
    let settings = state.runner.settings();
    let hours = q
        .hours
        .unwrap_or(settings.storage.rolling_window_hours)
        .max(1);
    let since = Utc::now().naive_utc() - Duration::hours(hours);

    let source = match q.source.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        None => None,
        Some(raw) => match SourceKind::parse(raw) {
            SourceKind::Unknown => {
                return Err(ApiError(
                    StatusCode::BAD_REQUEST,
                    format!("unknown source {raw:?}"),
                ))
            }
            kind => Some(kind),
        },
    };
    let limit = q.limit.map(|l| l.clamp(1, MAX_LIMIT));

    let signals = state
        .runner
        .store()
        .get_signals_since(since, source, limit)
        .await?;
    Ok(Json(SignalsResp {
        since,
        count: signals.len(),
        signals,
    }))
}

#[derive(Debug, Deserialize)]
struct PayloadQuery {
    max: Option<usize>,
    sections: Option<bool>,
}

async fn daily_payload(
    State(state): State<AppState>,
    Query(q): Query<PayloadQuery>,
) -> Result<Json<DailyPayload>, ApiError> {
    let payload = build_payload(
        state.runner.settings(),
        state.runner.store(),
        q.max,
        q.sections.unwrap_or(true),
    )
    .await?;
    Ok(Json(payload))
}

#[derive(Debug, Deserialize)]
struct RunQuery {
    since: Option<String>,
}

async fn manual_run(
    State(state): State<AppState>,
    Query(q): Query<RunQuery>,
) -> Result<Response, ApiError> {
    let since = match q.since.as_deref() {
        None => None,
        Some(raw) => match parse_api_datetime_str(raw) {
            Some(at) => Some(at.timestamp()),
            None => {
                return Err(ApiError(
                    StatusCode::BAD_REQUEST,
                    format!("unparsable since {raw:?}"),
                ))
            }
        },
    };

    let outcome = state.runner.run_manual(since).await?;
    let message = outcome.message();
    let resp = match outcome {
        RunOutcome::Completed(summary) => {
            (StatusCode::OK, Json(json!({ "message": message, "summary": summary }))).into_response()
        }
        RunOutcome::Busy => {
            (StatusCode::CONFLICT, Json(json!({ "message": message }))).into_response()
        }
        RunOutcome::QuotaExhausted { .. } => {
            (StatusCode::TOO_MANY_REQUESTS, Json(json!({ "message": message }))).into_response()
        }
    };
    Ok(resp)
}
