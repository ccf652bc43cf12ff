//! REST surface: intake validation, campaign operations, manual dispatch and
//! the inbound reply webhook.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};
use uuid::Uuid;

use crate::campaigns::model::{CampaignFilter, CampaignPage, CampaignSummary, NewCampaign};
use crate::contacts::intake::{ContactSheet, IntakeMode, ValidationResult, write_contacts_csv};
use crate::engine::Engine;
use crate::error::{CampaignError, DatabaseError};
use crate::replies::InboundMessage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

/// Build the Axum router.
pub fn api_routes(engine: Arc<Engine>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/api/intake/validate", post(validate_intake))
        .route("/api/campaigns", get(list_campaigns).post(create_campaign))
        .route("/api/campaigns/{id}", get(get_campaign).delete(delete_campaign))
        .route("/api/campaigns/{id}/pause", post(pause_campaign))
        .route("/api/campaigns/{id}/resume", post(resume_campaign))
        .route("/api/campaigns/{id}/duplicate", post(duplicate_campaign))
        .route("/api/campaigns/{id}/retry", post(retry_campaign))
        .route("/api/dispatch/run", post(run_dispatch))
        .route("/api/inbound", post(inbound))
        .layer(cors)
        .with_state(AppState { engine })
}

// ── Errors ──────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Busy(String),
    Internal(String),
}

impl From<CampaignError> for ApiError {
    fn from(e: CampaignError) -> Self {
        match e {
            CampaignError::NotFound { .. } => ApiError::NotFound(e.to_string()),
            CampaignError::InvalidTransition { .. } => ApiError::Conflict(e.to_string()),
            CampaignError::Busy { .. } => ApiError::Busy(e.to_string()),
            CampaignError::Invalid(_) => ApiError::BadRequest(e.to_string()),
            CampaignError::Database(db) => db.into(),
        }
    }
}

impl From<DatabaseError> for ApiError {
    fn from(e: DatabaseError) -> Self {
        match e {
            DatabaseError::Constraint(_) => ApiError::Conflict(e.to_string()),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m),
            ApiError::Busy(m) => (StatusCode::TOO_MANY_REQUESTS, m),
            ApiError::Internal(m) => {
                error!("Request failed: {m}");
                (StatusCode::INTERNAL_SERVER_ERROR, m)
            }
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

fn parse_id(id: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(id).map_err(|_| ApiError::BadRequest(format!("Invalid campaign ID: {id}")))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "sms-drip"
    }))
}

// ── Intake ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct IntakeQuery {
    mode: Option<String>,
}

#[derive(Serialize)]
struct IntakeResponse {
    #[serde(flatten)]
    result: ValidationResult,
    #[serde(skip_serializing_if = "Option::is_none")]
    cleaned_csv: Option<String>,
}

async fn validate_intake(
    State(state): State<AppState>,
    Query(query): Query<IntakeQuery>,
    body: Bytes,
) -> Result<Json<IntakeResponse>, ApiError> {
    let mode = match query.mode.as_deref() {
        Some(m) => m.parse::<IntakeMode>().map_err(ApiError::BadRequest)?,
        None => IntakeMode::Validate,
    };
    let sheet = ContactSheet::from_csv(&body).map_err(|e| ApiError::BadRequest(e.to_string()))?;
    let result = state.engine.intake.validate(&sheet, mode);

    let cleaned_csv = match &result.cleaned {
        Some(contacts) => Some(write_contacts_csv(contacts).map_err(|e| ApiError::Internal(e.to_string()))?),
        None => None,
    };
    Ok(Json(IntakeResponse { result, cleaned_csv }))
}

// ── Campaigns ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CampaignListResponse {
    #[serde(flatten)]
    page: CampaignPage,
    summary: CampaignSummary,
}

async fn list_campaigns(
    State(state): State<AppState>,
    Query(filter): Query<CampaignFilter>,
) -> Result<impl IntoResponse, ApiError> {
    let manager = &state.engine.campaigns;
    let page = manager.list_campaigns(&filter).await?;
    let summary = manager.summary().await?;
    Ok(Json(CampaignListResponse { page, summary }))
}

async fn create_campaign(
    State(state): State<AppState>,
    Json(new): Json<NewCampaign>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.engine.campaigns.create_campaign(new, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn get_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let detail = state.engine.campaigns.campaign_detail(parse_id(&id)?).await?;
    Ok(Json(detail))
}

async fn pause_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let campaign = state.engine.campaigns.pause(parse_id(&id)?, Utc::now()).await?;
    Ok(Json(campaign))
}

async fn resume_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let campaign = state.engine.campaigns.resume(parse_id(&id)?, Utc::now()).await?;
    Ok(Json(campaign))
}

async fn delete_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    state.engine.campaigns.delete(parse_id(&id)?, Utc::now()).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
struct DuplicateRequest {
    name: Option<String>,
}

async fn duplicate_campaign(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_id(&id)?;
    let request: DuplicateRequest = if body.is_empty() {
        DuplicateRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::BadRequest(format!("Invalid body: {e}")))?
    };
    let created = state
        .engine
        .campaigns
        .duplicate(id, request.name, Utc::now())
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn retry_campaign(State(state): State<AppState>, Path(id): Path<String>) -> Result<impl IntoResponse, ApiError> {
    let queued = state.engine.campaigns.retry_failed(parse_id(&id)?, Utc::now()).await?;
    Ok(Json(serde_json::json!({"queued": queued})))
}

// ── Dispatch & replies ──────────────────────────────────────────────────

#[derive(Deserialize)]
struct DispatchQuery {
    campaign_id: Option<String>,
}

async fn run_dispatch(
    State(state): State<AppState>,
    Query(query): Query<DispatchQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let dispatcher = &state.engine.dispatcher;
    let report = match query.campaign_id.as_deref() {
        Some(id) => dispatcher.run_campaign(parse_id(id)?, Utc::now()).await?,
        None => dispatcher.run_due_batch(Utc::now()).await?,
    };
    info!(sent = report.sent, failed = report.failed, "Manual dispatch finished");
    Ok(Json(report))
}

async fn inbound(
    State(state): State<AppState>,
    Json(message): Json<InboundMessage>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.engine.replies.on_inbound(&message).await?;
    Ok(Json(outcome))
}
