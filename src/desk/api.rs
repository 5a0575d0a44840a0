use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde::{Deserialize, Serialize};

use super::events::EventSource;
use super::gateway::MutationGateway;
use super::guides::GuideSelector;
use super::models::*;
use crate::errors::DeskError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub gateway: MutationGateway,
    /// `None` when no reasoning backend is configured.
    pub guides: Option<GuideSelector>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn shared(gateway: MutationGateway, guides: Option<GuideSelector>) -> SharedState {
        Arc::new(AppState { gateway, guides })
    }
}

// ── Request payload types ─────────────────────────────────────────────

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CreateTicketRequest {
    pub title: String,
    pub description: String,
    pub status: Option<String>,
    pub priority: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CreateCommentRequest {
    pub author: String,
    pub message: String,
}

#[derive(Deserialize)]
pub struct UpdateStatusRequest {
    pub status: String,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct ListQuery {
    pub status: Option<String>,
    pub priority: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct SelectGuideRequest {
    #[serde(alias = "issue_description")]
    pub issue: String,
}

#[derive(Serialize)]
pub struct TicketList {
    pub tickets: Vec<Ticket>,
    pub count: usize,
}

/// Parse an optional enum field; blank strings (as sent by empty `<select>`s)
/// count as absent.
pub fn parse_optional<T: FromStr<Err = String>>(value: Option<&str>) -> Result<Option<T>, ApiError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        Some(v) => v.parse().map(Some).map_err(ApiError::BadRequest),
        None => Ok(None),
    }
}

// ── Error handling ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Unavailable(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

impl From<DeskError> for ApiError {
    fn from(err: DeskError) -> Self {
        match err {
            DeskError::TicketNotFound { .. } => ApiError::NotFound(err.to_string()),
            DeskError::Validation { .. } => ApiError::BadRequest(err.to_string()),
            other => {
                tracing::error!(error = %other, "request failed");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/api/tickets", get(list_tickets).post(create_ticket))
        .route("/api/tickets/{id}", get(get_ticket).delete(delete_ticket))
        .route("/api/tickets/{id}/comments", post(add_comment))
        .route("/api/tickets/{id}/status", patch(update_status))
        .route("/api/guides/select", post(select_guide))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn list_tickets(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<TicketList>, ApiError> {
    let filter = TicketFilter {
        status: parse_optional(query.status.as_deref())?,
        priority: parse_optional(query.priority.as_deref())?,
    };
    let tickets = state.gateway.store().list_tickets_filtered(&filter)?;
    Ok(Json(TicketList {
        count: tickets.len(),
        tickets,
    }))
}

async fn create_ticket(
    State(state): State<SharedState>,
    Json(req): Json<CreateTicketRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let new = NewTicket {
        title: req.title,
        description: req.description,
        status: parse_optional(req.status.as_deref())?.unwrap_or_default(),
        priority: parse_optional(req.priority.as_deref())?.unwrap_or_default(),
    };
    let ticket = state.gateway.create_ticket(new, EventSource::Api)?;
    Ok((StatusCode::CREATED, Json(ticket)))
}

async fn get_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Json<Ticket>, ApiError> {
    match state.gateway.store().get_ticket(id)? {
        Some(ticket) => Ok(Json(ticket)),
        None => Err(DeskError::TicketNotFound { id }.into()),
    }
}

async fn add_comment(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let comment = state.gateway.add_comment(
        id,
        NewComment::new(req.author, req.message),
        EventSource::Api,
    )?;
    Ok((StatusCode::CREATED, Json(comment)))
}

async fn update_status(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateStatusRequest>,
) -> Result<Json<Ticket>, ApiError> {
    let status = TicketStatus::from_str(&req.status).map_err(ApiError::BadRequest)?;
    let ticket = state.gateway.update_status(id, status, EventSource::Api)?;
    Ok(Json(ticket))
}

async fn delete_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.gateway.delete_ticket(id, EventSource::Api)?;
    Ok(StatusCode::NO_CONTENT)
}

async fn select_guide(
    State(state): State<SharedState>,
    Json(req): Json<SelectGuideRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let Some(guides) = &state.guides else {
        return Err(ApiError::Unavailable(
            "No reasoning backend configured".to_string(),
        ));
    };
    if req.issue.trim().is_empty() {
        return Err(ApiError::BadRequest("Invalid issue: must not be empty".to_string()));
    }
    Ok(Json(guides.select(req.issue.trim()).await))
}
