//! HTML form boundary. Same gateway as the JSON API; every successful post
//! answers with a 303 redirect, to the ticket page after a comment and to
//! the index otherwise.

use axum::{
    Form, Router,
    extract::{Path, State},
    response::Redirect,
    routing::post,
};
use serde::Deserialize;

use super::api::{ApiError, SharedState, parse_optional};
use super::events::EventSource;
use super::models::*;
use super::seed;

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct TicketForm {
    pub title: String,
    pub description: String,
    pub status: Option<String>,
    pub priority: Option<String>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
pub struct CommentForm {
    pub author: String,
    pub message: String,
}

pub fn form_router() -> Router<SharedState> {
    Router::new()
        .route("/", post(create_ticket))
        .route("/ticket/{id}", post(add_comment))
        .route("/ticket/{id}/delete", post(delete_ticket))
        .route("/seed", post(seed_store))
}

async fn create_ticket(
    State(state): State<SharedState>,
    Form(form): Form<TicketForm>,
) -> Result<Redirect, ApiError> {
    let new = NewTicket {
        title: form.title,
        description: form.description,
        status: parse_optional(form.status.as_deref())?.unwrap_or_default(),
        priority: parse_optional(form.priority.as_deref())?.unwrap_or_default(),
    };
    state.gateway.create_ticket(new, EventSource::Ui)?;
    Ok(Redirect::to("/"))
}

async fn add_comment(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
    Form(form): Form<CommentForm>,
) -> Result<Redirect, ApiError> {
    state
        .gateway
        .add_comment(id, NewComment::new(form.author, form.message), EventSource::Ui)?;
    Ok(Redirect::to(&format!("/ticket/{}", id)))
}

async fn delete_ticket(
    State(state): State<SharedState>,
    Path(id): Path<i64>,
) -> Result<Redirect, ApiError> {
    state.gateway.delete_ticket(id, EventSource::Ui)?;
    Ok(Redirect::to("/"))
}

async fn seed_store(State(state): State<SharedState>) -> Result<Redirect, ApiError> {
    seed::seed(&state.gateway)?;
    Ok(Redirect::to("/"))
}
