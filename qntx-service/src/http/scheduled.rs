//! `/api/scheduled`: recurring job definitions materialized into async jobs by the Pulse ticker (§3, §6).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::state::AppState;

use super::error_response;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/scheduled", post(create).get(list))
        .route("/api/scheduled/:id", patch(set_state))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct CreateRequest {
    pub ats_code: String,
    pub interval_seconds: i64,
    pub handler_name: String,
    pub payload: serde_json::Value,
    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Serialize)]
struct CreateResponse {
    id: String,
}

async fn create(State(state): State<AppState>, Json(body): Json<CreateRequest>) -> Response {
    match state
        .scheduled
        .create(&body.ats_code, body.interval_seconds, &body.handler_name, body.payload, body.source_url.as_deref())
        .await
    {
        Ok(id) => (axum::http::StatusCode::CREATED, Json(CreateResponse { id })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn list(State(state): State<AppState>) -> Response {
    match state.scheduled.list().await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct SetStateRequest {
    pub active: bool,
}

async fn set_state(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<SetStateRequest>) -> Response {
    match state.scheduled.set_state(&id, body.active).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}
