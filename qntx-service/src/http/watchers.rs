//! `/api/watchers`: standing rules that fire actions on matching attestations (§4.6, §6).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{patch, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use qntx_core::{AxFilter, Watcher, WatcherActionType};

use crate::state::AppState;

use super::error_response;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/watchers", post(create).get(list))
        .route("/api/watchers/:id", patch(set_enabled))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct CreateRequest {
    pub name: String,
    pub filter: AxFilter,
    pub action_type: String,
    pub action_data: serde_json::Value,
    #[serde(default = "default_max_fires")]
    pub max_fires_per_minute: i64,
    #[serde(default)]
    pub semantic_query: Option<String>,
    #[serde(default)]
    pub semantic_threshold: Option<f64>,
}

fn default_max_fires() -> i64 {
    10
}

#[derive(Serialize)]
struct CreateResponse {
    id: String,
}

async fn create(State(state): State<AppState>, Json(body): Json<CreateRequest>) -> Response {
    let action_type = match body.action_type.as_str() {
        "script" => WatcherActionType::Script,
        "webhook" => WatcherActionType::Webhook,
        "semantic" => WatcherActionType::Semantic,
        other => return error_response(qntx_core::Error::invalid_input(format!("unknown action type {other}"))),
    };

    let watcher = Watcher {
        id: String::new(),
        name: body.name,
        filter: body.filter,
        action_type,
        action_data: body.action_data,
        max_fires_per_minute: body.max_fires_per_minute,
        enabled: true,
        fire_count: 0,
        error_count: 0,
        last_fired_at: None,
        last_error: None,
        semantic_query: body.semantic_query,
        semantic_threshold: body.semantic_threshold,
    };

    match state.watchers.create_watcher(&watcher).await {
        Ok(id) => (axum::http::StatusCode::CREATED, Json(CreateResponse { id })).into_response(),
        Err(err) => error_response(err),
    }
}

async fn list(State(state): State<AppState>) -> Response {
    match state.watchers.list_watchers().await {
        Ok(watchers) => Json(watchers).into_response(),
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct SetEnabledRequest {
    pub enabled: bool,
}

async fn set_enabled(State(state): State<AppState>, Path(id): Path<String>, Json(body): Json<SetEnabledRequest>) -> Response {
    match state.watchers.set_enabled(&id, body.enabled).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}
