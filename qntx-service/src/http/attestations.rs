//! `/api/attestations`: create and list attestations (§6).

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use qntx_core::Attestation;

use crate::state::AppState;

use super::error_response;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/attestations", post(create).get(list))
        .with_state(state)
}

#[derive(Deserialize)]
pub struct CreateAttestation {
    pub subjects: Vec<String>,
    pub predicates: Vec<String>,
    pub contexts: Vec<String>,
    pub actors: Vec<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub attributes: Option<std::collections::HashMap<String, serde_json::Value>>,
}

#[derive(Serialize)]
struct CreateResponse {
    id: String,
}

async fn create(State(state): State<AppState>, Json(body): Json<CreateAttestation>) -> Response {
    let attestation = Attestation {
        id: String::new(),
        subjects: body.subjects,
        predicates: body.predicates,
        contexts: body.contexts,
        actors: body.actors,
        timestamp: Utc::now(),
        source: body.source.unwrap_or_else(|| "api".to_string()),
        attributes: body.attributes,
    };

    match state.store.create(&attestation).await {
        Ok(id) => {
            if let Ok(stored) = state.store.get(&id).await {
                let _ = state.watchers.on_attestation(&stored).await;
            }
            state.events.publish(qntx_events::QntxEvent::AttestationCreated { id: id.clone() });
            (axum::http::StatusCode::CREATED, Json(CreateResponse { id })).into_response()
        }
        Err(err) => error_response(err),
    }
}

#[derive(Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub limit: Option<i64>,
}

async fn list(State(state): State<AppState>, Query(params): Query<ListParams>) -> Response {
    let filter = qntx_core::AxFilter {
        limit: params.limit,
        ..Default::default()
    };
    match state.store.query(&filter).await {
        Ok(attestations) => Json(attestations).into_response(),
        Err(err) => error_response(err),
    }
}
