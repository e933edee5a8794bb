//! `/api/query`: run an [`qntx_core::AxFilter`] against the store (§4.1/§6).

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use qntx_core::AxFilter;

use crate::state::AppState;

use super::error_response;

pub fn router(state: AppState) -> Router {
    Router::new().route("/api/query", post(query)).with_state(state)
}

#[derive(Deserialize)]
pub struct QueryRequest {
    #[serde(flatten)]
    pub filter: AxFilter,
    #[serde(default)]
    pub search: Option<String>,
}

async fn query(State(state): State<AppState>, Json(body): Json<QueryRequest>) -> Response {
    if let Some(text) = body.search {
        let k = body.filter.limit.unwrap_or(20) as usize;
        return match state.store.search(&text, k).await {
            Ok(matches) => Json(matches).into_response(),
            Err(err) => error_response(err),
        };
    }

    match state.store.query(&body.filter).await {
        Ok(attestations) => Json(attestations).into_response(),
        Err(err) => error_response(err),
    }
}
