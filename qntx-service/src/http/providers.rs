//! `/api/providers`: which LLM providers are currently enabled (§4.4, §6).

use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new().route("/api/providers", get(list)).with_state(state)
}

#[derive(Serialize)]
struct ProviderInfo {
    name: String,
}

async fn list(State(state): State<AppState>) -> impl IntoResponse {
    let providers: Vec<ProviderInfo> =
        state.providers.available().into_iter().map(|name| ProviderInfo { name: name.to_string() }).collect();
    Json(providers)
}
