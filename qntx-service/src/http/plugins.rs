//! `/api/plugins`: plugin inventory and config-schema introspection (§4.7, §6). The proxy routes
//! themselves are mounted separately via `qntx_plugin_host::http_bridge::router`.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

use super::error_response;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/plugins", get(list))
        .route("/api/plugins/:name/config-schema", get(config_schema))
        .with_state(state)
}

async fn list(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.plugin_host.snapshot_all().await)
}

#[derive(Serialize)]
struct ConfigField {
    field_type: String,
    description: String,
    default_value: String,
    required: bool,
}

#[derive(Serialize)]
struct ConfigSchema {
    fields: std::collections::HashMap<String, ConfigField>,
}

async fn config_schema(State(state): State<AppState>, Path(name): Path<String>) -> Response {
    match state.plugin_host.config_schema(&name).await {
        Ok(schema) => {
            let fields = schema
                .fields
                .into_iter()
                .map(|(k, v)| {
                    (
                        k,
                        ConfigField {
                            field_type: v.field_type,
                            description: v.description,
                            default_value: v.default_value,
                            required: v.required,
                        },
                    )
                })
                .collect();
            Json(ConfigSchema { fields }).into_response()
        }
        Err(err) => error_response(err),
    }
}
