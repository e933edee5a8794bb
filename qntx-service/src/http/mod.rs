//! HTTP route composition: one module per API area (§6), assembled by [`build_router`] into the
//! single [`axum::Router`] `main` hands to [`qntx_http::HttpServer`].

pub mod attestations;
pub mod auth;
pub mod chat;
pub mod jobs;
pub mod plugins;
pub mod providers;
pub mod query;
pub mod scheduled;
pub mod watchers;
pub mod ws;

use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{http::StatusCode, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// The shape every HTTP error response takes (§7): a stable code, a short message, and an
/// optional next step. Never includes a stack trace.
#[derive(Serialize)]
pub struct ApiError {
    pub code: &'static str,
    pub message: String,
    pub suggestion: Option<&'static str>,
}

/// Maps a `qntx_core::Error` onto a status code and [`ApiError`] body, the one place every
/// handler in this crate funnels its errors through.
pub fn error_response(err: qntx_core::Error) -> Response {
    let (status, code, suggestion) = match &err {
        qntx_core::Error::NotFound(_) => (StatusCode::NOT_FOUND, "not_found", None),
        qntx_core::Error::Conflict(_) => (StatusCode::CONFLICT, "conflict", None),
        qntx_core::Error::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input", None),
        qntx_core::Error::Unauthorized(_) => {
            (StatusCode::UNAUTHORIZED, "unauthorized", Some("sign in again"))
        }
        qntx_core::Error::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden", None),
        qntx_core::Error::Upstream(_) => (StatusCode::BAD_GATEWAY, "upstream_error", Some("try again shortly")),
        qntx_core::Error::Cancelled => (StatusCode::REQUEST_TIMEOUT, "cancelled", None),
        qntx_core::Error::Capacity(_) => (StatusCode::TOO_MANY_REQUESTS, "capacity", Some("retry later")),
        qntx_core::Error::Corrupt(_) => (StatusCode::INTERNAL_SERVER_ERROR, "corrupt_data", None),
        qntx_core::Error::WithDetail { .. } => {
            let message = err.to_string();
            return not_top_level_error_response(err, message);
        }
        qntx_core::Error::Io(_) | qntx_core::Error::Serialization(_) | qntx_core::Error::Database(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
        }
        qntx_core::Error::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None),
    };
    (status, Json(ApiError { code, message: err.to_string(), suggestion })).into_response()
}

/// `WithDetail` wraps a source error one layer at a time; unwrap down to the original kind to
/// pick the right status code, but keep the top-level message (with its added context) in the body.
fn not_top_level_error_response(err: qntx_core::Error, message: String) -> Response {
    let mut cursor = &err;
    let (status, code, suggestion) = loop {
        match cursor {
            qntx_core::Error::WithDetail { source, .. } => cursor = source,
            qntx_core::Error::NotFound(_) => break (StatusCode::NOT_FOUND, "not_found", None),
            qntx_core::Error::Conflict(_) => break (StatusCode::CONFLICT, "conflict", None),
            qntx_core::Error::InvalidInput(_) => break (StatusCode::BAD_REQUEST, "invalid_input", None),
            qntx_core::Error::Unauthorized(_) => {
                break (StatusCode::UNAUTHORIZED, "unauthorized", Some("sign in again"))
            }
            qntx_core::Error::Forbidden(_) => break (StatusCode::FORBIDDEN, "forbidden", None),
            qntx_core::Error::Upstream(_) => {
                break (StatusCode::BAD_GATEWAY, "upstream_error", Some("try again shortly"))
            }
            qntx_core::Error::Cancelled => break (StatusCode::REQUEST_TIMEOUT, "cancelled", None),
            qntx_core::Error::Capacity(_) => {
                break (StatusCode::TOO_MANY_REQUESTS, "capacity", Some("retry later"))
            }
            _ => break (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None),
        }
    };
    (status, Json(ApiError { code, message, suggestion })).into_response()
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(attestations::router(state.clone()))
        .merge(query::router(state.clone()))
        .merge(jobs::router(state.clone()))
        .merge(scheduled::router(state.clone()))
        .merge(watchers::router(state.clone()))
        .merge(providers::router(state.clone()))
        .merge(chat::router(state.clone()))
        .merge(plugins::router(state.clone()))
        .merge(auth::router(state.clone()))
        .merge(ws::router(state.clone()))
        .merge(qntx_plugin_host::http_bridge::router(state.plugin_host.clone()))
}

async fn health() -> &'static str {
    "ok"
}
