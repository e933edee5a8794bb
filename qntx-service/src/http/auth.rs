//! `/auth/*`: OAuth PKCE handshake, refresh rotation, logout, and session introspection (§4.8, §6).
//!
//! The OAuth code exchange itself is an external collaborator (§4.8) — the caller completes the
//! provider redirect and token exchange and hands this service the resulting provider identity;
//! this crate only issues the PKCE challenge and, on callback, mints the session and tokens.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use qntx_auth::{generate_pkce_pair, AuthUser};

use crate::state::AppState;

use super::error_response;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/auth/providers", get(providers))
        .route("/auth/oauth/:provider/url", post(oauth_url))
        .route("/auth/oauth/callback", post(oauth_callback))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/sessions", get(sessions))
        .route("/auth/me", get(me))
        .with_state(state)
}

#[derive(Serialize)]
struct ProviderInfo {
    name: &'static str,
}

async fn providers() -> impl IntoResponse {
    Json([ProviderInfo { name: "github" }, ProviderInfo { name: "google" }])
}

#[derive(Deserialize)]
pub struct OAuthUrlRequest {
    pub redirect_uri: String,
}

#[derive(Serialize)]
struct OAuthUrlResponse {
    state: String,
    code_challenge: String,
    code_challenge_method: &'static str,
}

async fn oauth_url(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Json(body): Json<OAuthUrlRequest>,
) -> impl IntoResponse {
    let oauth_state = uuid::Uuid::new_v4().to_string();
    let (code_verifier, code_challenge) = generate_pkce_pair();
    state.pkce.put(oauth_state.clone(), code_verifier, provider, body.redirect_uri).await;
    Json(OAuthUrlResponse { state: oauth_state, code_challenge, code_challenge_method: "S256" })
}

#[derive(Deserialize)]
pub struct OAuthCallbackRequest {
    pub state: String,
    pub provider_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub device_id: String,
}

#[derive(Serialize)]
struct TokenPair {
    access_token: String,
    refresh_token: String,
    session_id: String,
    user_id: String,
}

async fn oauth_callback(State(state): State<AppState>, Json(body): Json<OAuthCallbackRequest>) -> Response {
    let (_verifier, provider, _redirect_uri) = match state.pkce.take(&body.state).await {
        Ok(entry) => entry,
        Err(err) => return error_response(err),
    };

    let user = match state.auth_store.find_or_create_user(&provider, &body.provider_id, body.display_name.as_deref()).await {
        Ok(user) => user,
        Err(err) => return error_response(err),
    };
    let (session, refresh_token) = match state.auth_store.create_session(&user.id, &body.device_id).await {
        Ok(pair) => pair,
        Err(err) => return error_response(err),
    };
    let access_token = match state.token_codec.issue(&user.id, &session.id, &body.device_id) {
        Ok(token) => token,
        Err(err) => return error_response(err),
    };

    Json(TokenPair { access_token, refresh_token, session_id: session.id, user_id: user.id }).into_response()
}

#[derive(Deserialize)]
pub struct RefreshRequest {
    pub session_id: String,
    pub refresh_token: String,
}

async fn refresh(State(state): State<AppState>, Json(body): Json<RefreshRequest>) -> Response {
    let (session, refresh_token) = match state.auth_store.rotate_refresh_token(&body.session_id, &body.refresh_token).await {
        Ok(pair) => pair,
        Err(err) => return error_response(err),
    };
    let access_token = match state.token_codec.issue(&session.user_id, &session.id, &session.device_id) {
        Ok(token) => token,
        Err(err) => return error_response(err),
    };
    Json(TokenPair { access_token, refresh_token, session_id: session.id, user_id: session.user_id }).into_response()
}

async fn logout(State(state): State<AppState>, user: AuthUser) -> Response {
    match state.auth_store.revoke_session(&user.session_id).await {
        Ok(()) => axum::http::StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn sessions(State(state): State<AppState>, user: AuthUser) -> Response {
    match state.auth_store.list_sessions(&user.user_id).await {
        Ok(sessions) => Json(sessions).into_response(),
        Err(err) => error_response(err),
    }
}

async fn me(State(state): State<AppState>, user: AuthUser) -> Response {
    match state.auth_store.get_user(&user.user_id).await {
        Ok(user) => Json(user).into_response(),
        Err(err) => error_response(err),
    }
}
