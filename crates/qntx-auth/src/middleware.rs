//! Auth middleware: an axum extractor that verifies an access token's signature, expiry, and
//! that its session is neither revoked nor expired (§4.8).

use crate::store::AuthStore;
use crate::tokens::TokenCodec;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts, StatusCode};
use std::sync::Arc;

/// Anything the extractor needs from the application's shared state.
pub trait AuthContext {
    fn token_codec(&self) -> &TokenCodec;
    fn auth_store(&self) -> &AuthStore;
}

impl<T: AuthContext> AuthContext for Arc<T> {
    fn token_codec(&self) -> &TokenCodec {
        (**self).token_codec()
    }
    fn auth_store(&self) -> &AuthStore {
        (**self).auth_store()
    }
}

/// The authenticated identity attached to a request after signature, expiry, and
/// revocation checks all pass.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
    pub session_id: String,
    pub device_id: String,
}

fn bearer_token(parts: &Parts) -> Option<String> {
    parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|s| s.to_string())
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: AuthContext + Send + Sync,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or((StatusCode::UNAUTHORIZED, "missing bearer token".to_string()))?;
        let claims = state
            .token_codec()
            .verify(&token)
            .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;

        let session = state
            .auth_store()
            .get_session(&claims.session_id)
            .await
            .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;

        if session.revoked {
            return Err((StatusCode::UNAUTHORIZED, "session revoked".to_string()));
        }
        if session.expires_at < chrono::Utc::now() {
            return Err((StatusCode::UNAUTHORIZED, "session expired".to_string()));
        }
        if session.user_id != claims.sub || session.device_id != claims.device_id {
            return Err((StatusCode::FORBIDDEN, "token does not match session".to_string()));
        }

        Ok(AuthUser { user_id: claims.sub, session_id: claims.session_id, device_id: claims.device_id })
    }
}
