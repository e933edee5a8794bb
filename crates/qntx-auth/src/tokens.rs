//! Access-token issuance and verification (§4.8). Access tokens are signed short-lived bearer
//! tokens carrying user id, session id, and device id; refresh rotates the refresh token and
//! issues a fresh access token.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use qntx_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// Access tokens are valid for 15 minutes.
pub const ACCESS_TOKEN_TTL_SECONDS: i64 = 15 * 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    pub sub: String,
    pub session_id: String,
    pub device_id: String,
    pub exp: usize,
    pub iat: usize,
}

pub struct TokenCodec {
    secret: Vec<u8>,
}

impl TokenCodec {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self { secret: secret.into() }
    }

    pub fn issue(&self, user_id: &str, session_id: &str, device_id: &str) -> Result<String> {
        let now = Utc::now();
        let claims = AccessClaims {
            sub: user_id.to_string(),
            session_id: session_id.to_string(),
            device_id: device_id.to_string(),
            iat: now.timestamp() as usize,
            exp: (now + Duration::seconds(ACCESS_TOKEN_TTL_SECONDS)).timestamp() as usize,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(&self.secret))
            .map_err(|e| Error::internal(format!("token signing failed: {e}")))
    }

    /// Verifies signature and expiry only; the caller (the [`crate::middleware`] extractor)
    /// checks revocation and the session's own `expires_at` against the store.
    pub fn verify(&self, token: &str) -> Result<AccessClaims> {
        decode::<AccessClaims>(token, &DecodingKey::from_secret(&self.secret), &Validation::default())
            .map(|data| data.claims)
            .map_err(|e| Error::unauthorized(format!("invalid access token: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_claims() {
        let codec = TokenCodec::new(b"test-secret".to_vec());
        let token = codec.issue("user-1", "sess-1", "device-1").unwrap();
        let claims = codec.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.session_id, "sess-1");
    }

    #[test]
    fn rejects_tampered_token() {
        let codec = TokenCodec::new(b"test-secret".to_vec());
        let mut token = codec.issue("user-1", "sess-1", "device-1").unwrap();
        token.push('x');
        assert!(codec.verify(&token).is_err());
    }

    #[test]
    fn rejects_token_signed_with_different_secret() {
        let codec_a = TokenCodec::new(b"secret-a".to_vec());
        let codec_b = TokenCodec::new(b"secret-b".to_vec());
        let token = codec_a.issue("user-1", "sess-1", "device-1").unwrap();
        assert!(codec_b.verify(&token).is_err());
    }
}
