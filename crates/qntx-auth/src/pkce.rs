//! In-process OAuth PKCE state with a 10-minute TTL (§4.8). The web UI's OAuth flow is an
//! external collaborator (§1); this crate only holds the verifier between the authorize
//! redirect and the callback.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use qntx_core::{Error, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

const TTL_MINUTES: i64 = 10;

/// Generates a fresh `(code_verifier, code_challenge)` pair for the PKCE S256 method (RFC 7636).
pub fn generate_pkce_pair() -> (String, String) {
    let verifier = Uuid::new_v4().to_string() + &Uuid::new_v4().to_string();
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(digest);
    (verifier, challenge)
}

#[derive(Debug, Clone)]
struct Entry {
    code_verifier: String,
    provider: String,
    redirect_uri: String,
    created_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct PkceStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl PkceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, state: impl Into<String>, code_verifier: impl Into<String>, provider: impl Into<String>, redirect_uri: impl Into<String>) {
        let mut guard = self.entries.lock().await;
        self.evict_expired_locked(&mut guard);
        guard.insert(
            state.into(),
            Entry {
                code_verifier: code_verifier.into(),
                provider: provider.into(),
                redirect_uri: redirect_uri.into(),
                created_at: Utc::now(),
            },
        );
    }

    /// Consumes the entry for `state` — single use, like the OAuth `state` parameter it backs.
    pub async fn take(&self, state: &str) -> Result<(String, String, String)> {
        let mut guard = self.entries.lock().await;
        self.evict_expired_locked(&mut guard);
        let entry = guard.remove(state).ok_or_else(|| Error::invalid_input("unknown or expired oauth state"))?;
        Ok((entry.code_verifier, entry.provider, entry.redirect_uri))
    }

    fn evict_expired_locked(&self, guard: &mut HashMap<String, Entry>) {
        let cutoff = Utc::now() - Duration::minutes(TTL_MINUTES);
        guard.retain(|_, entry| entry.created_at >= cutoff);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn take_is_single_use() {
        let store = PkceStore::new();
        store.put("state-1", "verifier", "github", "https://app/callback").await;
        let (verifier, provider, redirect) = store.take("state-1").await.unwrap();
        assert_eq!(verifier, "verifier");
        assert_eq!(provider, "github");
        assert_eq!(redirect, "https://app/callback");
        assert!(store.take("state-1").await.is_err());
    }

    #[tokio::test]
    async fn unknown_state_rejected() {
        let store = PkceStore::new();
        assert!(store.take("nope").await.is_err());
    }
}
