//! User/session/credential persistence (§3/§4.8), against the `users`/`sessions`/
//! `webauthn_credentials` tables the attestation store's migration log creates.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use qntx_core::{Credential, Error, Result, Session, User};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use uuid::Uuid;

/// Sessions are valid for 30 days absent an explicit revoke.
pub const SESSION_TTL_DAYS: i64 = 30;

fn from_sqlx(e: sqlx::Error) -> Error {
    Error::Database(e)
}

/// Hashes a refresh token for storage. Refresh tokens are high-entropy random values, not
/// user-chosen secrets, so a plain salted digest (not a slow KDF like argon2) is appropriate —
/// mirrors how session/API tokens are typically hashed versus passwords.
pub fn hash_refresh_token(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(digest)
}

pub struct AuthStore {
    pool: SqlitePool,
}

impl AuthStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Finds or creates the user for `(provider, provider_id)` — idempotent on repeat OAuth
    /// logins from the same external identity.
    pub async fn find_or_create_user(
        &self,
        provider: &str,
        provider_id: &str,
        display_name: Option<&str>,
    ) -> Result<User> {
        if let Some(existing) = self.get_user_by_provider(provider, provider_id).await? {
            return Ok(existing);
        }
        let user = User {
            id: Uuid::new_v4().to_string(),
            provider: provider.to_string(),
            provider_id: provider_id.to_string(),
            display_name: display_name.map(|s| s.to_string()),
            created_at: Utc::now(),
        };
        let result = sqlx::query(
            "INSERT INTO users (id, provider, provider_id, display_name, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&user.id)
        .bind(&user.provider)
        .bind(&user.provider_id)
        .bind(&user.display_name)
        .bind(user.created_at.to_rfc3339())
        .execute(&self.pool)
        .await;
        match result {
            Ok(_) => Ok(user),
            // Unique-constraint race: another request created the same (provider, provider_id)
            // concurrently. Re-fetch rather than surfacing a spurious conflict.
            Err(sqlx::Error::Database(_)) => self
                .get_user_by_provider(provider, provider_id)
                .await?
                .ok_or_else(|| Error::internal("user insert raced but re-fetch found nothing")),
            Err(e) => Err(from_sqlx(e)),
        }
    }

    pub async fn get_user_by_provider(&self, provider: &str, provider_id: &str) -> Result<Option<User>> {
        let row = sqlx::query(
            "SELECT id, provider, provider_id, display_name, created_at FROM users WHERE provider = ? AND provider_id = ?",
        )
        .bind(provider)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;
        row.map(row_to_user).transpose()
    }

    pub async fn get_user(&self, id: &str) -> Result<User> {
        let row = sqlx::query("SELECT id, provider, provider_id, display_name, created_at FROM users WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        row.map(row_to_user).transpose()?.ok_or_else(|| Error::not_found(format!("user {id}")))
    }

    /// Creates a new session and returns `(session, raw_refresh_token)` — the raw token is
    /// handed to the caller exactly once and never persisted, only its hash.
    pub async fn create_session(&self, user_id: &str, device_id: &str) -> Result<(Session, String)> {
        let raw_refresh_token = Uuid::new_v4().to_string() + &Uuid::new_v4().to_string();
        let now = Utc::now();
        let session = Session {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            device_id: device_id.to_string(),
            refresh_token_hash: hash_refresh_token(&raw_refresh_token),
            created_at: now,
            expires_at: now + Duration::days(SESSION_TTL_DAYS),
            revoked: false,
        };
        sqlx::query(
            "INSERT INTO sessions (id, user_id, device_id, refresh_token_hash, created_at, expires_at, revoked) \
             VALUES (?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.device_id)
        .bind(&session.refresh_token_hash)
        .bind(session.created_at.to_rfc3339())
        .bind(session.expires_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok((session, raw_refresh_token))
    }

    pub async fn get_session(&self, id: &str) -> Result<Session> {
        let row = sqlx::query(
            "SELECT id, user_id, device_id, refresh_token_hash, created_at, expires_at, revoked FROM sessions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;
        row.map(row_to_session).transpose()?.ok_or_else(|| Error::not_found(format!("session {id}")))
    }

    /// Verifies `raw_refresh_token` against the stored hash and, on success, rotates it: the
    /// session's `refresh_token_hash` is replaced so the presented token cannot be reused.
    pub async fn rotate_refresh_token(&self, session_id: &str, raw_refresh_token: &str) -> Result<(Session, String)> {
        let session = self.get_session(session_id).await?;
        if session.revoked {
            return Err(Error::unauthorized("session revoked"));
        }
        if session.expires_at < Utc::now() {
            return Err(Error::unauthorized("session expired"));
        }
        if session.refresh_token_hash != hash_refresh_token(raw_refresh_token) {
            return Err(Error::unauthorized("refresh token mismatch"));
        }
        let new_raw = Uuid::new_v4().to_string() + &Uuid::new_v4().to_string();
        let new_hash = hash_refresh_token(&new_raw);
        sqlx::query("UPDATE sessions SET refresh_token_hash = ? WHERE id = ?")
            .bind(&new_hash)
            .bind(session_id)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        let mut updated = session;
        updated.refresh_token_hash = new_hash;
        Ok((updated, new_raw))
    }

    pub async fn list_sessions(&self, user_id: &str) -> Result<Vec<Session>> {
        let rows = sqlx::query(
            "SELECT id, user_id, device_id, refresh_token_hash, created_at, expires_at, revoked \
             FROM sessions WHERE user_id = ? ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;
        rows.into_iter().map(row_to_session).collect()
    }

    pub async fn revoke_session(&self, id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET revoked = 1 WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }

    pub async fn revoke_all_sessions(&self, user_id: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET revoked = 1 WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(())
    }

    pub async fn add_credential(&self, user_id: &str, public_key: Vec<u8>) -> Result<Credential> {
        let credential = Credential {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            public_key,
            sign_count: 0,
            backup_state: false,
            created_at: Utc::now(),
        };
        sqlx::query(
            "INSERT INTO webauthn_credentials (id, user_id, public_key, sign_count, backup_state, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&credential.id)
        .bind(&credential.user_id)
        .bind(&credential.public_key)
        .bind(credential.sign_count as i64)
        .bind(credential.backup_state as i64)
        .bind(credential.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;
        Ok(credential)
    }

    /// Accepts an already-verified WebAuthn assertion (the cryptographic ceremony itself is an
    /// external collaborator — see `DESIGN.md`) and advances the stored `sign_count`, rejecting
    /// a count that does not strictly increase as a cloned-authenticator signal.
    pub async fn accept_assertion(&self, credential_id: &str, new_sign_count: u32) -> Result<Credential> {
        let row = sqlx::query(
            "SELECT id, user_id, public_key, sign_count, backup_state, created_at FROM webauthn_credentials WHERE id = ?",
        )
        .bind(credential_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?;
        let credential = row.map(row_to_credential).transpose()?.ok_or_else(|| Error::not_found("credential"))?;
        if new_sign_count <= credential.sign_count && !(credential.sign_count == 0 && new_sign_count == 0) {
            return Err(Error::unauthorized("webauthn sign count did not increase"));
        }
        sqlx::query("UPDATE webauthn_credentials SET sign_count = ? WHERE id = ?")
            .bind(new_sign_count as i64)
            .bind(credential_id)
            .execute(&self.pool)
            .await
            .map_err(from_sqlx)?;
        Ok(Credential { sign_count: new_sign_count, ..credential })
    }
}

fn row_to_user(row: sqlx::sqlite::SqliteRow) -> Result<User> {
    Ok(User {
        id: row.get("id"),
        provider: row.get("provider"),
        provider_id: row.get("provider_id"),
        display_name: row.get("display_name"),
        created_at: parse_ts(row.get("created_at"))?,
    })
}

fn row_to_session(row: sqlx::sqlite::SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        device_id: row.get("device_id"),
        refresh_token_hash: row.get("refresh_token_hash"),
        created_at: parse_ts(row.get("created_at"))?,
        expires_at: parse_ts(row.get("expires_at"))?,
        revoked: row.get::<i64, _>("revoked") != 0,
    })
}

fn row_to_credential(row: sqlx::sqlite::SqliteRow) -> Result<Credential> {
    Ok(Credential {
        id: row.get("id"),
        user_id: row.get("user_id"),
        public_key: row.get("public_key"),
        sign_count: row.get::<i64, _>("sign_count") as u32,
        backup_state: row.get::<i64, _>("backup_state") != 0,
        created_at: parse_ts(row.get("created_at"))?,
    })
}

fn parse_ts(raw: String) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::corrupt(format!("bad timestamp {raw:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use qntx_store::Store;

    async fn pool() -> SqlitePool {
        Store::in_memory().await.unwrap().pool()
    }

    #[tokio::test]
    async fn find_or_create_is_idempotent() {
        let store = AuthStore::new(pool().await);
        let a = store.find_or_create_user("github", "123", Some("alice")).await.unwrap();
        let b = store.find_or_create_user("github", "123", Some("alice")).await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn refresh_rotation_rejects_reused_token() {
        let store = AuthStore::new(pool().await);
        let user = store.find_or_create_user("github", "1", None).await.unwrap();
        let (session, raw) = store.create_session(&user.id, "device-1").await.unwrap();
        let (_, _new_raw) = store.rotate_refresh_token(&session.id, &raw).await.unwrap();
        assert!(store.rotate_refresh_token(&session.id, &raw).await.is_err());
    }

    #[tokio::test]
    async fn revoked_session_rejects_refresh() {
        let store = AuthStore::new(pool().await);
        let user = store.find_or_create_user("github", "1", None).await.unwrap();
        let (session, raw) = store.create_session(&user.id, "device-1").await.unwrap();
        store.revoke_session(&session.id).await.unwrap();
        assert!(store.rotate_refresh_token(&session.id, &raw).await.is_err());
    }
}
