//! Forward-only migration log (§4.1).
//!
//! Each migration is a named, idempotent SQL script identified by a monotonically increasing
//! sequence. `_qntx_migrations` records the sequences that have been applied; `apply_all`
//! refuses to start if a sequence recorded as applied is missing from [`MIGRATIONS`] — the
//! compiled binary would otherwise silently skip schema the running database already depends
//! on.

use crate::error::{from_sqlx, Result};
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

pub struct Migration {
    pub sequence: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

pub const MIGRATIONS: &[Migration] = &[
    Migration {
        sequence: 1,
        name: "attestations",
        sql: include_str!("../migrations/0001_attestations.sql"),
    },
    Migration {
        sequence: 2,
        name: "pulse_and_watchers",
        sql: include_str!("../migrations/0002_pulse_and_watchers.sql"),
    },
    Migration {
        sequence: 3,
        name: "auth_and_plugins",
        sql: include_str!("../migrations/0003_auth_and_plugins.sql"),
    },
];

pub async fn apply_all(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS _qntx_migrations (
            sequence INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL
        )"#,
    )
    .execute(pool)
    .await
    .map_err(from_sqlx)?;

    let applied: Vec<i64> = sqlx::query("SELECT sequence FROM _qntx_migrations ORDER BY sequence")
        .fetch_all(pool)
        .await
        .map_err(from_sqlx)?
        .into_iter()
        .map(|row| row.get::<i64, _>("sequence"))
        .collect();

    let known: std::collections::HashSet<i64> = MIGRATIONS.iter().map(|m| m.sequence).collect();
    for seq in &applied {
        if !known.contains(seq) {
            return Err(qntx_core::Error::corrupt(format!(
                "database has applied migration {} which is missing from the compiled migration set",
                seq
            )));
        }
    }

    let max_applied = applied.iter().copied().max().unwrap_or(0);
    for migration in MIGRATIONS.iter().filter(|m| m.sequence > max_applied) {
        info!(sequence = migration.sequence, name = migration.name, "applying migration");
        sqlx::query(migration.sql).execute(pool).await.map_err(from_sqlx)?;
        sqlx::query("INSERT INTO _qntx_migrations (sequence, name, applied_at) VALUES (?, ?, ?)")
            .bind(migration.sequence)
            .bind(migration.name)
            .bind(chrono::Utc::now().to_rfc3339())
            .execute(pool)
            .await
            .map_err(from_sqlx)?;
    }

    if max_applied >= MIGRATIONS.last().map(|m| m.sequence).unwrap_or(0) {
        warn!("no pending migrations");
    }

    Ok(())
}
