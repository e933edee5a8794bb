//! Usage accounting: every provider call records a row to `ai_model_usage` (§4.4).

use chrono::{DateTime, Utc};
use qntx_core::Error;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

pub struct UsageRecord {
    pub provider: String,
    pub model: String,
    pub operation: String,
    pub entity_tag: Option<String>,
    pub request_timestamp: DateTime<Utc>,
    pub response_timestamp: Option<DateTime<Utc>>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
    pub cost: Option<f64>,
    pub success: bool,
}

pub struct UsageRecorder {
    pool: SqlitePool,
}

impl UsageRecorder {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn record(&self, record: UsageRecord) -> qntx_core::Result<()> {
        sqlx::query(
            "INSERT INTO ai_model_usage (id, provider, model, operation, entity_tag, \
             request_timestamp, response_timestamp, prompt_tokens, completion_tokens, cost, success) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&record.provider)
        .bind(&record.model)
        .bind(&record.operation)
        .bind(&record.entity_tag)
        .bind(record.request_timestamp.to_rfc3339())
        .bind(record.response_timestamp.map(|t| t.to_rfc3339()))
        .bind(record.prompt_tokens)
        .bind(record.completion_tokens)
        .bind(record.cost)
        .bind(record.success)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Database(e))?;
        Ok(())
    }

    /// Total spend within `[start, end)` for the given scan window (day/week/month), scanning
    /// the `(success, request_timestamp)` partial index.
    pub async fn spend_since(&self, start: DateTime<Utc>) -> qntx_core::Result<f64> {
        let row: (Option<f64>,) = sqlx::query_as(
            "SELECT SUM(cost) FROM ai_model_usage WHERE success = 1 AND request_timestamp >= ?",
        )
        .bind(start.to_rfc3339())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Database(e))?;
        Ok(row.0.unwrap_or(0.0))
    }
}
