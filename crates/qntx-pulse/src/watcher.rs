//! WatcherEngine: matches new attestations against registered watchers and fires their actions
//! (§4.6). One watcher's attestations are processed serially (per watcher, per the order they
//! arrive); distinct watchers run independently and a failure in one never affects another.

use chrono::{DateTime, Utc};
use qntx_core::{Attestation, AxFilter, Error, Result, Watcher, WatcherActionType};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};
use uuid::Uuid;

const RATE_LIMIT_WINDOW: Duration = Duration::from_secs(60);
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);
const WEBHOOK_MAX_RETRIES: u32 = 1;

/// True if `attestation` independently satisfies every clause of `filter`, using the same
/// set-disjunctive/axis-conjunctive semantics as the store's SQL query path (§4.1), applied
/// in-memory against one already-known attestation rather than scanning the database.
pub fn matches_filter(attestation: &Attestation, filter: &AxFilter) -> bool {
    fn axis_matches(values: &[String], axis: &[String], case_insensitive: bool) -> bool {
        if values.is_empty() {
            return true;
        }
        values.iter().any(|v| {
            axis.iter().any(|a| {
                if case_insensitive {
                    a.eq_ignore_ascii_case(v)
                } else {
                    a == v
                }
            })
        })
    }

    if !axis_matches(&filter.subjects, &attestation.subjects, false) {
        return false;
    }
    if !axis_matches(&filter.predicates, &attestation.predicates, false) {
        return false;
    }
    if !axis_matches(&filter.contexts, &attestation.contexts, true) {
        return false;
    }
    if !axis_matches(&filter.actors, &attestation.actors, false) {
        return false;
    }
    if let Some(start) = filter.time_start {
        if attestation.timestamp < start {
            return false;
        }
    }
    if let Some(end) = filter.time_end {
        if attestation.timestamp > end {
            return false;
        }
    }
    true
}

/// Per-watcher sliding-window fire counter, guarded by its own mutex so concurrent fire
/// attempts across watchers never contend on a shared lock (§5).
#[derive(Default)]
struct RateLimiter {
    windows: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
}

impl RateLimiter {
    /// Returns true if firing now would stay within `max_per_minute` and records the fire.
    /// Returns false (and does not record) if the limit is already reached.
    async fn try_fire(&self, watcher_id: &str, max_per_minute: i64) -> bool {
        let mut guard = self.windows.lock().await;
        let window = guard.entry(watcher_id.to_string()).or_default();
        let cutoff = Utc::now() - chrono::Duration::from_std(RATE_LIMIT_WINDOW).unwrap();
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }
        if window.len() as i64 >= max_per_minute {
            return false;
        }
        window.push_back(Utc::now());
        true
    }
}

/// Anything the engine needs to dispatch a `script` action. Typically a thin wrapper around
/// [`crate::handler::HandlerRegistry`] / [`crate::async_jobs::AsyncJobs::submit`].
#[async_trait::async_trait]
pub trait ScriptDispatcher: Send + Sync {
    async fn dispatch(&self, watcher: &Watcher, attestation: &Attestation) -> Result<()>;
}

/// Anything the engine needs to compute an embedding similarity for a `semantic` action.
#[async_trait::async_trait]
pub trait SemanticMatcher: Send + Sync {
    /// Cosine similarity between the attestation's embedding and the watcher's query embedding.
    async fn similarity(&self, watcher: &Watcher, attestation: &Attestation) -> Result<f64>;
}

pub struct WatcherEngine {
    pool: SqlitePool,
    http: reqwest::Client,
    rate_limiter: RateLimiter,
    dropped_count: std::sync::atomic::AtomicU64,
    script_dispatcher: Option<Arc<dyn ScriptDispatcher>>,
    semantic_matcher: Option<Arc<dyn SemanticMatcher>>,
}

impl WatcherEngine {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            http: reqwest::Client::builder().timeout(WEBHOOK_TIMEOUT).build().expect("http client"),
            rate_limiter: RateLimiter::default(),
            dropped_count: std::sync::atomic::AtomicU64::new(0),
            script_dispatcher: None,
            semantic_matcher: None,
        }
    }

    pub fn with_script_dispatcher(mut self, dispatcher: Arc<dyn ScriptDispatcher>) -> Self {
        self.script_dispatcher = Some(dispatcher);
        self
    }

    pub fn with_semantic_matcher(mut self, matcher: Arc<dyn SemanticMatcher>) -> Self {
        self.semantic_matcher = Some(matcher);
        self
    }

    /// Count of matches suppressed by the rate limiter (not surfaced as an error, §4.6).
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Evaluates every enabled watcher against `attestation` and fires the ones that match.
    /// Distinct watchers dispatch concurrently; failures in one do not affect the others.
    pub async fn on_attestation(&self, attestation: &Attestation) -> Result<()> {
        let watchers = self.load_enabled_watchers().await?;
        let matching: Vec<Watcher> = watchers.into_iter().filter(|w| matches_filter(attestation, &w.filter)).collect();

        let mut handles = Vec::new();
        for watcher in matching {
            handles.push(self.evaluate_one(watcher, attestation.clone()));
        }
        futures::future::join_all(handles).await;
        Ok(())
    }

    async fn evaluate_one(&self, watcher: Watcher, attestation: Attestation) {
        if watcher.action_type == WatcherActionType::Semantic {
            match self.check_semantic(&watcher, &attestation).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    warn!(watcher_id = %watcher.id, error = %e, "semantic similarity check failed");
                    return;
                }
            }
        }

        if !self.rate_limiter.try_fire(&watcher.id, watcher.max_fires_per_minute).await {
            self.dropped_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            debug!(watcher_id = %watcher.id, "watcher rate-limited, dropping fire");
            return;
        }

        let result = self.dispatch(&watcher, &attestation).await;
        if let Err(e) = self.record_outcome(&watcher.id, &result).await {
            error!(watcher_id = %watcher.id, error = %e, "failed to persist watcher fire outcome");
        }
    }

    async fn check_semantic(&self, watcher: &Watcher, attestation: &Attestation) -> Result<bool> {
        let Some(matcher) = &self.semantic_matcher else {
            return Ok(false);
        };
        let threshold = watcher.semantic_threshold.unwrap_or(0.0);
        let similarity = matcher.similarity(watcher, attestation).await?;
        Ok(similarity >= threshold)
    }

    async fn dispatch(&self, watcher: &Watcher, attestation: &Attestation) -> Result<()> {
        match watcher.action_type {
            WatcherActionType::Script => match &self.script_dispatcher {
                Some(dispatcher) => dispatcher.dispatch(watcher, attestation).await,
                None => Err(Error::internal("no script dispatcher configured")),
            },
            WatcherActionType::Webhook => self.dispatch_webhook(watcher, attestation).await,
            WatcherActionType::Semantic => Ok(()),
        }
    }

    async fn dispatch_webhook(&self, watcher: &Watcher, attestation: &Attestation) -> Result<()> {
        let url = watcher
            .action_data
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::invalid_input("webhook watcher missing action_data.url"))?;

        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = self.http.post(url).json(attestation).send().await;
            match result {
                Ok(resp) if resp.status().is_success() => return Ok(()),
                Ok(resp) => {
                    let status = resp.status();
                    if attempts > WEBHOOK_MAX_RETRIES {
                        return Err(Error::upstream(format!("webhook {url} returned {status}")));
                    }
                }
                Err(e) => {
                    if attempts > WEBHOOK_MAX_RETRIES {
                        return Err(Error::upstream(format!("webhook {url} failed: {e}")));
                    }
                }
            }
        }
    }

    async fn record_outcome(&self, watcher_id: &str, result: &Result<()>) -> Result<()> {
        match result {
            Ok(()) => {
                sqlx::query(
                    "UPDATE watchers SET fire_count = fire_count + 1, last_fired_at = ? WHERE id = ?",
                )
                .bind(Utc::now().to_rfc3339())
                .bind(watcher_id)
                .execute(&self.pool)
                .await
                .map_err(Error::Database)?;
            }
            Err(e) => {
                let truncated: String = e.to_string().chars().take(500).collect();
                sqlx::query("UPDATE watchers SET error_count = error_count + 1, last_error = ? WHERE id = ?")
                    .bind(truncated)
                    .bind(watcher_id)
                    .execute(&self.pool)
                    .await
                    .map_err(Error::Database)?;
            }
        }
        Ok(())
    }

    /// Lists every watcher regardless of `enabled`, for the management surface.
    pub async fn list_watchers(&self) -> Result<Vec<Watcher>> {
        let rows = sqlx::query(
            "SELECT id, name, subjects, predicates, contexts, actors, time_start, time_end, \
             action_type, action_data, max_fires_per_minute, enabled, fire_count, error_count, \
             last_fired_at, last_error, semantic_query, semantic_threshold FROM watchers",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(row_to_watcher).collect()
    }

    async fn load_enabled_watchers(&self) -> Result<Vec<Watcher>> {
        let rows = sqlx::query(
            "SELECT id, name, subjects, predicates, contexts, actors, time_start, time_end, \
             action_type, action_data, max_fires_per_minute, enabled, fire_count, error_count, \
             last_fired_at, last_error, semantic_query, semantic_threshold FROM watchers WHERE enabled = 1",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;
        rows.into_iter().map(row_to_watcher).collect()
    }

    pub async fn create_watcher(&self, watcher: &Watcher) -> Result<String> {
        let id = if watcher.id.is_empty() { Uuid::new_v4().to_string() } else { watcher.id.clone() };
        sqlx::query(
            "INSERT INTO watchers (id, name, subjects, predicates, contexts, actors, time_start, time_end, \
             action_type, action_data, max_fires_per_minute, enabled, semantic_query, semantic_threshold) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(&watcher.name)
        .bind(serde_json::to_string(&watcher.filter.subjects).unwrap())
        .bind(serde_json::to_string(&watcher.filter.predicates).unwrap())
        .bind(serde_json::to_string(&watcher.filter.contexts).unwrap())
        .bind(serde_json::to_string(&watcher.filter.actors).unwrap())
        .bind(watcher.filter.time_start.map(|t| t.to_rfc3339()))
        .bind(watcher.filter.time_end.map(|t| t.to_rfc3339()))
        .bind(action_type_str(watcher.action_type))
        .bind(watcher.action_data.to_string())
        .bind(watcher.max_fires_per_minute)
        .bind(watcher.enabled as i64)
        .bind(&watcher.semantic_query)
        .bind(watcher.semantic_threshold)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    pub async fn set_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        sqlx::query("UPDATE watchers SET enabled = ? WHERE id = ?")
            .bind(enabled as i64)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }
}

fn action_type_str(action_type: WatcherActionType) -> &'static str {
    match action_type {
        WatcherActionType::Script => "script",
        WatcherActionType::Webhook => "webhook",
        WatcherActionType::Semantic => "semantic",
    }
}

fn row_to_watcher(row: sqlx::sqlite::SqliteRow) -> Result<Watcher> {
    let action_type = match row.get::<String, _>("action_type").as_str() {
        "script" => WatcherActionType::Script,
        "webhook" => WatcherActionType::Webhook,
        "semantic" => WatcherActionType::Semantic,
        other => return Err(Error::corrupt(format!("unknown watcher action_type: {other}"))),
    };
    let parse_list = |s: String| -> Vec<String> { serde_json::from_str(&s).unwrap_or_default() };
    Ok(Watcher {
        id: row.get("id"),
        name: row.get("name"),
        filter: AxFilter {
            subjects: parse_list(row.get("subjects")),
            predicates: parse_list(row.get("predicates")),
            contexts: parse_list(row.get("contexts")),
            actors: parse_list(row.get("actors")),
            time_start: row.get::<Option<String>, _>("time_start").and_then(|s| s.parse().ok()),
            time_end: row.get::<Option<String>, _>("time_end").and_then(|s| s.parse().ok()),
            limit: None,
            over: None,
        },
        action_type,
        action_data: serde_json::from_str(&row.get::<String, _>("action_data")).unwrap_or(serde_json::Value::Null),
        max_fires_per_minute: row.get("max_fires_per_minute"),
        enabled: row.get::<i64, _>("enabled") != 0,
        fire_count: row.get("fire_count"),
        error_count: row.get("error_count"),
        last_fired_at: row.get::<Option<String>, _>("last_fired_at").and_then(|s| s.parse().ok()),
        last_error: row.get("last_error"),
        semantic_query: row.get("semantic_query"),
        semantic_threshold: row.get("semantic_threshold"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attestation(subjects: &[&str], contexts: &[&str]) -> Attestation {
        Attestation {
            id: "a1".to_string(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            predicates: vec!["works_at".to_string()],
            contexts: contexts.iter().map(|s| s.to_string()).collect(),
            actors: vec!["user@host".to_string()],
            timestamp: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            source: "test".to_string(),
            attributes: None,
        }
    }

    #[test]
    fn subject_match_is_exact_case() {
        let filter = AxFilter { subjects: vec!["Alice".to_string()], ..Default::default() };
        assert!(matches_filter(&attestation(&["Alice"], &["Acme"]), &filter));
        assert!(!matches_filter(&attestation(&["alice"], &["Acme"]), &filter));
    }

    #[test]
    fn context_match_is_case_insensitive() {
        let filter = AxFilter { contexts: vec!["acme corp".to_string()], ..Default::default() };
        assert!(matches_filter(&attestation(&["Alice"], &["ACME Corp"]), &filter));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches_filter(&attestation(&["Alice"], &["Acme"]), &AxFilter::default()));
    }

    #[tokio::test]
    async fn rate_limiter_caps_fires_per_minute() {
        let limiter = RateLimiter::default();
        assert!(limiter.try_fire("w1", 2).await);
        assert!(limiter.try_fire("w1", 2).await);
        assert!(!limiter.try_fire("w1", 2).await);
    }

    #[tokio::test]
    async fn rate_limiter_is_independent_per_watcher() {
        let limiter = RateLimiter::default();
        assert!(limiter.try_fire("w1", 1).await);
        assert!(!limiter.try_fire("w1", 1).await);
        assert!(limiter.try_fire("w2", 1).await);
    }
}
