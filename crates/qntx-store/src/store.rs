//! Attestation persistence, schema, and query execution (§4.1).

use crate::error::{from_sqlx, Result};
use crate::expansion::{ExpandedPair, QueryExpander};
use crate::query::QueryBuilder;
use crate::retention::RetentionLimits;
use chrono::Utc;
use qntx_core::{compute_asid, Attestation, AxFilter};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Numeric predicates registered for the OVER filter (§4.1/§4.2), mapping predicate name to
/// nothing more than membership — the comparison itself always casts the first context element.
#[derive(Default)]
pub struct NumericPredicates {
    registered: RwLock<std::collections::HashSet<String>>,
}

impl NumericPredicates {
    pub fn register(&self, predicate: impl Into<String>) {
        self.registered.write().unwrap().insert(predicate.into());
    }

    pub fn is_registered(&self, predicate: &str) -> bool {
        self.registered.read().unwrap().contains(predicate)
    }
}

pub struct Store {
    pool: SqlitePool,
    expander: Option<Box<dyn QueryExpander>>,
    numeric_predicates: NumericPredicates,
    retention: RetentionLimits,
}

impl Store {
    /// `url` is a `sqlx` SQLite connection string: `sqlite:///path/to/db.sqlite` or
    /// `sqlite::memory:`.
    pub async fn new(url: &str) -> Result<Self> {
        info!(url, "opening attestation store");
        let pool = SqlitePoolOptions::new().max_connections(5).connect(url).await.map_err(from_sqlx)?;
        crate::migrations::apply_all(&pool).await?;
        Ok(Self {
            pool,
            expander: None,
            numeric_predicates: NumericPredicates::default(),
            retention: RetentionLimits::default(),
        })
    }

    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub fn set_expander(&mut self, expander: Box<dyn QueryExpander>) {
        self.expander = Some(expander);
    }

    pub fn register_numeric_predicate(&self, predicate: impl Into<String>) {
        self.numeric_predicates.register(predicate);
    }

    /// Computes the content-derived id and inserts; idempotent on collision — returns the id of
    /// the pre-existing row without modifying it.
    pub async fn create(&self, attestation: &Attestation) -> Result<String> {
        if attestation.is_unspecified() {
            return Err(qntx_core::Error::invalid_input(
                "attestation has no non-placeholder element across any axis",
            ));
        }

        let id = compute_asid(&attestation.subjects, &attestation.predicates, &attestation.contexts, &attestation.actors);

        let existing = sqlx::query("SELECT id FROM attestations WHERE id = ?")
            .bind(&id)
            .fetch_optional(&self.pool)
            .await
            .map_err(from_sqlx)?;
        if existing.is_some() {
            debug!(id, "create is idempotent, row already exists");
            return Ok(id);
        }

        let attributes = attestation
            .attributes
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(qntx_core::Error::from)?;

        sqlx::query(
            "INSERT INTO attestations (id, subjects, predicates, contexts, actors, timestamp, source, attributes) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(serde_json::to_string(&attestation.subjects).map_err(qntx_core::Error::from)?)
        .bind(serde_json::to_string(&attestation.predicates).map_err(qntx_core::Error::from)?)
        .bind(serde_json::to_string(&attestation.contexts).map_err(qntx_core::Error::from)?)
        .bind(serde_json::to_string(&attestation.actors).map_err(qntx_core::Error::from)?)
        .bind(attestation.timestamp.to_rfc3339())
        .bind(&attestation.source)
        .bind(attributes)
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;

        self.enforce_retention(attestation).await?;

        Ok(id)
    }

    pub async fn get(&self, id: &str) -> Result<Attestation> {
        let row = sqlx::query(
            "SELECT id, subjects, predicates, contexts, actors, timestamp, source, attributes FROM attestations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(from_sqlx)?
        .ok_or_else(|| qntx_core::Error::not_found(format!("attestation {} not found", id)))?;

        row_to_attestation(&row)
    }

    /// Applies NL expansion, the OVER numeric filter, and the set/time filters, in that order,
    /// and returns matches newest-first, bounded by `MaxAttestationLimit`.
    pub async fn query(&self, filter: &AxFilter) -> Result<Vec<Attestation>> {
        let expansion_pairs = self.expand_if_needed(filter);

        // NL expansion is enforced below as a dedicated pair-level disjunction, so the axis
        // builder must not also filter predicates/contexts independently — combining them as
        // separate axis clauses would let a (predicate, context) pair recombine with a
        // different pair's column value into a cross-product match neither pair specified.
        let axis_filter_owned;
        let axis_filter: &AxFilter = if expansion_pairs.is_some() {
            axis_filter_owned = {
                let mut cleared = filter.clone();
                cleared.predicates = Vec::new();
                cleared.contexts = Vec::new();
                cleared
            };
            &axis_filter_owned
        } else {
            filter
        };

        let builder = QueryBuilder::new(axis_filter);
        let (mut clauses, binds) = builder.clauses();
        let (time_start, time_end) = builder.time_bounds();

        // Binds for clauses appended below, applied after the axis binds and the two time
        // binds, in the same order their clauses are appended.
        let mut trailing_binds: Vec<String> = Vec::new();

        if let Some(pairs) = &expansion_pairs {
            match crate::query::pair_clause(pairs, &mut trailing_binds) {
                Some(clause) => clauses.push(clause),
                // Trigger matched but no value expanded to anything: force zero rows instead of
                // silently falling through to the (now predicate/context-unfiltered) axis query.
                None => clauses.push("0".to_string()),
            }
        }

        if let Some(over) = &filter.over {
            let (subquery, over_binds) = self.over_subquery(filter, over)?;
            clauses.push(format!("subjects IN ({})", subquery));
            trailing_binds.extend(over_binds);
        }

        let where_sql = if clauses.is_empty() { String::new() } else { format!("WHERE {}", clauses.join(" AND ")) };
        let sql = format!(
            "SELECT id, subjects, predicates, contexts, actors, timestamp, source, attributes \
             FROM attestations {} ORDER BY timestamp DESC LIMIT {}",
            where_sql,
            builder.limit()
        );

        let mut query = sqlx::query(&sql);
        for bind in &binds {
            query = query.bind(bind);
        }
        if let Some(ts) = &time_start {
            query = query.bind(ts);
        }
        if let Some(te) = &time_end {
            query = query.bind(te);
        }
        for bind in &trailing_binds {
            query = query.bind(bind);
        }

        let rows = query.fetch_all(&self.pool).await.map_err(from_sqlx)?;
        rows.iter().map(row_to_attestation).collect()
    }

    /// Returns the NL-expansion pairs for `filter`'s leading predicate, or `None` if no expander
    /// is configured or that predicate is not a registered trigger. `Some(vec![])` (a trigger
    /// matched but none of its values expanded to anything) is distinct from `None` — `query`
    /// treats it as "force zero rows", not "fall through unfiltered".
    fn expand_if_needed(&self, filter: &AxFilter) -> Option<Vec<ExpandedPair>> {
        let trigger = filter.predicates.first()?;
        let expander = self.expander.as_ref()?;
        if !expander.is_trigger(trigger) {
            return None;
        }
        let values = &filter.predicates[1..];
        Some(expander.expand(trigger, values))
    }

    /// Builds `SELECT DISTINCT subjects FROM attestations WHERE <numeric predicate clause>` and
    /// its positional binds, skipping the condition silently (queryability degrades to zero
    /// results) if the first filtered predicate is not a registered numeric predicate.
    fn over_subquery(&self, filter: &AxFilter, over: &qntx_core::OverComparison) -> Result<(String, Vec<String>)> {
        let years = match over.unit.as_str() {
            "y" => over.value,
            "m" => (over.value / 12.0).floor(),
            other => return Err(qntx_core::Error::invalid_input(format!("invalid unit: {}", other))),
        };

        let predicate = filter.predicates.first();
        let registered = predicate.map(|p| self.numeric_predicates.is_registered(p)).unwrap_or(false);
        if !registered {
            warn!("over filter references an unregistered numeric predicate, returning no rows");
            return Ok(("SELECT id FROM attestations WHERE 0".to_string(), Vec::new()));
        }

        let pattern = format!("%\"{}\"%", crate::query::escape_like(predicate.unwrap()));
        Ok((
            "SELECT DISTINCT subjects FROM attestations \
             WHERE predicates LIKE ? ESCAPE '\\' \
             AND CAST(json_extract(contexts, '$[0]') AS REAL) >= CAST(? AS REAL)"
                .to_string(),
            vec![pattern, years.to_string()],
        ))
    }

    pub async fn get_all_predicates(&self) -> Result<Vec<String>> {
        self.distinct_axis_values("predicates").await
    }

    pub async fn get_all_contexts(&self) -> Result<Vec<String>> {
        self.distinct_axis_values("contexts").await
    }

    async fn distinct_axis_values(&self, column: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(&format!("SELECT {} FROM attestations", column))
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;
        let mut seen = std::collections::HashSet::new();
        for row in &rows {
            let raw: String = row.get(column);
            let values: Vec<String> = serde_json::from_str(&raw).map_err(qntx_core::Error::from)?;
            for v in values {
                if v != qntx_core::PLACEHOLDER {
                    seen.insert(v);
                }
            }
        }
        let mut result: Vec<String> = seen.into_iter().collect();
        result.sort();
        Ok(result)
    }

    /// Fuzzy search over rich-string fields (`source`, and JSON-stringified axis arrays),
    /// scored per word and returned with the matched words.
    pub async fn search(&self, text: &str, k: usize) -> Result<Vec<SearchMatch>> {
        let words: Vec<String> = text.split_whitespace().map(|w| w.to_lowercase()).collect();
        if words.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            "SELECT id, subjects, predicates, contexts, actors, timestamp, source, attributes FROM attestations",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(from_sqlx)?;

        let mut scored: Vec<(f64, Vec<String>, Attestation)> = Vec::new();
        for row in &rows {
            let attestation = row_to_attestation(row)?;
            let haystack = format!(
                "{} {} {} {} {}",
                attestation.subjects.join(" "),
                attestation.predicates.join(" "),
                attestation.contexts.join(" "),
                attestation.actors.join(" "),
                attestation.source,
            )
            .to_lowercase();

            let mut matched = Vec::new();
            for word in &words {
                if haystack.contains(word.as_str()) {
                    matched.push(word.clone());
                }
            }
            if !matched.is_empty() {
                let score = matched.len() as f64 / words.len() as f64;
                scored.push((score, matched, attestation));
            }
        }

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(score, matched_words, attestation)| SearchMatch { attestation, score, matched_words })
            .collect())
    }

    /// Re-checks every (actor, subject)/actor group present in the store against the
    /// configured caps, catching groups that drifted over the limit between writes. Intended to
    /// be called on a periodic tick (every 5 minutes per SPEC_FULL.md §4.1) by `qntx-service`;
    /// inline enforcement on write already keeps the common case tight.
    pub async fn sweep_retention(&self) -> Result<()> {
        let rows = sqlx::query("SELECT DISTINCT actors, subjects FROM attestations").fetch_all(&self.pool).await.map_err(from_sqlx)?;

        let mut seen_actors = std::collections::HashSet::new();
        let mut seen_pairs = std::collections::HashSet::new();
        for row in rows {
            let actors: Vec<String> = serde_json::from_str(&row.get::<String, _>("actors")).map_err(qntx_core::Error::from)?;
            let subjects: Vec<String> = serde_json::from_str(&row.get::<String, _>("subjects")).map_err(qntx_core::Error::from)?;
            for actor in &actors {
                if actor == qntx_core::PLACEHOLDER {
                    continue;
                }
                if seen_actors.insert(actor.clone()) {
                    self.evict_if_over("actor", self.retention.max_contexts_per_actor, actor, None).await?;
                }
                for subject in &subjects {
                    if subject == qntx_core::PLACEHOLDER {
                        continue;
                    }
                    if seen_pairs.insert((actor.clone(), subject.clone())) {
                        self.evict_if_over(
                            "actor_subject",
                            self.retention.max_contexts_per_actor_subject,
                            actor,
                            Some(subject),
                        )
                        .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Evicts the oldest attestations in any (actor, subject)/actor/entity group that now
    /// exceeds its configured cap, and records one `storage_event` per eviction (§4.1).
    ///
    /// Runs inline on write; a periodic sweep additionally calls this to catch groups that
    /// drifted over the cap between writes (eventual consistency, not per-write exactness).
    async fn enforce_retention(&self, attestation: &Attestation) -> Result<()> {
        for actor in &attestation.actors {
            for subject in &attestation.subjects {
                self.evict_if_over(
                    "actor_subject",
                    self.retention.max_contexts_per_actor_subject,
                    actor,
                    Some(subject),
                )
                .await?;
            }
            self.evict_if_over("actor", self.retention.max_contexts_per_actor, actor, None).await?;
        }
        Ok(())
    }

    async fn evict_if_over(&self, scope: &str, cap: i64, actor: &str, subject: Option<&str>) -> Result<()> {
        let pattern = format!("%\"{}\"%", actor);
        let rows = if let Some(subject) = subject {
            let subject_pattern = format!("%\"{}\"%", subject);
            sqlx::query("SELECT id, timestamp FROM attestations WHERE actors LIKE ? ESCAPE '\\' AND subjects LIKE ? ESCAPE '\\' ORDER BY timestamp ASC")
                .bind(&pattern)
                .bind(&subject_pattern)
                .fetch_all(&self.pool)
                .await
        } else {
            sqlx::query("SELECT id, timestamp FROM attestations WHERE actors LIKE ? ESCAPE '\\' ORDER BY timestamp ASC")
                .bind(&pattern)
                .fetch_all(&self.pool)
                .await
        }
        .map_err(from_sqlx)?;

        if (rows.len() as i64) <= cap {
            return Ok(());
        }

        let overflow = rows.len() as i64 - cap;
        let evicted: Vec<String> = rows.iter().take(overflow as usize).map(|r| r.get::<String, _>("id")).collect();

        for id in &evicted {
            sqlx::query("DELETE FROM attestations WHERE id = ?").bind(id).execute(&self.pool).await.map_err(from_sqlx)?;
        }

        let details = serde_json::json!({
            "evicted_actors": [actor],
            "evicted_subjects": subject,
            "sample_ids": evicted,
        });

        sqlx::query(
            "INSERT INTO storage_events (id, event_type, attestation_id, eviction_details, limit_value, occurred_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(format!("eviction_{}", scope))
        .bind(evicted.first())
        .bind(details.to_string())
        .bind(cap)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(from_sqlx)?;

        Ok(())
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchMatch {
    pub attestation: Attestation,
    pub score: f64,
    pub matched_words: Vec<String>,
}

fn row_to_attestation(row: &sqlx::sqlite::SqliteRow) -> Result<Attestation> {
    let subjects: String = row.get("subjects");
    let predicates: String = row.get("predicates");
    let contexts: String = row.get("contexts");
    let actors: String = row.get("actors");
    let attributes: Option<String> = row.get("attributes");
    let timestamp: String = row.get("timestamp");

    Ok(Attestation {
        id: row.get("id"),
        subjects: serde_json::from_str(&subjects).map_err(qntx_core::Error::from)?,
        predicates: serde_json::from_str(&predicates).map_err(qntx_core::Error::from)?,
        contexts: serde_json::from_str(&contexts).map_err(qntx_core::Error::from)?,
        actors: serde_json::from_str(&actors).map_err(qntx_core::Error::from)?,
        timestamp: timestamp.parse().map_err(|e| qntx_core::Error::corrupt(format!("bad timestamp: {}", e)))?,
        source: row.get("source"),
        attributes: attributes
            .map(|a| serde_json::from_str::<HashMap<String, serde_json::Value>>(&a))
            .transpose()
            .map_err(qntx_core::Error::from)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn attestation(subjects: &[&str], predicates: &[&str], contexts: &[&str], actors: &[&str]) -> Attestation {
        Attestation {
            id: String::new(),
            subjects: subjects.iter().map(|s| s.to_string()).collect(),
            predicates: predicates.iter().map(|s| s.to_string()).collect(),
            contexts: contexts.iter().map(|s| s.to_string()).collect(),
            actors: actors.iter().map(|s| s.to_string()).collect(),
            timestamp: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            source: "test".to_string(),
            attributes: None,
        }
    }

    #[tokio::test]
    async fn create_and_query_by_subject() {
        let store = Store::in_memory().await.unwrap();
        store
            .create(&attestation(&["Alice"], &["works_at"], &["Acme"], &["user@host"]))
            .await
            .unwrap();

        let results = store
            .query(&AxFilter { subjects: vec!["Alice".to_string()], ..Default::default() })
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].subjects, vec!["Alice".to_string()]);
    }

    #[tokio::test]
    async fn context_matching_is_case_insensitive() {
        let store = Store::in_memory().await.unwrap();
        store
            .create(&attestation(&["Bob"], &["works_at"], &["ACME Corp"], &["user@host"]))
            .await
            .unwrap();

        let results = store
            .query(&AxFilter { contexts: vec!["acme corp".to_string()], ..Default::default() })
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn create_is_idempotent_on_identical_content() {
        let store = Store::in_memory().await.unwrap();
        let a = attestation(&["Alice"], &["works_at"], &["Acme"], &["user@host"]);
        let id1 = store.create(&a).await.unwrap();
        let id2 = store.create(&a).await.unwrap();
        assert_eq!(id1, id2);

        let all = store.query(&AxFilter::default()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn unspecified_attestation_is_rejected() {
        let store = Store::in_memory().await.unwrap();
        let result = store
            .create(&attestation(&["_"], &["_"], &["_"], &["_"]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn get_all_predicates_excludes_placeholder() {
        let store = Store::in_memory().await.unwrap();
        store.create(&attestation(&["Alice"], &["_"], &["Acme"], &["user@host"])).await.unwrap();
        store.create(&attestation(&["Bob"], &["works_at"], &["Acme"], &["user@host"])).await.unwrap();

        let predicates = store.get_all_predicates().await.unwrap();
        assert_eq!(predicates, vec!["works_at".to_string()]);
    }

    #[tokio::test]
    async fn over_filter_without_registered_predicate_returns_nothing() {
        let store = Store::in_memory().await.unwrap();
        store
            .create(&attestation(&["Alice"], &["experience_years"], &["7"], &["user@host"]))
            .await
            .unwrap();

        let results = store
            .query(&AxFilter {
                predicates: vec!["experience_years".to_string()],
                over: Some(qntx_core::OverComparison { value: 5.0, unit: "y".to_string() }),
                ..Default::default()
            })
            .await
            .unwrap();

        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn over_filter_matches_registered_numeric_predicate() {
        let store = Store::in_memory().await.unwrap();
        store.register_numeric_predicate("experience_years");
        store
            .create(&attestation(&["Alice"], &["experience_years"], &["7"], &["user@host"]))
            .await
            .unwrap();

        let results = store
            .query(&AxFilter {
                predicates: vec!["experience_years".to_string()],
                over: Some(qntx_core::OverComparison { value: 5.0, unit: "y".to_string() }),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(results.len(), 1);

        let no_match = store
            .query(&AxFilter {
                predicates: vec!["experience_years".to_string()],
                over: Some(qntx_core::OverComparison { value: 10.0, unit: "y".to_string() }),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(no_match.is_empty());
    }

    /// NL-expansion pairs with differing contexts per predicate must be matched pair-wise, not
    /// flattened into two independent axis lists — flattening lets a row asserting one of the
    /// expanded predicates with a *different* expanded pair's context count as a match, even
    /// though neither expansion pair actually holds for that row.
    #[tokio::test]
    async fn nl_expansion_does_not_cross_pair_mismatched_predicates_and_contexts() {
        use crate::expansion::{ExpandedPair, TableExpander};

        let mut expander = TableExpander::new();
        expander.register(
            "is",
            "manager",
            vec![
                ExpandedPair { predicate: "role".to_string(), context: "engineer".to_string() },
                ExpandedPair { predicate: "reports_to".to_string(), context: "cto".to_string() },
            ],
        );

        let mut store = Store::in_memory().await.unwrap();
        store.set_expander(Box::new(expander));

        // True positives: each satisfies one of the two expanded pairs outright.
        store.create(&attestation(&["Alice"], &["role"], &["engineer"], &["user@host"])).await.unwrap();
        store.create(&attestation(&["Bob"], &["reports_to"], &["cto"], &["user@host"])).await.unwrap();

        // False-positive candidate: predicate from one pair, context from the *other* pair.
        // Cross-product axis matching would wrongly accept this; pair-level matching must not.
        store.create(&attestation(&["Carol"], &["reports_to"], &["engineer"], &["user@host"])).await.unwrap();

        let results = store
            .query(&AxFilter { predicates: vec!["is".to_string(), "manager".to_string()], ..Default::default() })
            .await
            .unwrap();

        let subjects: std::collections::HashSet<String> = results.into_iter().flat_map(|a| a.subjects).collect();
        assert!(subjects.contains("Alice"));
        assert!(subjects.contains("Bob"));
        assert!(!subjects.contains("Carol"), "pair-level expansion must not cross-match reports_to/engineer");
    }
}
