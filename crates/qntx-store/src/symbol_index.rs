//! In-memory completion cache over the four attestation axes (§4.3).

use crate::error::{from_sqlx, Result};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AxisKind {
    Subject,
    Predicate,
    Context,
    Actor,
}

impl AxisKind {
    fn column(self) -> &'static str {
        match self {
            AxisKind::Subject => "subjects",
            AxisKind::Predicate => "predicates",
            AxisKind::Context => "contexts",
            AxisKind::Actor => "actors",
        }
    }

    /// Minimum prefix length before completions are offered: 3 for the ambiguous subject axis,
    /// 1 for axes reached through an explicit marker (predicates after "is", contexts after
    /// "of", actors after "by").
    pub fn min_prefix_len(self) -> usize {
        match self {
            AxisKind::Subject => 3,
            _ => 1,
        }
    }
}

struct Maps {
    subjects: HashMap<String, i64>,
    predicates: HashMap<String, i64>,
    contexts: HashMap<String, i64>,
    actors: HashMap<String, i64>,
}

impl Maps {
    fn empty() -> Self {
        Self {
            subjects: HashMap::new(),
            predicates: HashMap::new(),
            contexts: HashMap::new(),
            actors: HashMap::new(),
        }
    }

    fn get(&self, kind: AxisKind) -> &HashMap<String, i64> {
        match kind {
            AxisKind::Subject => &self.subjects,
            AxisKind::Predicate => &self.predicates,
            AxisKind::Context => &self.contexts,
            AxisKind::Actor => &self.actors,
        }
    }
}

/// Four count maps (subject/predicate/context/actor → count), refreshed on demand. Readers take
/// a shared lock; [`SymbolIndex::refresh`] takes exclusive.
pub struct SymbolIndex {
    pool: SqlitePool,
    maps: RwLock<Maps>,
}

const MAX_VALUES_PER_AXIS: i64 = 1000;

impl SymbolIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool, maps: RwLock::new(Maps::empty()) }
    }

    /// Re-reads distinct JSON-array elements with COUNT aggregations, limited to
    /// [`MAX_VALUES_PER_AXIS`] per axis.
    pub async fn refresh(&self) -> Result<()> {
        let subjects = self.count_axis(AxisKind::Subject).await?;
        let predicates = self.count_axis(AxisKind::Predicate).await?;
        let contexts = self.count_axis(AxisKind::Context).await?;
        let actors = self.count_axis(AxisKind::Actor).await?;

        let mut maps = self.maps.write().unwrap();
        maps.subjects = subjects;
        maps.predicates = predicates;
        maps.contexts = contexts;
        maps.actors = actors;
        debug!("symbol index refreshed");
        Ok(())
    }

    async fn count_axis(&self, kind: AxisKind) -> Result<HashMap<String, i64>> {
        let column = kind.column();
        let rows = sqlx::query(&format!("SELECT {} FROM attestations", column))
            .fetch_all(&self.pool)
            .await
            .map_err(from_sqlx)?;

        let mut counts: HashMap<String, i64> = HashMap::new();
        for row in &rows {
            let raw: String = row.get(column);
            let values: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
            for v in values {
                if v != qntx_core::PLACEHOLDER {
                    *counts.entry(v).or_insert(0) += 1;
                }
            }
        }

        if counts.len() as i64 > MAX_VALUES_PER_AXIS {
            let mut entries: Vec<(String, i64)> = counts.into_iter().collect();
            entries.sort_by(|a, b| b.1.cmp(&a.1));
            entries.truncate(MAX_VALUES_PER_AXIS as usize);
            counts = entries.into_iter().collect();
        }

        Ok(counts)
    }

    /// Up to 10 matches ordered by count descending. Returns nothing if `prefix` is shorter
    /// than [`AxisKind::min_prefix_len`] for `kind`.
    pub fn get_completions(&self, prefix: &str, kind: AxisKind) -> Vec<String> {
        if prefix.len() < kind.min_prefix_len() {
            return Vec::new();
        }
        let maps = self.maps.read().unwrap();
        let mut matches: Vec<(&String, &i64)> =
            maps.get(kind).iter().filter(|(value, _)| value.starts_with(prefix)).collect();
        matches.sort_by(|a, b| b.1.cmp(a.1));
        matches.into_iter().take(10).map(|(value, _)| value.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use chrono::{TimeZone, Utc};
    use qntx_core::Attestation;

    async fn seeded_pool() -> SqlitePool {
        let store = Store::in_memory().await.unwrap();
        store
            .create(&Attestation {
                id: String::new(),
                subjects: vec!["Alice".to_string()],
                predicates: vec!["works_at".to_string()],
                contexts: vec!["Acme".to_string()],
                actors: vec!["user@host".to_string()],
                timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
                source: "test".to_string(),
                attributes: None,
            })
            .await
            .unwrap();
        store.pool()
    }

    #[tokio::test]
    async fn completions_respect_minimum_prefix_length() {
        let index = SymbolIndex::new(seeded_pool().await);
        index.refresh().await.unwrap();

        assert!(index.get_completions("Al", AxisKind::Subject).is_empty());
        assert_eq!(index.get_completions("Ali", AxisKind::Subject), vec!["Alice".to_string()]);
        assert_eq!(index.get_completions("w", AxisKind::Predicate), vec!["works_at".to_string()]);
    }
}
