//! Fluent builder that turns an [`AxFilter`](qntx_core::AxFilter) into a parameterized SQL
//! query against `attestations` (§4.1/§4.2).
//!
//! Set filters are disjunctive within an axis and conjunctive across axes. Every user-supplied
//! value is bound as a parameter — LIKE patterns are escaped before binding, never interpolated
//! into the SQL string.

use qntx_core::{AxFilter, MAX_ATTESTATION_LIMIT};

/// Escape `%`, `_`, and the escape character itself for a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn escape_like(value: &str) -> String {
    value.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

/// One pair-level disjunction clause for NL-expanded (predicate, context) pairs:
/// `((predicates LIKE ? ESCAPE '\' AND contexts LIKE ? ESCAPE '\') OR ...)`. Unlike
/// [`axis_clause`], which ORs candidate values within a single column, this ORs whole
/// `(predicate AND context)` pairs together so two expansion results with differing contexts
/// per predicate never recombine into a cross-product match neither pair specified.
pub(crate) fn pair_clause(pairs: &[crate::expansion::ExpandedPair], binds: &mut Vec<String>) -> Option<String> {
    if pairs.is_empty() {
        return None;
    }
    let parts: Vec<String> = pairs
        .iter()
        .map(|pair| {
            binds.push(format!("%\"{}\"%", escape_like(&pair.predicate)));
            binds.push(format!("%\"{}\"%", escape_like(&pair.context)));
            "(predicates LIKE ? ESCAPE '\\' AND contexts LIKE ? ESCAPE '\\')".to_string()
        })
        .collect();
    Some(format!("({})", parts.join(" OR ")))
}

/// One axis-match clause: `column LIKE ? ESCAPE '\' OR column LIKE ? ESCAPE '\' ...`.
fn axis_clause(column: &str, values: &[String], binds: &mut Vec<String>) -> Option<String> {
    if values.is_empty() {
        return None;
    }
    let parts: Vec<String> = values
        .iter()
        .map(|v| {
            binds.push(format!("%\"{}\"%", escape_like(v)));
            format!("{} LIKE ? ESCAPE '\\'", column)
        })
        .collect();
    Some(format!("({})", parts.join(" OR ")))
}

/// Builds the SQL and bind parameters for an [`AxFilter`] query against `attestations`.
pub struct QueryBuilder<'a> {
    filter: &'a AxFilter,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(filter: &'a AxFilter) -> Self {
        Self { filter }
    }

    /// Returns the axis/time clauses (each a self-contained parenthesized predicate, to be
    /// joined with `AND`) and their positional binds, in the order the clauses appear.
    pub fn clauses(&self) -> (Vec<String>, Vec<String>) {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();

        if let Some(c) = axis_clause("subjects", &self.filter.subjects, &mut binds) {
            clauses.push(c);
        }
        if let Some(c) = axis_clause("predicates", &self.filter.predicates, &mut binds) {
            clauses.push(c);
        }
        if let Some(c) = axis_clause("contexts", &self.filter.contexts, &mut binds) {
            clauses.push(c);
        }
        if let Some(c) = axis_clause("actors", &self.filter.actors, &mut binds) {
            clauses.push(c);
        }

        if self.filter.time_start.is_some() {
            clauses.push("timestamp >= ?".to_string());
        }
        if self.filter.time_end.is_some() {
            clauses.push("timestamp <= ?".to_string());
        }

        (clauses, binds)
    }

    pub fn limit(&self) -> i64 {
        self.filter.limit.unwrap_or(MAX_ATTESTATION_LIMIT).min(MAX_ATTESTATION_LIMIT).max(1)
    }

    /// Returns `(sql, binds)` for the axis/time filters alone, with no OVER clause. Binds must
    /// be applied in order via `.bind(..)`, axis/time binds first.
    pub fn build(&self) -> (String, Vec<String>) {
        let (clauses, binds) = self.clauses();
        let where_sql = if clauses.is_empty() { String::new() } else { format!("WHERE {}", clauses.join(" AND ")) };
        let sql = format!(
            "SELECT id, subjects, predicates, contexts, actors, timestamp, source, attributes \
             FROM attestations {} ORDER BY timestamp DESC LIMIT {}",
            where_sql,
            self.limit()
        );
        (sql, binds)
    }

    /// Time bounds are bound separately since they are plain comparisons, not LIKE patterns.
    pub fn time_bounds(&self) -> (Option<String>, Option<String>) {
        (
            self.filter.time_start.map(|t| t.to_rfc3339()),
            self.filter.time_end.map(|t| t.to_rfc3339()),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_percent_and_underscore() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
    }

    #[test]
    fn empty_filter_has_no_where_clause() {
        let filter = AxFilter::default();
        let (sql, binds) = QueryBuilder::new(&filter).build();
        assert!(!sql.contains("WHERE"));
        assert!(binds.is_empty());
    }

    #[test]
    fn subject_filter_binds_one_like_pattern() {
        let filter = AxFilter {
            subjects: vec!["Alice".to_string()],
            ..Default::default()
        };
        let (sql, binds) = QueryBuilder::new(&filter).build();
        assert!(sql.contains("subjects LIKE"));
        assert_eq!(binds, vec!["%\"Alice\"%".to_string()]);
    }

    #[test]
    fn pair_clause_ors_whole_pairs_not_axes() {
        use crate::expansion::ExpandedPair;
        let pairs = vec![
            ExpandedPair { predicate: "role".to_string(), context: "engineer".to_string() },
            ExpandedPair { predicate: "reports_to".to_string(), context: "cto".to_string() },
        ];
        let mut binds = Vec::new();
        let clause = pair_clause(&pairs, &mut binds).unwrap();
        assert_eq!(clause.matches(" OR ").count(), 1);
        assert_eq!(binds, vec!["%\"role\"%", "%\"engineer\"%", "%\"reports_to\"%", "%\"cto\"%"]);
    }

    #[test]
    fn pair_clause_of_empty_pairs_is_none() {
        let mut binds = Vec::new();
        assert!(pair_clause(&[], &mut binds).is_none());
    }
}
