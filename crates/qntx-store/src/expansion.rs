//! Natural-language predicate expansion (§4.1), injected so the store itself stays ignorant of
//! any particular vocabulary.

/// One (predicate, context) pair produced by expanding a semantic value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedPair {
    pub predicate: String,
    pub context: String,
}

/// Rewrites an NL-trigger predicate (e.g. `"is"`) plus its semantic values into a disjunction
/// of (predicate, context) pairs, applied before the axis filters are built.
pub trait QueryExpander: Send + Sync {
    /// True if `predicate` is a registered NL trigger.
    fn is_trigger(&self, predicate: &str) -> bool;

    /// Expands `values` (the predicates following the trigger) into concrete pairs.
    fn expand(&self, trigger: &str, values: &[String]) -> Vec<ExpandedPair>;
}

/// A `QueryExpander` backed by a static table, sufficient for the common case of a handful of
/// registered triggers and values known at startup.
pub struct TableExpander {
    triggers: std::collections::HashMap<String, std::collections::HashMap<String, Vec<ExpandedPair>>>,
}

impl TableExpander {
    pub fn new() -> Self {
        Self { triggers: std::collections::HashMap::new() }
    }

    /// Registers `trigger`/`value` (e.g. `"is"`/`"engineer"`) to expand to `pairs` (e.g.
    /// `[(role, engineer), (title, engineer)]`).
    pub fn register(&mut self, trigger: impl Into<String>, value: impl Into<String>, pairs: Vec<ExpandedPair>) {
        self.triggers.entry(trigger.into()).or_default().insert(value.into(), pairs);
    }
}

impl Default for TableExpander {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryExpander for TableExpander {
    fn is_trigger(&self, predicate: &str) -> bool {
        self.triggers.contains_key(predicate)
    }

    fn expand(&self, trigger: &str, values: &[String]) -> Vec<ExpandedPair> {
        let Some(table) = self.triggers.get(trigger) else {
            return Vec::new();
        };
        values.iter().filter_map(|v| table.get(v)).flat_map(|pairs| pairs.iter().cloned()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_registered_value_to_its_pairs() {
        let mut expander = TableExpander::new();
        expander.register(
            "is",
            "engineer",
            vec![
                ExpandedPair { predicate: "role".to_string(), context: "engineer".to_string() },
                ExpandedPair { predicate: "title".to_string(), context: "engineer".to_string() },
            ],
        );

        assert!(expander.is_trigger("is"));
        let pairs = expander.expand("is", &["engineer".to_string()]);
        assert_eq!(pairs.len(), 2);
    }

    #[test]
    fn unregistered_value_expands_to_nothing() {
        let expander = TableExpander::new();
        assert!(!expander.is_trigger("is"));
        assert!(expander.expand("is", &["engineer".to_string()]).is_empty());
    }
}
