//! Content-derived attestation identifiers (ASID).
//!
//! Two creates with identical content-sets yield the same id (§8 round-trip property): the
//! hash input is the four sorted, deduplicated content sets plus the actor set, never the
//! timestamp or `source` — those may legitimately differ between two assertions of the same
//! fact.

use sha2::{Digest, Sha256};

/// Compute the stable id for an attestation from its four content axes.
///
/// Each axis is sorted and deduplicated before hashing so that element order within a set
/// (which the store preserves for display) never affects identity.
pub fn compute_asid(subjects: &[String], predicates: &[String], contexts: &[String], actors: &[String]) -> String {
    let mut hasher = Sha256::new();
    for axis in [subjects, predicates, contexts, actors] {
        let mut sorted: Vec<&str> = axis.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();
        for value in sorted {
            hasher.update(value.as_bytes());
            hasher.update(b"\0");
        }
        hasher.update(b"\x1e"); // axis separator
    }
    let digest = hasher.finalize();
    let hex = format!("{:x}", digest);
    format!("asid_{}", &hex[..24])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_content_yields_identical_id() {
        let a = compute_asid(
            &["Alice".into()],
            &["works_at".into()],
            &["Acme".into()],
            &["user@host".into()],
        );
        let b = compute_asid(
            &["Alice".into()],
            &["works_at".into()],
            &["Acme".into()],
            &["user@host".into()],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn element_order_within_axis_does_not_affect_id() {
        let a = compute_asid(&["Alice".into(), "Bob".into()], &[], &[], &[]);
        let b = compute_asid(&["Bob".into(), "Alice".into()], &[], &[], &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn different_content_yields_different_id() {
        let a = compute_asid(&["Alice".into()], &[], &[], &[]);
        let b = compute_asid(&["Bob".into()], &[], &[], &[]);
        assert_ne!(a, b);
    }
}
