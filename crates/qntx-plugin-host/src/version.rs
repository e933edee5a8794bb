//! Required-host-version comparison (§4.7): a plugin declares the minimum host version it
//! needs; the host accepts it if its own version is greater than or equal.

/// A minimal `major.minor.patch` version, tolerant of a missing patch/minor component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Version {
    major: u32,
    minor: u32,
    patch: u32,
}

impl Version {
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().trim_start_matches('v');
        let mut parts = s.split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        let patch = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        Some(Self { major, minor, patch })
    }
}

/// True if `host_version` satisfies a plugin's `required_host_version` (host >= required).
/// An unparsable version on either side fails closed (not satisfied) rather than panicking.
pub fn satisfies(host_version: &str, required_host_version: &str) -> bool {
    match (Version::parse(host_version), Version::parse(required_host_version)) {
        (Some(host), Some(required)) => host >= required,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_at_or_above_required_satisfies() {
        assert!(satisfies("1.4.0", "1.2.0"));
        assert!(satisfies("1.2.0", "1.2.0"));
        assert!(!satisfies("1.1.9", "1.2.0"));
    }

    #[test]
    fn tolerates_missing_components() {
        assert!(satisfies("2.0.0", "2"));
        assert!(satisfies("1.3", "1.2.5"));
    }

    #[test]
    fn unparsable_fails_closed() {
        assert!(!satisfies("not-a-version", "1.0.0"));
    }
}
