//! Relay allow-list used to validate relay-attributed samples.

use std::collections::HashMap;

use crate::diagnostic::RelayEndpoint;

/// Allow-list of trusted relay nodes: relay id to the IP it must report.
///
/// Built once at startup and shared read-only. Samples naming a relay whose
/// IP does not match are dropped before reaching the collectors.
#[derive(Debug, Clone, Default)]
pub struct RelayTable {
    nodes: HashMap<i64, String>,
}

impl RelayTable {
    pub fn new(nodes: HashMap<i64, String>) -> Self {
        Self { nodes }
    }

    /// Returns the configured IP for `id`.
    pub fn expected_ip(&self, id: i64) -> Option<&str> {
        self.nodes.get(&id).map(String::as_str)
    }

    /// True when the endpoint's id is configured with exactly its IP.
    /// Ids that are not integers never match.
    pub fn matches(&self, endpoint: &RelayEndpoint) -> bool {
        endpoint
            .id
            .parse::<i64>()
            .ok()
            .and_then(|id| self.expected_ip(id))
            .is_some_and(|ip| ip == endpoint.ip)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl FromIterator<(i64, String)> for RelayTable {
    fn from_iter<I: IntoIterator<Item = (i64, String)>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(ip: &str, id: &str) -> RelayEndpoint {
        RelayEndpoint {
            ip: ip.to_string(),
            id: id.to_string(),
        }
    }

    fn table() -> RelayTable {
        [(1001, "10.0.0.1".to_string()), (1002, "10.0.0.2".to_string())]
            .into_iter()
            .collect()
    }

    #[test]
    fn test_matches_exact_ip() {
        let t = table();
        assert!(t.matches(&endpoint("10.0.0.1", "1001")));
        assert!(t.matches(&endpoint("10.0.0.2", "1002")));
    }

    #[test]
    fn test_rejects_ip_mismatch() {
        let t = table();
        assert!(!t.matches(&endpoint("10.0.0.2", "1001")));
        assert!(!t.matches(&endpoint("10.0.0.1 ", "1001")));
    }

    #[test]
    fn test_rejects_unknown_or_malformed_id() {
        let t = table();
        assert!(!t.matches(&endpoint("10.0.0.1", "9999")));
        assert!(!t.matches(&endpoint("10.0.0.1", "abc")));
        assert!(!t.matches(&endpoint("", "")));
        assert!(!t.matches(&endpoint("10.0.0.1", "-1")));
    }

    #[test]
    fn test_expected_ip() {
        let t = table();
        assert_eq!(t.expected_ip(1001), Some("10.0.0.1"));
        assert_eq!(t.expected_ip(7), None);
        assert_eq!(t.len(), 2);
        assert!(!t.is_empty());
        assert!(RelayTable::default().is_empty());
    }
}
