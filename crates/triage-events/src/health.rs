//! Broker health reporting.

use serde::{Deserialize, Serialize};

/// Result of a topology query against the configured topics.
///
/// Reachability only: a healthy status means the metadata request succeeded,
/// not that publishes or fetches will.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the broker cluster answered the metadata query.
    pub reachable: bool,
    /// Number of brokers reported in the cluster metadata.
    pub brokers: usize,
    /// Number of topics visible in the queried metadata.
    pub topics: usize,
}

impl HealthStatus {
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.reachable && self.brokers > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reachable_with_brokers() {
        let status = HealthStatus {
            reachable: true,
            brokers: 3,
            topics: 2,
        };
        assert!(status.is_healthy());
    }

    #[test]
    fn test_reachable_without_brokers() {
        let status = HealthStatus {
            reachable: true,
            brokers: 0,
            topics: 0,
        };
        assert!(!status.is_healthy());
    }

    #[test]
    fn test_unreachable() {
        let status = HealthStatus {
            reachable: false,
            brokers: 0,
            topics: 0,
        };
        assert!(!status.is_healthy());
    }
}
