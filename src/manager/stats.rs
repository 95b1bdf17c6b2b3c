//! Aggregated statistics across domain pools.

use std::collections::BTreeMap;

use serde::Serialize;

use super::Domain;
use crate::payload::RateLimitStatus;
use crate::pool::{PoolStats, WorkerSnapshot};

/// Statistics of one domain. Pool counters are absent when it has no pool.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainStats {
    pub enabled: bool,
    #[serde(flatten)]
    pub pool: Option<PoolStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ManagerStats {
    pub initialized: bool,
    pub pools: BTreeMap<Domain, DomainStats>,
}

impl ManagerStats {
    pub fn domain(&self, domain: Domain) -> Option<&DomainStats> {
        self.pools.get(&domain)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DomainDetail {
    pub enabled: bool,
    #[serde(flatten)]
    pub pool: Option<PoolStats>,
    pub workers: Vec<WorkerSnapshot>,
}

/// [`ManagerStats`] plus per-worker detail and the AI rate-limit window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailedStats {
    pub initialized: bool,
    pub pools: BTreeMap<Domain, DomainDetail>,
    pub ai_rate_limit: Option<RateLimitStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_domain_serializes_without_counters() {
        let stats = ManagerStats {
            initialized: true,
            pools: BTreeMap::from([
                (
                    Domain::Regex,
                    DomainStats {
                        enabled: true,
                        pool: Some(PoolStats {
                            total_workers: 2,
                            idle_workers: 2,
                            ..PoolStats::default()
                        }),
                    },
                ),
                (
                    Domain::Ai,
                    DomainStats {
                        enabled: false,
                        pool: None,
                    },
                ),
            ]),
        };

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["pools"]["regex"]["total_workers"], 2);
        assert_eq!(json["pools"]["regex"]["enabled"], true);
        assert_eq!(json["pools"]["ai"], serde_json::json!({ "enabled": false }));
    }
}
