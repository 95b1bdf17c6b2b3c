//! Health probes.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;

use super::Domain;
use crate::payload::{ComplexityAnalysis, PatternValidation, TaskPayload};
use crate::pool::{TaskSpec, WorkerPool};

/// Upper bound for a single probe.
pub(super) const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub issues: Vec<String>,
    /// Probe result per running pool.
    pub pools: BTreeMap<Domain, bool>,
}

impl HealthReport {
    pub(super) fn uninitialized() -> Self {
        Self {
            healthy: false,
            issues: vec!["Worker manager not initialized".to_string()],
            pools: BTreeMap::new(),
        }
    }
}

/// The cheapest meaningful task for a domain.
pub(super) fn probe(domain: Domain) -> TaskPayload {
    match domain {
        Domain::Regex => TaskPayload::Validate(PatternValidation {
            pattern: "test".to_string(),
            flags: String::new(),
        }),
        Domain::Ai => TaskPayload::GetRateLimitStatus,
        Domain::Analysis => TaskPayload::AnalyzeComplexity(ComplexityAnalysis {
            source: String::new(),
            language: None,
        }),
    }
}

/// Run one probe against `pool`. Returns the issue to report, if any.
///
/// A probe still queued when `limit` expires is cancelled.
pub(super) async fn run_probe(
    domain: Domain,
    pool: &WorkerPool,
    limit: Duration,
) -> Option<String> {
    let pending = match pool.enqueue(TaskSpec::new(probe(domain))) {
        Ok(pending) => pending,
        Err(e) => return Some(format!("{domain} pool health check failed: {e}")),
    };
    let id = pending.id();

    match tokio::time::timeout(limit, pending.wait()).await {
        Ok(Ok(_)) => None,
        Ok(Err(e)) => Some(format!("{domain} pool health check failed: {e}")),
        Err(_) => {
            if pool.cancel(id).await {
                tracing::debug!(domain = %domain, task_id = %id, "Cancelled queued health probe");
            }
            Some(format!(
                "{domain} pool health check timed out after {}ms",
                limit.as_millis()
            ))
        }
    }
}
