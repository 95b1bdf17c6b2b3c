//! Pool statistics.

use serde::{Deserialize, Serialize};

use super::worker::WorkerInstance;

/// Counters for one pool.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PoolStats {
    pub total_workers: usize,
    pub idle_workers: usize,
    pub busy_workers: usize,
    pub queued_tasks: usize,
    pub active_tasks: usize,
    pub total_completed_tasks: u64,
    pub total_errors: u64,
    pub average_tasks_per_worker: f64,
}

impl PoolStats {
    pub(crate) fn collect(workers: &[WorkerInstance], queued: usize, active: usize) -> Self {
        let idle = workers.iter().filter(|w| w.is_idle()).count();
        let completed: u64 = workers.iter().map(|w| w.completed).sum();
        let errors: u64 = workers.iter().map(|w| u64::from(w.errors)).sum();
        let average = if workers.is_empty() {
            0.0
        } else {
            completed as f64 / workers.len() as f64
        };

        Self {
            total_workers: workers.len(),
            idle_workers: idle,
            busy_workers: workers.len() - idle,
            queued_tasks: queued,
            active_tasks: active,
            total_completed_tasks: completed,
            total_errors: errors,
            average_tasks_per_worker: average,
        }
    }
}
