//! Worker registry entries and worker selection.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::TaskId;
use crate::channels::ExecutionChannel;
use crate::config::SchedulingStrategy;

/// A worker is replaced once its error count exceeds this.
pub const MAX_WORKER_ERRORS: u32 = 5;

/// Identity of one execution channel. Changes when a worker is replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Bookkeeping for one execution channel, owned by the pool coordinator.
pub(crate) struct WorkerInstance {
    pub id: WorkerId,
    pub channel: Box<dyn ExecutionChannel>,
    pub current_task: Option<TaskId>,
    pub completed: u64,
    pub errors: u32,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl WorkerInstance {
    pub fn new(id: WorkerId, channel: Box<dyn ExecutionChannel>) -> Self {
        let now = Utc::now();
        Self {
            id,
            channel,
            current_task: None,
            completed: 0,
            errors: 0,
            last_used: now,
            created_at: now,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.current_task.is_none()
    }

    pub fn assign(&mut self, task: TaskId) {
        self.current_task = Some(task);
        self.last_used = Utc::now();
    }

    pub fn complete(&mut self) {
        self.current_task = None;
        self.completed += 1;
        self.last_used = Utc::now();
    }

    /// Record a failed attempt. Returns true when the worker must be replaced.
    pub fn fail(&mut self) -> bool {
        self.current_task = None;
        self.errors += 1;
        self.last_used = Utc::now();
        self.errors > MAX_WORKER_ERRORS
    }

    pub fn error_rate(&self) -> f64 {
        f64::from(self.errors) / self.completed.max(1) as f64
    }

    pub fn snapshot(&self) -> WorkerSnapshot {
        WorkerSnapshot {
            id: self.id,
            idle: self.is_idle(),
            current_task: self.current_task,
            completed: self.completed,
            errors: self.errors,
            last_used: self.last_used,
            created_at: self.created_at,
        }
    }
}

/// Read-only view of a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerSnapshot {
    pub id: WorkerId,
    pub idle: bool,
    pub current_task: Option<TaskId>,
    pub completed: u64,
    pub errors: u32,
    pub last_used: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Pick an idle worker index according to `strategy`.
///
/// Ties resolve to registry order. `LeastBusy` compares lifetime completed
/// counts, not live load: every candidate is already idle.
pub(crate) fn select_idle(
    workers: &[WorkerInstance],
    strategy: SchedulingStrategy,
) -> Option<usize> {
    let mut idle = workers
        .iter()
        .enumerate()
        .filter(|(_, worker)| worker.is_idle());

    match strategy {
        SchedulingStrategy::RoundRobin => idle.next().map(|(index, _)| index),
        SchedulingStrategy::LeastBusy => idle
            .min_by_key(|(_, worker)| worker.completed)
            .map(|(index, _)| index),
        SchedulingStrategy::PriorityBased => idle
            .min_by(|(_, a), (_, b)| a.error_rate().total_cmp(&b.error_rate()))
            .map(|(index, _)| index),
    }
}
