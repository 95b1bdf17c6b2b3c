//! Task types: identity, priority, submission spec.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payload::TaskPayload;

/// Unique identifier for a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dispatch priority. Ordering is `Low < Medium < High < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Observer invoked with a fraction in `[0, 1]` on progress messages.
pub type ProgressObserver = Arc<dyn Fn(f64) + Send + Sync>;

/// What a caller hands to `WorkerPool::submit`.
#[derive(Clone)]
pub struct TaskSpec {
    pub payload: TaskPayload,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub progress: Option<ProgressObserver>,
}

impl TaskSpec {
    /// Spec with the payload's catalog priority and timeout.
    pub fn new(payload: TaskPayload) -> Self {
        Self {
            priority: payload.default_priority(),
            timeout: payload.default_timeout(),
            payload,
            progress: None,
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_progress(mut self, observer: ProgressObserver) -> Self {
        self.progress = Some(observer);
        self
    }
}

impl fmt::Debug for TaskSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSpec")
            .field("type", &self.payload.kind())
            .field("priority", &self.priority)
            .field("timeout", &self.timeout)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// A task owned by the pool coordinator.
///
/// Lives in exactly one of the pending queue or the active index until it
/// settles.
pub(crate) struct Task {
    pub id: TaskId,
    pub payload: TaskPayload,
    pub priority: Priority,
    pub timeout: Option<Duration>,
    pub retry_count: u32,
    pub progress: Option<ProgressObserver>,
    pub submitted_at: DateTime<Utc>,
}

impl Task {
    pub fn from_spec(id: TaskId, spec: TaskSpec) -> Self {
        Self {
            id,
            payload: spec.payload,
            priority: spec.priority,
            timeout: spec.timeout,
            retry_count: 0,
            progress: spec.progress,
            submitted_at: Utc::now(),
        }
    }

    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }
}
