//! Execution channel trait and the coordinator ↔ worker message contract.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ChannelError;
use crate::payload::TaskPayload;
use crate::pool::{TaskId, WorkerId};

/// Request posted to an execution context: `{ id, dispatch, type, data }`.
///
/// `dispatch` identifies the attempt; every response must echo it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub id: TaskId,
    pub dispatch: u64,
    #[serde(flatten)]
    pub payload: TaskPayload,
}

/// Message sent back by an execution context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WorkerResponse {
    Success {
        id: TaskId,
        dispatch: u64,
        result: serde_json::Value,
    },
    Error {
        id: TaskId,
        dispatch: u64,
        error: String,
    },
    Progress {
        id: TaskId,
        dispatch: u64,
        progress: f64,
    },
}

impl WorkerResponse {
    pub fn task_id(&self) -> TaskId {
        match self {
            Self::Success { id, .. } | Self::Error { id, .. } | Self::Progress { id, .. } => *id,
        }
    }

    /// The attempt this response belongs to.
    pub fn dispatch(&self) -> u64 {
        match self {
            Self::Success { dispatch, .. }
            | Self::Error { dispatch, .. }
            | Self::Progress { dispatch, .. } => *dispatch,
        }
    }
}

/// A response tagged with the worker that produced it.
#[derive(Debug, Clone)]
pub struct WorkerEvent {
    pub worker: WorkerId,
    pub response: WorkerResponse,
}

/// Where an execution context delivers its responses.
///
/// Cloneable; every clone tags messages with the same worker identity.
#[derive(Debug, Clone)]
pub struct ResponseSink {
    worker: WorkerId,
    tx: mpsc::UnboundedSender<WorkerEvent>,
}

impl ResponseSink {
    pub fn new(worker: WorkerId, tx: mpsc::UnboundedSender<WorkerEvent>) -> Self {
        Self { worker, tx }
    }

    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// Deliver a response. Dropped silently once the pool is gone.
    pub fn send(&self, response: WorkerResponse) {
        let _ = self.tx.send(WorkerEvent {
            worker: self.worker,
            response,
        });
    }
}

/// Progress reporting handle given to a running task body.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    task: TaskId,
    dispatch: u64,
    sink: ResponseSink,
}

impl ProgressReporter {
    pub fn new(task: TaskId, dispatch: u64, sink: ResponseSink) -> Self {
        Self {
            task,
            dispatch,
            sink,
        }
    }

    /// Report completion fraction, clamped to `[0, 1]`.
    pub fn report(&self, fraction: f64) {
        self.sink.send(WorkerResponse::Progress {
            id: self.task,
            dispatch: self.dispatch,
            progress: fraction.clamp(0.0, 1.0),
        });
    }
}

/// An isolated execution context reachable only by message passing.
pub trait ExecutionChannel: Send {
    /// Post a request without waiting for it to run.
    fn post(&self, request: WorkerRequest) -> Result<(), ChannelError>;

    /// Stop the execution context. In-flight work is abandoned.
    fn terminate(&mut self);
}

/// Creates execution channels for a pool.
pub trait ChannelFactory: Send + Sync {
    fn spawn(
        &self,
        worker: WorkerId,
        responses: ResponseSink,
    ) -> Result<Box<dyn ExecutionChannel>, ChannelError>;
}
