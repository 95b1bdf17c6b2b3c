//! Generic worker pool: prioritized queue, bounded dispatch, retries.

mod pool;
mod queue;
mod stats;
mod task;
mod worker;

pub use pool::{PendingTask, WorkerPool};
pub use stats::PoolStats;
pub use task::{Priority, ProgressObserver, TaskId, TaskSpec};
pub use worker::{MAX_WORKER_ERRORS, WorkerId, WorkerSnapshot};
