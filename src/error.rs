//! Error types for devpool.

use std::time::Duration;

use crate::manager::Domain;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Execution channel errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChannelError {
    #[error("Execution channel for worker {worker} is closed")]
    Closed { worker: String },

    #[error("Failed to spawn execution channel: {reason}")]
    SpawnFailed { reason: String },
}

/// A failure of one attempt. The pool retries these.
#[derive(Debug, thiserror::Error)]
pub enum TransientError {
    #[error("timed out after {}ms", timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("worker reported: {0}")]
    Worker(String),

    #[error("dispatch failed: {0}")]
    Dispatch(#[from] ChannelError),
}

/// Errors surfaced to callers of a worker pool.
#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("Pool is shutting down, submission refused")]
    ShuttingDown,

    #[error("Task was cancelled")]
    Cancelled,

    #[error("Task was removed by a queue clear")]
    QueueCleared,

    #[error("Pool shut down before the task completed")]
    Shutdown,

    #[error("Task {task_type} failed after {attempts} attempts: {last_error}")]
    PermanentFailure {
        task_type: String,
        attempts: u32,
        #[source]
        last_error: TransientError,
    },

    #[error("Invalid pool size {requested}: a pool needs at least one worker")]
    InvalidPoolSize { requested: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),
}

/// Errors from the multi-pool manager.
#[derive(Debug, thiserror::Error)]
pub enum ManagerError {
    #[error("{domain} worker pool not initialized (domain disabled or missing credentials)")]
    NotInitialized { domain: Domain },

    #[error("Invalid result for {operation}: {source}")]
    InvalidResult {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Errors raised by task bodies running inside an execution channel.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("{handler} handler cannot run {task_type} tasks")]
    Unsupported {
        handler: String,
        task_type: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Backend request failed: {0}")]
    Backend(String),

    #[error("Task body panicked: {0}")]
    Panicked(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
