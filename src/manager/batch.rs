//! Sequential batch execution with per-item outcomes.

use std::future::Future;

use serde::Serialize;

use crate::error::ManagerError;
use crate::pool::ProgressObserver;

/// Outcome of one batch item. A failed item does not fail the batch.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum BatchOutcome<T> {
    Success { result: T },
    Failure { error: String },
}

impl<T> BatchOutcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn result(&self) -> Option<&T> {
        match self {
            Self::Success { result } => Some(result),
            Self::Failure { .. } => None,
        }
    }
}

impl<T> From<Result<T, ManagerError>> for BatchOutcome<T> {
    fn from(result: Result<T, ManagerError>) -> Self {
        match result {
            Ok(result) => Self::Success { result },
            Err(e) => Self::Failure {
                error: e.to_string(),
            },
        }
    }
}

/// Run `items` one after another, reporting `completed / total` after each.
pub(super) async fn run_sequential<I, T, F, Fut>(
    items: Vec<I>,
    progress: Option<ProgressObserver>,
    mut run: F,
) -> Vec<BatchOutcome<T>>
where
    F: FnMut(I) -> Fut,
    Fut: Future<Output = Result<T, ManagerError>>,
{
    let total = items.len();
    let mut outcomes = Vec::with_capacity(total);
    for (i, item) in items.into_iter().enumerate() {
        let outcome = BatchOutcome::from(run(item).await);
        if let BatchOutcome::Failure { error } = &outcome {
            tracing::debug!(item = i, error = %error, "Batch item failed");
        }
        outcomes.push(outcome);
        if let Some(observer) = &progress {
            observer((i + 1) as f64 / total as f64);
        }
    }
    outcomes
}
