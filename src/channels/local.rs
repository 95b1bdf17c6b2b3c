//! In-process execution channel: one tokio task per worker.
//!
//! Each channel owns an inbox and runs its requests one at a time through a
//! shared [`TaskHandler`], like a dedicated worker thread would. A panicking
//! task body is reported as an error response; the channel keeps running.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::channel::{
    ChannelFactory, ExecutionChannel, ProgressReporter, ResponseSink, WorkerRequest,
    WorkerResponse,
};
use crate::error::{ChannelError, HandlerError};
use crate::handlers::TaskHandler;
use crate::pool::WorkerId;

/// Execution channel backed by a tokio task.
pub struct LocalChannel {
    worker: WorkerId,
    inbox: mpsc::UnboundedSender<WorkerRequest>,
    task: JoinHandle<()>,
}

impl LocalChannel {
    /// Spawn the worker task. Must be called inside a tokio runtime.
    pub fn spawn(handler: Arc<dyn TaskHandler>, responses: ResponseSink) -> Self {
        let worker = responses.worker();
        let (inbox, mut requests) = mpsc::unbounded_channel::<WorkerRequest>();

        let task = tokio::spawn(async move {
            tracing::debug!(worker = %worker, handler = handler.name(), "Local worker started");

            while let Some(request) = requests.recv().await {
                let id = request.id;
                let dispatch = request.dispatch;
                let kind = request.payload.kind();
                let progress = ProgressReporter::new(id, dispatch, responses.clone());

                let outcome = AssertUnwindSafe(handler.handle(request.payload, &progress))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| Err(HandlerError::Panicked(panic_message(&*panic))));

                let response = match outcome {
                    Ok(result) => WorkerResponse::Success {
                        id,
                        dispatch,
                        result,
                    },
                    Err(e) => {
                        tracing::debug!(worker = %worker, task_id = %id, kind, error = %e, "Task body failed");
                        WorkerResponse::Error {
                            id,
                            dispatch,
                            error: e.to_string(),
                        }
                    }
                };
                responses.send(response);
            }
        });

        Self { worker, inbox, task }
    }
}

impl ExecutionChannel for LocalChannel {
    fn post(&self, request: WorkerRequest) -> Result<(), ChannelError> {
        self.inbox.send(request).map_err(|_| ChannelError::Closed {
            worker: self.worker.to_string(),
        })
    }

    fn terminate(&mut self) {
        self.task.abort();
    }
}

impl Drop for LocalChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Factory that gives every worker its own [`LocalChannel`] over one handler.
#[derive(Clone)]
pub struct LocalChannelFactory {
    handler: Arc<dyn TaskHandler>,
}

impl LocalChannelFactory {
    pub fn new(handler: Arc<dyn TaskHandler>) -> Self {
        Self { handler }
    }
}

impl ChannelFactory for LocalChannelFactory {
    fn spawn(
        &self,
        _worker: WorkerId,
        responses: ResponseSink,
    ) -> Result<Box<dyn ExecutionChannel>, ChannelError> {
        Ok(Box::new(LocalChannel::spawn(self.handler.clone(), responses)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::payload::{PatternValidation, TaskPayload};
    use crate::pool::TaskId;

    struct Echo;

    #[async_trait]
    impl TaskHandler for Echo {
        fn name(&self) -> &str {
            "echo"
        }

        async fn handle(
            &self,
            payload: TaskPayload,
            progress: &ProgressReporter,
        ) -> Result<serde_json::Value, HandlerError> {
            match payload {
                TaskPayload::Validate(v) if v.pattern == "panic" => panic!("bad pattern"),
                TaskPayload::Validate(v) if v.pattern == "fail" => {
                    Err(HandlerError::InvalidInput("fail".into()))
                }
                TaskPayload::Validate(v) => {
                    progress.report(0.5);
                    Ok(json!({ "pattern": v.pattern }))
                }
                other => Err(HandlerError::Unsupported {
                    handler: "echo".into(),
                    task_type: other.kind().into(),
                }),
            }
        }
    }

    fn request(pattern: &str) -> WorkerRequest {
        WorkerRequest {
            id: TaskId::new(),
            dispatch: 9,
            payload: TaskPayload::Validate(PatternValidation {
                pattern: pattern.into(),
                flags: String::new(),
            }),
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<crate::channels::WorkerEvent>) -> WorkerResponse {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out")
            .expect("channel closed")
            .response
    }

    #[tokio::test]
    async fn runs_requests_and_reports_progress() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let factory = LocalChannelFactory::new(Arc::new(Echo));
        let worker = WorkerId::new();
        let channel = factory.spawn(worker, ResponseSink::new(worker, tx)).unwrap();

        let req = request("a+");
        let id = req.id;
        channel.post(req).unwrap();

        assert_eq!(
            next(&mut rx).await,
            WorkerResponse::Progress {
                id,
                dispatch: 9,
                progress: 0.5
            }
        );
        assert_eq!(
            next(&mut rx).await,
            WorkerResponse::Success {
                id,
                dispatch: 9,
                result: json!({ "pattern": "a+" })
            }
        );
    }

    #[tokio::test]
    async fn errors_and_panics_become_error_responses() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let worker = WorkerId::new();
        let channel = LocalChannel::spawn(Arc::new(Echo), ResponseSink::new(worker, tx));

        channel.post(request("fail")).unwrap();
        assert!(matches!(next(&mut rx).await, WorkerResponse::Error { .. }));

        channel.post(request("panic")).unwrap();
        match next(&mut rx).await {
            WorkerResponse::Error { error, .. } => assert!(error.contains("bad pattern")),
            other => panic!("expected error, got {other:?}"),
        }

        // Still alive after the panic.
        channel.post(request("ok")).unwrap();
        assert!(matches!(next(&mut rx).await, WorkerResponse::Success { .. }));
    }

    #[tokio::test]
    async fn post_after_terminate_fails() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let worker = WorkerId::new();
        let mut channel = LocalChannel::spawn(Arc::new(Echo), ResponseSink::new(worker, tx));
        channel.terminate();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(matches!(
            channel.post(request("a")),
            Err(ChannelError::Closed { .. })
        ));
    }
}
