//! Worker pool: priority queue, dispatch, timeouts, retries, replacement.
//!
//! A `WorkerPool` is a cheap handle over a single coordinator task that owns
//! every piece of pool state (workers, pending queue, active index, result
//! registry). The coordinator reacts to one event at a time from three
//! sources:
//! - commands from the handle (submit, cancel, resize, stats, shutdown)
//! - timer events, sent by per-dispatch sleep tasks
//! - worker responses, pushed by execution channels
//!
//! Execution contexts never see coordinator state; they only receive
//! requests and send responses.

use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::queue::PendingQueue;
use super::stats::PoolStats;
use super::task::{Task, TaskId, TaskSpec};
use super::worker::{WorkerId, WorkerInstance, WorkerSnapshot, select_idle};
use crate::channels::{
    ChannelFactory, ExecutionChannel, ResponseSink, WorkerEvent, WorkerRequest, WorkerResponse,
};
use crate::config::PoolConfig;
use crate::error::{ChannelError, PoolError, TransientError};

type TaskResult = Result<Value, PoolError>;

enum Command {
    Submit(Task, oneshot::Sender<TaskResult>),
    Cancel(TaskId, oneshot::Sender<bool>),
    ClearQueue(oneshot::Sender<usize>),
    Resize(usize, oneshot::Sender<Result<usize, PoolError>>),
    Stats(oneshot::Sender<PoolStats>),
    Workers(oneshot::Sender<Vec<WorkerSnapshot>>),
    Timeout { task_id: TaskId, dispatch: u64 },
    BeginShutdown,
    Terminate(oneshot::Sender<()>),
}

/// A submitted task whose outcome has not been awaited yet.
pub struct PendingTask {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult>,
}

impl PendingTask {
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Wait for the task to settle.
    pub async fn wait(self) -> TaskResult {
        self.rx.await.unwrap_or(Err(PoolError::Shutdown))
    }
}

/// A fixed-capacity pool of execution channels for one task domain.
pub struct WorkerPool {
    name: String,
    commands: mpsc::UnboundedSender<Command>,
    shutting_down: Arc<AtomicBool>,
    shutdown_grace: Duration,
    shutdown_poll_interval: Duration,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `config.max_workers` channels and start the coordinator.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        name: impl Into<String>,
        config: PoolConfig,
        factory: Arc<dyn ChannelFactory>,
    ) -> Result<Self, PoolError> {
        config.validate()?;
        let name = name.into();

        let (commands, command_rx) = mpsc::unbounded_channel();
        let (responses, response_rx) = mpsc::unbounded_channel();

        let mut coordinator = Coordinator {
            name: name.clone(),
            config: config.clone(),
            factory,
            workers: Vec::with_capacity(config.max_workers),
            queue: PendingQueue::new(),
            active: HashMap::new(),
            results: HashMap::new(),
            commands: commands.downgrade(),
            responses,
            next_dispatch: 0,
            draining: false,
        };
        for _ in 0..config.max_workers {
            let worker = coordinator.spawn_worker()?;
            coordinator.workers.push(worker);
        }

        tracing::info!(
            pool = %name,
            workers = config.max_workers,
            strategy = ?config.strategy,
            max_retries = config.max_retries,
            "Worker pool started"
        );

        let handle = tokio::spawn(coordinator.run(command_rx, response_rx));

        Ok(Self {
            name,
            commands,
            shutting_down: Arc::new(AtomicBool::new(false)),
            shutdown_grace: config.shutdown_grace,
            shutdown_poll_interval: config.shutdown_poll_interval,
            coordinator: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Queue a task without waiting for its outcome.
    pub fn enqueue(&self, spec: TaskSpec) -> Result<PendingTask, PoolError> {
        if self.is_shutting_down() {
            return Err(PoolError::ShuttingDown);
        }

        let id = TaskId::new();
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Submit(Task::from_spec(id, spec), tx))
            .map_err(|_| PoolError::ShuttingDown)?;

        Ok(PendingTask { id, rx })
    }

    /// Queue a task and wait for its result.
    pub async fn submit(&self, spec: TaskSpec) -> TaskResult {
        self.enqueue(spec)?.wait().await
    }

    /// Cancel a task that is still queued. Dispatched tasks cannot be cancelled.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        self.request(|tx| Command::Cancel(task_id, tx))
            .await
            .unwrap_or(false)
    }

    /// Reject every queued task with `QueueCleared`. Returns how many were removed.
    pub async fn clear_queue(&self) -> usize {
        self.request(Command::ClearQueue).await.unwrap_or(0)
    }

    /// Grow or shrink the pool. Busy workers are never terminated; surplus
    /// busy workers retire when they next become idle.
    pub async fn adjust_pool_size(&self, max_workers: usize) -> Result<usize, PoolError> {
        self.request(|tx| Command::Resize(max_workers, tx))
            .await
            .unwrap_or(Err(PoolError::Shutdown))
    }

    pub async fn stats(&self) -> PoolStats {
        self.request(Command::Stats).await.unwrap_or_default()
    }

    pub async fn workers(&self) -> Vec<WorkerSnapshot> {
        self.request(Command::Workers).await.unwrap_or_default()
    }

    /// Stop accepting work, let active tasks finish within the grace period,
    /// then terminate every worker and reject whatever is left.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!(pool = %self.name, "Worker pool shutting down");
        let _ = self.commands.send(Command::BeginShutdown);

        let deadline = Instant::now() + self.shutdown_grace;
        loop {
            let active = self.stats().await.active_tasks;
            if active == 0 {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(
                    pool = %self.name,
                    active,
                    "Shutdown grace period elapsed with tasks still active"
                );
                break;
            }
            tokio::time::sleep(self.shutdown_poll_interval).await;
        }

        let _ = self.request(Command::Terminate).await;
        if let Some(handle) = self.coordinator.lock().await.take() {
            let _ = handle.await;
        }
        tracing::info!(pool = %self.name, "Worker pool stopped");
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        self.commands.send(make(tx)).ok()?;
        rx.await.ok()
    }
}

struct ActiveTask {
    task: Task,
    worker: WorkerId,
    dispatch: u64,
    timer: JoinHandle<()>,
}

struct Coordinator {
    name: String,
    config: PoolConfig,
    factory: Arc<dyn ChannelFactory>,
    workers: Vec<WorkerInstance>,
    queue: PendingQueue,
    active: HashMap<TaskId, ActiveTask>,
    results: HashMap<TaskId, oneshot::Sender<TaskResult>>,
    /// Weak so that dropping the pool handle stops the coordinator.
    commands: mpsc::WeakUnboundedSender<Command>,
    responses: mpsc::UnboundedSender<WorkerEvent>,
    next_dispatch: u64,
    draining: bool,
}

impl Coordinator {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut responses: mpsc::UnboundedReceiver<WorkerEvent>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(first) = command else {
                        tracing::debug!(pool = %self.name, "Pool handle dropped");
                        self.terminate();
                        return;
                    };
                    // Take every command already sent, so a burst of
                    // submissions is ordered by priority before any dispatch.
                    let mut next = Some(first);
                    while let Some(command) = next {
                        if !matches!(command, Command::Submit(..) | Command::Terminate(_)) {
                            self.schedule();
                        }
                        if self.handle_command(command).is_break() {
                            return;
                        }
                        next = commands.try_recv().ok();
                    }
                }
                Some(event) = responses.recv() => self.handle_response(event),
            }
            self.schedule();
        }
    }

    fn handle_command(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Submit(task, tx) => {
                if self.draining {
                    let _ = tx.send(Err(PoolError::ShuttingDown));
                    return ControlFlow::Continue(());
                }
                tracing::debug!(
                    pool = %self.name,
                    task_id = %task.id,
                    kind = task.kind(),
                    priority = %task.priority,
                    "Task queued"
                );
                self.results.insert(task.id, tx);
                self.queue.push(task);
            }
            Command::Cancel(task_id, reply) => {
                let cancelled = match self.queue.remove(task_id) {
                    Some(_) => {
                        self.settle(task_id, Err(PoolError::Cancelled));
                        tracing::debug!(pool = %self.name, task_id = %task_id, "Task cancelled");
                        true
                    }
                    None => false,
                };
                let _ = reply.send(cancelled);
            }
            Command::ClearQueue(reply) => {
                let cleared: Vec<TaskId> = self.queue.drain().map(|task| task.id).collect();
                for task_id in &cleared {
                    self.settle(*task_id, Err(PoolError::QueueCleared));
                }
                if !cleared.is_empty() {
                    tracing::info!(pool = %self.name, count = cleared.len(), "Queue cleared");
                }
                let _ = reply.send(cleared.len());
            }
            Command::Resize(max_workers, reply) => {
                let _ = reply.send(self.resize(max_workers));
            }
            Command::Stats(reply) => {
                let _ = reply.send(PoolStats::collect(
                    &self.workers,
                    self.queue.len(),
                    self.active.len(),
                ));
            }
            Command::Workers(reply) => {
                let _ = reply.send(self.workers.iter().map(WorkerInstance::snapshot).collect());
            }
            Command::Timeout { task_id, dispatch } => {
                let current = self
                    .active
                    .get(&task_id)
                    .is_some_and(|active| active.dispatch == dispatch);
                if current {
                    let timeout = self.active[&task_id]
                        .task
                        .timeout
                        .unwrap_or(self.config.default_timeout);
                    tracing::warn!(
                        pool = %self.name,
                        task_id = %task_id,
                        timeout_ms = timeout.as_millis() as u64,
                        "Task timed out"
                    );
                    self.fail_attempt(task_id, TransientError::Timeout { timeout });
                }
            }
            Command::BeginShutdown => {
                self.draining = true;
            }
            Command::Terminate(ack) => {
                self.terminate();
                let _ = ack.send(());
                return ControlFlow::Break(());
            }
        }
        ControlFlow::Continue(())
    }

    fn handle_response(&mut self, event: WorkerEvent) {
        let task_id = event.response.task_id();
        let dispatch = event.response.dispatch();
        let current = self.active.get(&task_id).is_some_and(|active| {
            active.worker == event.worker && active.dispatch == dispatch
        });
        if !current {
            // From an abandoned attempt, or the task already settled.
            tracing::debug!(
                pool = %self.name,
                task_id = %task_id,
                worker = %event.worker,
                dispatch,
                "Ignoring stale worker message"
            );
            return;
        }

        match event.response {
            WorkerResponse::Progress { progress, .. } => {
                if let Some(observer) = self.active[&task_id].task.progress.as_ref() {
                    observer(progress.clamp(0.0, 1.0));
                }
            }
            WorkerResponse::Success { result, .. } => {
                if let Some(active) = self.active.remove(&task_id) {
                    active.timer.abort();
                    if let Some(worker) = self.worker_mut(active.worker) {
                        worker.complete();
                    }
                    tracing::debug!(
                        pool = %self.name,
                        task_id = %task_id,
                        kind = active.task.kind(),
                        attempts = active.task.retry_count + 1,
                        "Task completed"
                    );
                    self.settle(task_id, Ok(result));
                    self.retire_if_surplus(active.worker);
                }
            }
            WorkerResponse::Error { error, .. } => {
                self.fail_attempt(task_id, TransientError::Worker(error));
            }
        }
    }

    /// Dispatch queued tasks while idle capacity exists.
    fn schedule(&mut self) {
        if self.draining {
            return;
        }
        while !self.queue.is_empty() && self.active.len() < self.config.max_workers {
            let Some(index) = select_idle(&self.workers, self.config.strategy) else {
                break;
            };
            let Some(task) = self.queue.pop() else {
                break;
            };
            self.dispatch(index, task);
        }
    }

    fn dispatch(&mut self, index: usize, task: Task) {
        let dispatch = self.next_dispatch;
        self.next_dispatch += 1;

        let task_id = task.id;
        let timeout = task.timeout.unwrap_or(self.config.default_timeout);
        let request = WorkerRequest {
            id: task_id,
            dispatch,
            payload: task.payload.clone(),
        };

        let worker = &mut self.workers[index];
        worker.assign(task_id);
        let worker_id = worker.id;
        let posted = worker.channel.post(request);

        tracing::debug!(
            pool = %self.name,
            task_id = %task_id,
            worker = %worker_id,
            kind = task.kind(),
            priority = %task.priority,
            attempt = task.retry_count + 1,
            waited_ms = (chrono::Utc::now() - task.submitted_at).num_milliseconds(),
            "Task dispatched"
        );

        let timer = self.spawn_timer(task_id, dispatch, timeout);
        self.active.insert(
            task_id,
            ActiveTask {
                task,
                worker: worker_id,
                dispatch,
                timer,
            },
        );

        if let Err(e) = posted {
            tracing::warn!(pool = %self.name, task_id = %task_id, worker = %worker_id, error = %e, "Dispatch failed");
            self.fail_attempt(task_id, TransientError::Dispatch(e));
        }
    }

    fn spawn_timer(&self, task_id: TaskId, dispatch: u64, timeout: Duration) -> JoinHandle<()> {
        let commands = self.commands.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(commands) = commands.upgrade() {
                let _ = commands.send(Command::Timeout { task_id, dispatch });
            }
        })
    }

    /// Handle a failed attempt: charge the worker, then retry or reject.
    fn fail_attempt(&mut self, task_id: TaskId, error: TransientError) {
        let Some(active) = self.active.remove(&task_id) else {
            return;
        };
        active.timer.abort();
        self.charge_worker(active.worker);

        let mut task = active.task;
        if task.retry_count < self.config.max_retries {
            task.retry_count += 1;
            tracing::warn!(
                pool = %self.name,
                task_id = %task_id,
                kind = task.kind(),
                retry = task.retry_count,
                max_retries = self.config.max_retries,
                error = %error,
                "Task attempt failed, requeueing"
            );
            self.queue.push_front(task);
        } else {
            let attempts = task.retry_count + 1;
            tracing::error!(
                pool = %self.name,
                task_id = %task_id,
                kind = task.kind(),
                attempts,
                error = %error,
                "Task failed permanently"
            );
            self.settle(
                task_id,
                Err(PoolError::PermanentFailure {
                    task_type: task.kind().to_string(),
                    attempts,
                    last_error: error,
                }),
            );
        }
    }

    /// Count an error against a worker, replacing it past the threshold.
    fn charge_worker(&mut self, worker_id: WorkerId) {
        let Some(index) = self.workers.iter().position(|w| w.id == worker_id) else {
            return;
        };
        if self.workers[index].fail() {
            self.replace_worker(index);
        } else {
            self.retire_if_surplus(worker_id);
        }
    }

    fn replace_worker(&mut self, index: usize) {
        let old_id = self.workers[index].id;
        let errors = self.workers[index].errors;
        self.workers[index].channel.terminate();

        if self.workers.len() > self.config.max_workers {
            self.workers.remove(index);
            tracing::info!(pool = %self.name, worker = %old_id, "Retired failing surplus worker");
            return;
        }

        match self.spawn_worker() {
            Ok(worker) => {
                tracing::warn!(
                    pool = %self.name,
                    old_worker = %old_id,
                    new_worker = %worker.id,
                    errors,
                    "Replaced failing worker"
                );
                self.workers[index] = worker;
            }
            Err(e) => {
                tracing::error!(pool = %self.name, worker = %old_id, error = %e, "Failed to replace worker");
                self.workers.remove(index);
            }
        }
    }

    fn retire_if_surplus(&mut self, worker_id: WorkerId) {
        if self.workers.len() <= self.config.max_workers {
            return;
        }
        if let Some(index) = self
            .workers
            .iter()
            .position(|w| w.id == worker_id && w.is_idle())
        {
            let mut worker = self.workers.remove(index);
            worker.channel.terminate();
            tracing::info!(pool = %self.name, worker = %worker_id, "Retired surplus worker");
        }
    }

    fn resize(&mut self, max_workers: usize) -> Result<usize, PoolError> {
        if max_workers == 0 {
            return Err(PoolError::InvalidPoolSize {
                requested: max_workers,
            });
        }
        let before = self.workers.len();
        self.config.max_workers = max_workers;

        if max_workers > before {
            for _ in before..max_workers {
                let worker = self.spawn_worker()?;
                self.workers.push(worker);
            }
        } else {
            let mut excess = before - max_workers;
            let mut kept = Vec::with_capacity(before);
            for mut worker in self.workers.drain(..) {
                if excess > 0 && worker.is_idle() {
                    worker.channel.terminate();
                    excess -= 1;
                } else {
                    kept.push(worker);
                }
            }
            self.workers = kept;
        }

        tracing::info!(
            pool = %self.name,
            requested = max_workers,
            before,
            after = self.workers.len(),
            "Pool resized"
        );
        Ok(self.workers.len())
    }

    fn spawn_worker(&self) -> Result<WorkerInstance, ChannelError> {
        let id = WorkerId::new();
        let channel = self
            .factory
            .spawn(id, ResponseSink::new(id, self.responses.clone()))?;
        Ok(WorkerInstance::new(id, channel))
    }

    fn worker_mut(&mut self, worker_id: WorkerId) -> Option<&mut WorkerInstance> {
        self.workers.iter_mut().find(|w| w.id == worker_id)
    }

    fn settle(&mut self, task_id: TaskId, outcome: TaskResult) {
        if let Some(tx) = self.results.remove(&task_id) {
            let _ = tx.send(outcome);
        }
    }

    fn terminate(&mut self) {
        for worker in &mut self.workers {
            worker.channel.terminate();
        }
        let workers = self.workers.len();
        self.workers.clear();

        let queued: Vec<TaskId> = self.queue.drain().map(|task| task.id).collect();
        let active: Vec<TaskId> = self
            .active
            .drain()
            .map(|(task_id, active)| {
                active.timer.abort();
                task_id
            })
            .collect();
        for task_id in queued.iter().chain(active.iter()) {
            self.settle(*task_id, Err(PoolError::Shutdown));
        }
        for (_, tx) in self.results.drain() {
            let _ = tx.send(Err(PoolError::Shutdown));
        }

        tracing::debug!(
            pool = %self.name,
            workers,
            rejected_queued = queued.len(),
            rejected_active = active.len(),
            "Coordinator terminated"
        );
    }
}
