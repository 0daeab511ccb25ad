//! In-process task scheduler: a bounded FIFO served by a pool of workers.
//!
//! Tasks carry an opaque payload and a category; handlers register once and
//! are matched per task via [`TaskHandler::accept`]. The scheduler gives no
//! ordering guarantee between tasks and no retries; serialization of work on
//! a single run is the run handler's job (status guards), not the queue's.

use std::sync::Arc;

use futures::FutureExt;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// A unit of background work.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_id: String,
    pub category: String,
    pub payload: Vec<u8>,
}

impl Task {
    pub fn new(task_id: impl Into<String>, category: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            task_id: task_id.into(),
            category: category.into(),
            payload,
        }
    }
}

pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    /// Whether this handler takes the task. The first accepting handler wins.
    fn accept(&self, task: &Task) -> bool;

    /// Process one task. Errors are logged and the task is dropped; retry is
    /// the handler's own concern.
    async fn handle(&self, task: Task) -> Result<(), HandlerError>;
}

/// What `enqueue` does when the queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnqueuePolicy {
    /// Wait for a slot.
    #[default]
    Block,
    /// Fail fast with [`SchedulerError::QueueFull`].
    Reject,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub enqueue_policy: EnqueuePolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 64,
            enqueue_policy: EnqueuePolicy::Block,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("task queue is full")]
    QueueFull,

    #[error("scheduler is shutting down")]
    ShuttingDown,
}

/// Bounded multi-worker task queue.
pub struct TaskScheduler {
    tx: std::sync::Mutex<Option<mpsc::Sender<Task>>>,
    policy: EnqueuePolicy,
    shutdown: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Spawn the worker pool and return the running scheduler.
    pub fn start(config: SchedulerConfig, handlers: Vec<Arc<dyn TaskHandler>>) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Task>(config.queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let handlers = Arc::new(handlers);

        let mut workers = Vec::with_capacity(config.workers.max(1));
        for worker_id in 0..config.workers.max(1) {
            let rx = rx.clone();
            let handlers = handlers.clone();
            workers.push(tokio::spawn(async move {
                worker_loop(worker_id, rx, handlers).await;
            }));
        }

        Arc::new(Self {
            tx: std::sync::Mutex::new(Some(tx)),
            policy: config.enqueue_policy,
            shutdown: CancellationToken::new(),
            workers: Mutex::new(workers),
        })
    }

    fn sender(&self) -> Result<mpsc::Sender<Task>, SchedulerError> {
        self.tx
            .lock()
            .expect("sender lock poisoned")
            .clone()
            .ok_or(SchedulerError::ShuttingDown)
    }

    /// Queue a task for execution.
    ///
    /// Waits for a slot while the queue is full under
    /// [`EnqueuePolicy::Block`]; fails with [`SchedulerError::QueueFull`]
    /// under [`EnqueuePolicy::Reject`].
    pub async fn enqueue(&self, task: Task) -> Result<(), SchedulerError> {
        if self.shutdown.is_cancelled() {
            return Err(SchedulerError::ShuttingDown);
        }
        let tx = self.sender()?;
        debug!(task_id = %task.task_id, category = %task.category, "enqueue task");
        match self.policy {
            EnqueuePolicy::Block => {
                tokio::select! {
                    _ = self.shutdown.cancelled() => Err(SchedulerError::ShuttingDown),
                    sent = tx.send(task) => sent.map_err(|_| SchedulerError::ShuttingDown),
                }
            }
            EnqueuePolicy::Reject => tx.try_send(task).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => SchedulerError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => SchedulerError::ShuttingDown,
            }),
        }
    }

    /// Stop intake, drain queued tasks, and join the workers.
    ///
    /// Every task accepted before shutdown runs at least once; tasks enqueued
    /// afterwards are refused.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        // Dropping the sole sender closes the channel once drained.
        self.tx.lock().expect("sender lock poisoned").take();
        let mut workers = self.workers.lock().await;
        for worker in workers.drain(..) {
            if let Err(e) = worker.await {
                if !e.is_cancelled() {
                    warn!(error = %e, "scheduler worker exited abnormally");
                }
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<Task>>>,
    handlers: Arc<Vec<Arc<dyn TaskHandler>>>,
) {
    loop {
        let task = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(task) = task else {
            debug!(worker_id, "task queue closed, worker exiting");
            break;
        };

        let Some(handler) = handlers.iter().find(|h| h.accept(&task)) else {
            warn!(worker_id, task_id = %task.task_id, category = %task.category,
                "no handler accepts task, dropping");
            continue;
        };

        let task_id = task.task_id.clone();
        match std::panic::AssertUnwindSafe(handler.handle(task))
            .catch_unwind()
            .await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(worker_id, task_id = %task_id, error = %e, "task handler failed");
            }
            Err(_) => {
                error!(worker_id, task_id = %task_id, "task handler panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    struct CountingHandler {
        category: &'static str,
        handled: AtomicUsize,
        done: Notify,
    }

    impl CountingHandler {
        fn new(category: &'static str) -> Arc<Self> {
            Arc::new(Self {
                category,
                handled: AtomicUsize::new(0),
                done: Notify::new(),
            })
        }
    }

    #[async_trait::async_trait]
    impl TaskHandler for CountingHandler {
        fn accept(&self, task: &Task) -> bool {
            task.category == self.category
        }

        async fn handle(&self, _task: Task) -> Result<(), HandlerError> {
            self.handled.fetch_add(1, Ordering::SeqCst);
            self.done.notify_waiters();
            Ok(())
        }
    }

    struct PanickingHandler;

    #[async_trait::async_trait]
    impl TaskHandler for PanickingHandler {
        fn accept(&self, task: &Task) -> bool {
            task.category == "boom"
        }

        async fn handle(&self, _task: Task) -> Result<(), HandlerError> {
            panic!("handler exploded");
        }
    }

    fn task(category: &str, n: usize) -> Task {
        Task::new(format!("t{n}"), category, vec![])
    }

    #[tokio::test]
    async fn dispatches_by_category() {
        let alpha = CountingHandler::new("alpha");
        let beta = CountingHandler::new("beta");
        let scheduler = TaskScheduler::start(
            SchedulerConfig::default(),
            vec![alpha.clone() as Arc<dyn TaskHandler>, beta.clone()],
        );

        for n in 0..3 {
            scheduler.enqueue(task("alpha", n)).await.unwrap();
        }
        scheduler.enqueue(task("beta", 3)).await.unwrap();
        scheduler.shutdown().await;

        assert_eq!(alpha.handled.load(Ordering::SeqCst), 3);
        assert_eq!(beta.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn shutdown_drains_accepted_tasks_and_refuses_new_ones() {
        let handler = CountingHandler::new("work");
        let scheduler = TaskScheduler::start(
            SchedulerConfig {
                workers: 2,
                queue_capacity: 16,
                enqueue_policy: EnqueuePolicy::Block,
            },
            vec![handler.clone() as Arc<dyn TaskHandler>],
        );

        for n in 0..8 {
            scheduler.enqueue(task("work", n)).await.unwrap();
        }
        scheduler.shutdown().await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 8);

        let err = scheduler.enqueue(task("work", 99)).await.unwrap_err();
        assert!(matches!(err, SchedulerError::ShuttingDown));
    }

    #[tokio::test]
    async fn panicking_handler_does_not_kill_the_worker() {
        let counting = CountingHandler::new("work");
        let scheduler = TaskScheduler::start(
            SchedulerConfig {
                workers: 1,
                ..SchedulerConfig::default()
            },
            vec![
                Arc::new(PanickingHandler) as Arc<dyn TaskHandler>,
                counting.clone(),
            ],
        );

        scheduler.enqueue(task("boom", 0)).await.unwrap();
        scheduler.enqueue(task("work", 1)).await.unwrap();
        scheduler.shutdown().await;

        assert_eq!(counting.handled.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unmatched_tasks_are_dropped() {
        let handler = CountingHandler::new("known");
        let scheduler =
            TaskScheduler::start(
                SchedulerConfig::default(),
                vec![handler.clone() as Arc<dyn TaskHandler>],
            );
        scheduler.enqueue(task("unknown", 0)).await.unwrap();
        scheduler.enqueue(task("known", 1)).await.unwrap();
        scheduler.shutdown().await;
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
    }
}
