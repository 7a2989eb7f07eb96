//! Worker and reply execution contexts.
//!
//! Blocking filesystem work runs on a [`WorkerPool`]. Results come back to
//! the originating context through a [`ReplyLoop`], which only runs replies
//! when its owner drives it. A [`Relay`] ties the two together and is what
//! the dispatch functions submit to.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender, TrySendError};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use relayfs_core::RelayConfig;

/// A unit of work posted to an execution context.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Errors raised while setting up execution contexts.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// A worker thread could not be spawned.
    #[error("Failed to spawn worker thread '{name}': {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

/// The "submit work, get a reply" capability.
///
/// Both methods return `false` when the work could not be queued, in which
/// case neither closure ever runs.
pub trait TaskRunner: Send + Sync {
    /// Run `task` on the worker context.
    fn post_task(&self, task: Task) -> bool;

    /// Run `task` on the worker context, then `reply` on the originating
    /// context. `reply` never runs before `task` has returned.
    fn post_task_and_reply(&self, task: Task, reply: Task) -> bool;
}

impl<T: TaskRunner + ?Sized> TaskRunner for Arc<T> {
    fn post_task(&self, task: Task) -> bool {
        (**self).post_task(task)
    }

    fn post_task_and_reply(&self, task: Task, reply: Task) -> bool {
        (**self).post_task_and_reply(task, reply)
    }
}

/// Run `work` on the worker context and hand its return value to `reply`
/// on the originating context.
///
/// `reply` receives `None` if `work` panicked.
pub fn post_task_and_reply_with_result<R, T, W, P>(runner: &R, work: W, reply: P) -> bool
where
    R: TaskRunner + ?Sized,
    T: Send + 'static,
    W: FnOnce() -> T + Send + 'static,
    P: FnOnce(Option<T>) + Send + 'static,
{
    let (tx, mut rx) = oneshot::channel();
    runner.post_task_and_reply(
        Box::new(move || {
            let _ = tx.send(work());
        }),
        Box::new(move || reply(rx.try_recv().ok())),
    )
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        *msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "unknown panic"
    }
}

/// Fixed set of named worker threads fed from a bounded queue.
///
/// Submission never blocks: when the queue is full or the pool has been shut
/// down, [`WorkerPool::execute`] returns `false`. A panicking task is logged
/// and does not take its worker down.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn the pool described by `config`.
    pub fn new(config: &RelayConfig) -> Result<Self, RunnerError> {
        let threads = if config.worker_threads == 0 {
            num_cpus::get()
        } else {
            config.worker_threads
        };
        let (tx, rx) = channel::bounded::<Task>(config.queue_capacity.max(1));

        let mut workers = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let rx = rx.clone();
            let name = format!("{}-{}", config.thread_name, worker_id);
            let thread_name = name.clone();
            let handle = thread::Builder::new()
                .name(name.clone())
                .spawn(move || {
                    tracing::debug!(worker = %thread_name, "worker started");
                    while let Ok(task) = rx.recv() {
                        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                            tracing::error!(
                                worker = %thread_name,
                                "task panicked: {}",
                                panic_message(payload.as_ref())
                            );
                        }
                    }
                    tracing::debug!(worker = %thread_name, "worker shutting down");
                })
                .map_err(|source| RunnerError::Spawn { name, source })?;
            workers.push(handle);
        }

        Ok(Self {
            name: config.thread_name.clone(),
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue `task` for execution on one of the workers.
    pub fn execute(&self, task: Task) -> bool {
        let Ok(guard) = self.sender.lock() else {
            return false;
        };
        let Some(sender) = guard.as_ref() else {
            tracing::debug!(pool = %self.name, "rejecting task: pool is shut down");
            return false;
        };
        match sender.try_send(task) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(pool = %self.name, "rejecting task: queue is full");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                tracing::warn!(pool = %self.name, "rejecting task: workers are gone");
                false
            }
        }
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.sender
            .lock()
            .ok()
            .and_then(|sender| sender.as_ref().map(Sender::len))
            .unwrap_or(0)
    }

    /// Number of worker threads still attached to the pool.
    pub fn thread_count(&self) -> usize {
        self.workers.lock().map(|workers| workers.len()).unwrap_or(0)
    }

    /// Stop accepting tasks, let queued tasks finish, and join the workers.
    ///
    /// Must not be called from inside a task running on this pool; the
    /// calling worker is skipped rather than joined.
    pub fn shutdown(&self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        let workers = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => return,
        };
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable sender side of a [`ReplyLoop`].
#[derive(Debug, Clone)]
pub struct ReplyHandle {
    tx: mpsc::UnboundedSender<Task>,
}

impl ReplyHandle {
    /// Queue `reply` on the originating context. Returns `false` if the
    /// loop no longer exists, in which case `reply` is dropped.
    pub fn post(&self, reply: Task) -> bool {
        self.tx.send(reply).is_ok()
    }
}

/// The originating execution context.
///
/// Replies queue up here and run only when the owner calls one of the
/// `run_*` methods, so a callback can never run inline with the call that
/// submitted its operation.
#[derive(Debug)]
pub struct ReplyLoop {
    tx: mpsc::UnboundedSender<Task>,
    rx: mpsc::UnboundedReceiver<Task>,
}

impl ReplyLoop {
    /// Create an empty loop.
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self { tx, rx }
    }

    /// A handle for posting replies to this loop.
    pub fn handle(&self) -> ReplyHandle {
        ReplyHandle {
            tx: self.tx.clone(),
        }
    }

    /// Run every reply that is already queued, without waiting.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(reply) = self.rx.try_recv() {
            reply();
            ran += 1;
        }
        ran
    }

    /// Wait for the next reply and run it.
    pub async fn run_one(&mut self) -> bool {
        match self.rx.recv().await {
            Some(reply) => {
                reply();
                true
            }
            None => false,
        }
    }

    /// Wait for and run exactly `count` replies.
    pub async fn run_until(&mut self, count: usize) {
        for _ in 0..count {
            if !self.run_one().await {
                break;
            }
        }
    }

    /// Blocking variant of [`ReplyLoop::run_one`] for synchronous callers.
    ///
    /// Panics if called from within an async runtime.
    pub fn blocking_run_one(&mut self) -> bool {
        match self.rx.blocking_recv() {
            Some(reply) => {
                reply();
                true
            }
            None => false,
        }
    }
}

impl Default for ReplyLoop {
    fn default() -> Self {
        Self::new()
    }
}

/// A worker pool bound to the reply loop results should return to.
#[derive(Debug, Clone)]
pub struct Relay {
    pool: Arc<WorkerPool>,
    origin: ReplyHandle,
}

impl Relay {
    /// Bind `pool` to the loop behind `origin`.
    pub fn new(pool: Arc<WorkerPool>, origin: ReplyHandle) -> Self {
        Self { pool, origin }
    }

    /// The underlying pool.
    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }
}

impl TaskRunner for Relay {
    fn post_task(&self, task: Task) -> bool {
        self.pool.execute(task)
    }

    fn post_task_and_reply(&self, task: Task, reply: Task) -> bool {
        let origin = self.origin.clone();
        self.pool.execute(Box::new(move || {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(task)) {
                tracing::error!(
                    "task panicked, delivering reply anyway: {}",
                    panic_message(payload.as_ref())
                );
            }
            if !origin.post(reply) {
                tracing::debug!("reply loop is gone, dropping reply");
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn single_worker(capacity: usize) -> WorkerPool {
        let config = RelayConfig::builder()
            .worker_threads(1usize)
            .queue_capacity(capacity)
            .build()
            .unwrap();
        WorkerPool::new(&config).unwrap()
    }

    #[test]
    fn test_pool_runs_tasks() {
        let pool = single_worker(8);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            assert!(pool.execute(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })));
        }
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_pool_rejects_after_shutdown() {
        let pool = single_worker(8);
        pool.shutdown();
        assert!(!pool.execute(Box::new(|| {})));
        assert_eq!(pool.thread_count(), 0);
    }

    #[test]
    fn test_pool_rejects_when_full() {
        let pool = single_worker(1);
        let (block_tx, block_rx) = crossbeam::channel::bounded::<()>(0);
        let (started_tx, started_rx) = crossbeam::channel::bounded::<()>(1);

        // Occupy the only worker, then fill the single queue slot.
        assert!(pool.execute(Box::new(move || {
            let _ = started_tx.send(());
            let _ = block_rx.recv();
        })));
        started_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(pool.execute(Box::new(|| {})));
        assert!(!pool.execute(Box::new(|| {})));
        assert_eq!(pool.queued(), 1);

        drop(block_tx);
        pool.shutdown();
    }

    #[test]
    fn test_pool_survives_panicking_task() {
        let pool = single_worker(8);
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(pool.execute(Box::new(|| {
            panic!("boom");
        })));
        let after = Arc::clone(&counter);
        assert!(pool.execute(Box::new(move || {
            after.fetch_add(1, Ordering::SeqCst);
        })));
        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replies_wait_for_the_loop() {
        let pool = Arc::new(single_worker(8));
        let mut origin = ReplyLoop::new();
        let relay = Relay::new(Arc::clone(&pool), origin.handle());
        let replied = Arc::new(AtomicUsize::new(0));

        let seen = Arc::clone(&replied);
        assert!(post_task_and_reply_with_result(
            &relay,
            || 21 * 2,
            move |value| {
                assert_eq!(value, Some(42));
                seen.fetch_add(1, Ordering::SeqCst);
            },
        ));

        pool.shutdown();
        assert_eq!(replied.load(Ordering::SeqCst), 0);
        assert_eq!(origin.run_pending(), 1);
        assert_eq!(replied.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reply_gets_none_after_panic() {
        let pool = Arc::new(single_worker(8));
        let mut origin = ReplyLoop::new();
        let relay = Relay::new(Arc::clone(&pool), origin.handle());
        let outcome = Arc::new(Mutex::new(None));

        let slot = Arc::clone(&outcome);
        assert!(post_task_and_reply_with_result(
            &relay,
            || -> u32 { panic!("work failed") },
            move |value| {
                *slot.lock().unwrap() = Some(value);
            },
        ));

        pool.shutdown();
        assert_eq!(origin.run_pending(), 1);
        assert_eq!(*outcome.lock().unwrap(), Some(None));
    }
}
