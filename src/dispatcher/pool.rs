//! Bounded worker pool: `capacity` named threads pulling boxed jobs from one
//! crossbeam channel.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::config::PoolConfig;
use crate::error::{PoolError, TaskError};
use crate::named::current_thread_label;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Completion handle for one submitted task.
#[derive(Debug)]
pub struct TaskHandle {
    result: Receiver<Result<(), TaskError>>,
}

impl TaskHandle {
    /// Blocks until the task finishes. A task that was dropped without
    /// running resolves to [`TaskError::Interrupted`].
    pub fn wait(self) -> Result<(), TaskError> {
        self.result.recv().unwrap_or(Err(TaskError::Interrupted))
    }

    /// `None` if the task is still pending after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), TaskError>> {
        match self.result.recv_timeout(timeout) {
            Ok(result) => Some(result),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => Some(Err(TaskError::Interrupted)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    /// Workers that exited inside the grace period.
    pub joined: usize,
    /// Workers still busy when the grace period ran out; left detached.
    pub abandoned: usize,
}

struct Shared {
    active: AtomicUsize,
    abandon: AtomicBool,
}

pub struct WorkerPool {
    sender: RwLock<Option<Sender<Job>>>,
    queue: Receiver<Job>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    exited: Receiver<usize>,
    shared: Arc<Shared>,
    queue_limit: Option<usize>,
}

impl WorkerPool {
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let (sender, queue) = match config.queue_limit {
            Some(limit) => channel::bounded::<Job>(limit),
            None => channel::unbounded::<Job>(),
        };
        let (exited_tx, exited) = channel::unbounded();
        let shared = Arc::new(Shared {
            active: AtomicUsize::new(0),
            abandon: AtomicBool::new(false),
        });

        let mut workers = Vec::with_capacity(config.capacity);
        for id in 1..=config.capacity {
            let jobs = queue.clone();
            let exited_tx = exited_tx.clone();
            let shared = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("{}{}", config.thread_name_prefix, id))
                .spawn(move || worker_loop(id, jobs, exited_tx, shared))?;
            workers.push(handle);
        }
        debug!(
            capacity = config.capacity,
            queue_limit = ?config.queue_limit,
            "worker pool started"
        );

        Ok(Self {
            sender: RwLock::new(Some(sender)),
            queue,
            workers: Mutex::new(workers),
            exited,
            shared,
            queue_limit: config.queue_limit,
        })
    }

    /// Submits a task and returns a handle that resolves when it finishes.
    pub fn submit<F>(&self, task: F) -> Result<TaskHandle, PoolError>
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        self.dispatch(Box::new(move || {
            let _ = tx.send(run_guarded(task));
        }))?;
        Ok(TaskHandle { result: rx })
    }

    /// Fire-and-forget submission. Failures are logged on the worker and dropped.
    pub fn execute<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() -> Result<(), TaskError> + Send + 'static,
    {
        self.dispatch(Box::new(move || {
            if let Err(err) = run_guarded(task) {
                warn!(%err, worker = %current_thread_label(), "task failed; discarding");
            }
        }))
    }

    fn dispatch(&self, job: Job) -> Result<(), PoolError> {
        let guard = self.sender.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let sender = guard.as_ref().ok_or(PoolError::ShutDown)?;

        match self.queue_limit {
            None => sender.send(job).map_err(|_| PoolError::ShutDown),
            Some(limit) => sender.try_send(job).map_err(|err| match err {
                TrySendError::Full(_) => PoolError::Saturated { limit },
                TrySendError::Disconnected(_) => PoolError::ShutDown,
            }),
        }
    }

    /// Tasks currently executing.
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Tasks waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Stops accepting work, waits up to `grace` for the workers to drain the
    /// queue, then abandons whatever is still running. Queued tasks that never
    /// started are dropped and their handles resolve to `Interrupted`.
    pub fn shutdown(&self, grace: Duration) -> ShutdownReport {
        let sender = self
            .sender
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if sender.is_none() {
            return ShutdownReport::default();
        }
        // Disconnects the queue: workers exit once it is empty.
        drop(sender);

        let workers = std::mem::take(
            &mut *self.workers.lock().unwrap_or_else(|poisoned| poisoned.into_inner()),
        );
        let total = workers.len();
        let deadline = Instant::now() + grace;
        // Indexed by worker id - 1.
        let mut reported = vec![false; total];
        let mut joined = 0;

        while joined < total {
            match self.exited.recv_deadline(deadline) {
                Ok(id) => {
                    debug!(worker = id, "worker exited");
                    reported[id - 1] = true;
                    joined += 1;
                }
                Err(_) => break,
            }
        }

        if joined < total {
            self.shared.abandon.store(true, Ordering::SeqCst);
            let dropped = self.queue.try_iter().count();
            warn!(
                abandoned = total - joined,
                dropped_tasks = dropped,
                ?grace,
                "grace period elapsed; abandoning in-flight tasks"
            );
        }

        // Workers can still exit between the deadline and this check.
        let abandoned = workers
            .iter()
            .zip(&reported)
            .filter(|(handle, done)| !**done && !handle.is_finished())
            .count();
        let joined = total - abandoned;
        // Dropping a JoinHandle detaches the thread.
        drop(workers);

        info!(joined, abandoned, "worker pool shut down");
        ShutdownReport { joined, abandoned }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown(Duration::ZERO);
    }
}

fn worker_loop(id: usize, jobs: Receiver<Job>, exited: Sender<usize>, shared: Arc<Shared>) {
    while let Ok(job) = jobs.recv() {
        if shared.abandon.load(Ordering::SeqCst) {
            drop(job);
            continue;
        }
        shared.active.fetch_add(1, Ordering::SeqCst);
        job();
        shared.active.fetch_sub(1, Ordering::SeqCst);
    }
    let _ = exited.send(id);
}

fn run_guarded<F>(task: F) -> Result<(), TaskError>
where
    F: FnOnce() -> Result<(), TaskError>,
{
    match panic::catch_unwind(AssertUnwindSafe(task)) {
        Ok(result) => result,
        Err(payload) => Err(TaskError::from_panic(payload)),
    }
}
