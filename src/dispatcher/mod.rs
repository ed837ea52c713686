//! Periodic fan-out of a fixed batch of tasks onto a bounded worker pool.
//!
//! ```text
//!  Scheduler thread            WorkerPool (capacity P)
//!  ───────────────             ───────────────────────
//!  fire #n ──► run_cycle ──► submit K tasks ──► [queue] ──► worker-1..P
//!                 │                                             │
//!                 └── wait on K handles (optional) ◄────────────┘
//! ```
//!
//! With `Cadence::FixedDelay` and `wait_for_completion`, a slow batch pushes
//! the next firing back. With `Cadence::FixedRate` firings overlap.

pub mod config;
pub mod pool;
pub mod timer;

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tracing::{info, warn};

pub use config::{Cadence, DispatcherConfig, PoolConfig};
pub use pool::{ShutdownReport, TaskHandle, WorkerPool};
pub use timer::{ScheduleHandle, Scheduler};

use crate::error::{LabError, PoolError, TaskError};
use crate::named::current_thread_label;

// =============================================================================
// Tasks
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskDescriptor {
    pub cycle: u64,
    pub index: usize,
    pub work: Duration,
}

/// What a task does once a worker picks it up.
pub trait Workload: Send + Sync + 'static {
    fn perform(&self, task: &TaskDescriptor) -> Result<(), TaskError>;
}

/// Sleeps for the descriptor's work duration.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedWork;

impl Workload for SimulatedWork {
    fn perform(&self, task: &TaskDescriptor) -> Result<(), TaskError> {
        if !task.work.is_zero() {
            thread::sleep(task.work);
        }
        Ok(())
    }
}

/// Which worker ran which task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskRecord {
    pub cycle: u64,
    pub task: usize,
    pub worker: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub first_batch: bool,
    /// Thread that ran the dispatch logic.
    pub dispatcher: String,
    /// Offsets from the dispatcher's start.
    pub started_at: Duration,
    pub finished_at: Duration,
    pub submitted: usize,
    /// Only counted when waiting for completion.
    pub completed: usize,
    /// Submission errors plus failed tasks. Without a completion wait the
    /// tasks fail after the cycle finished, so [`PeriodicDispatcher::reports`]
    /// folds in the failures recorded so far.
    pub failed: usize,
    pub waited: bool,
}

// =============================================================================
// Dispatcher
// =============================================================================

struct DispatchState {
    epoch: Instant,
    first_batch: AtomicBool,
    processed: AtomicU64,
    task_failures: AtomicUsize,
    cycle_failures: DashMap<u64, usize>,
    worker_log: DashMap<u64, TaskRecord>,
    reports: Mutex<Vec<CycleReport>>,
}

pub struct PeriodicDispatcher {
    config: DispatcherConfig,
    pool: Arc<WorkerPool>,
    schedule: ScheduleHandle,
    state: Arc<DispatchState>,
}

impl PeriodicDispatcher {
    /// Validates `config`, builds the pool and the scheduler from it, and
    /// starts firing with [`SimulatedWork`].
    pub fn start(config: DispatcherConfig) -> Result<Self, LabError> {
        config.validate()?;
        let pool = Arc::new(WorkerPool::new(config.pool.clone())?);
        let scheduler = Scheduler::new(config.scheduler_thread_name.clone());
        Self::new(config, pool, scheduler, Arc::new(SimulatedWork))
    }

    /// Wires explicitly supplied parts together and starts firing.
    pub fn new(
        config: DispatcherConfig,
        pool: Arc<WorkerPool>,
        scheduler: Scheduler,
        workload: Arc<dyn Workload>,
    ) -> Result<Self, LabError> {
        let state = Arc::new(DispatchState {
            epoch: Instant::now(),
            first_batch: AtomicBool::new(true),
            processed: AtomicU64::new(0),
            task_failures: AtomicUsize::new(0),
            cycle_failures: DashMap::new(),
            worker_log: DashMap::new(),
            reports: Mutex::new(Vec::new()),
        });

        let cycle = Cycle {
            batch_size: config.batch_size,
            task_work: config.task_work(),
            wait: config.wait_for_completion,
            history: config.history_cycles,
            pool: Arc::clone(&pool),
            state: Arc::clone(&state),
            workload,
        };
        let schedule = scheduler
            .schedule(config.cadence, config.initial_delay(), config.period(), move |n| {
                cycle.run(n)
            })
            .map_err(PoolError::Spawn)?;

        info!(
            cadence = ?config.cadence,
            period = ?config.period(),
            batch_size = config.batch_size,
            capacity = config.pool.capacity,
            "dispatcher started"
        );

        Ok(Self {
            config,
            pool,
            schedule,
            state,
        })
    }

    /// Cancels the timer, then shuts the pool down with `grace`.
    pub fn stop(&mut self, grace: Duration) -> ShutdownReport {
        self.schedule.cancel();
        let report = self.pool.shutdown(grace);
        info!(fired = self.fired_cycles(), ?report, "dispatcher stopped");
        report
    }

    /// Stops with the pool's configured `await_termination`.
    pub fn stop_default(&mut self) -> ShutdownReport {
        let grace = self.config.pool.await_termination();
        self.stop(grace)
    }

    /// Cancels the timer only; in-flight and queued tasks keep running.
    pub fn cancel_timer(&mut self) {
        self.schedule.cancel();
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn fired_cycles(&self) -> u64 {
        self.schedule.fired()
    }

    /// Tasks that have started, across all cycles.
    pub fn processed_index(&self) -> u64 {
        self.state.processed.load(Ordering::SeqCst)
    }

    pub fn task_failures(&self) -> usize {
        self.state.task_failures.load(Ordering::SeqCst)
    }

    /// The most recent `history_cycles` finished cycles, ordered by cycle
    /// number.
    pub fn reports(&self) -> Vec<CycleReport> {
        let mut reports = self
            .state
            .reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        for report in reports.iter_mut().filter(|r| !r.waited) {
            if let Some(failures) = self.state.cycle_failures.get(&report.cycle) {
                report.failed += *failures;
            }
        }
        reports.sort_by_key(|r| r.cycle);
        reports
    }

    pub fn worker_log(&self) -> Vec<TaskRecord> {
        let mut records: Vec<_> = self
            .state
            .worker_log
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by_key(|r| (r.cycle, r.task));
        records
    }
}

/// Everything one firing needs, shared by all firings.
struct Cycle {
    batch_size: usize,
    task_work: Duration,
    wait: bool,
    history: usize,
    pool: Arc<WorkerPool>,
    state: Arc<DispatchState>,
    workload: Arc<dyn Workload>,
}

impl Cycle {
    fn run(&self, cycle: u64) {
        let started_at = self.state.epoch.elapsed();
        let first_batch = self.state.first_batch.swap(false, Ordering::SeqCst);
        let dispatcher = current_thread_label();
        info!(cycle, first_batch, %dispatcher, "dispatch cycle started");

        let mut handles = Vec::with_capacity(if self.wait { self.batch_size } else { 0 });
        let mut submitted = 0;
        let mut failed = 0;

        for index in 0..self.batch_size {
            let task = TaskDescriptor {
                cycle,
                index,
                work: self.task_work,
            };
            let job = self.job(task);

            let outcome = if self.wait {
                self.pool.submit(job).map(|handle| handles.push(handle))
            } else {
                self.pool.execute(job)
            };
            match outcome {
                Ok(()) => submitted += 1,
                Err(err) => {
                    warn!(cycle, index, %err, "task not submitted");
                    failed += 1;
                }
            }
        }

        let mut completed = 0;
        for (index, handle) in handles.into_iter().enumerate() {
            match handle.wait() {
                Ok(()) => completed += 1,
                Err(TaskError::Interrupted) => {
                    warn!(cycle, index, "wait for task interrupted");
                    failed += 1;
                }
                Err(err) => {
                    warn!(cycle, index, %err, "task failed");
                    failed += 1;
                }
            }
        }

        let report = CycleReport {
            cycle,
            first_batch,
            dispatcher,
            started_at,
            finished_at: self.state.epoch.elapsed(),
            submitted,
            completed,
            failed,
            waited: self.wait,
        };
        info!(
            cycle,
            submitted,
            completed,
            failed,
            elapsed = ?(report.finished_at - report.started_at),
            "dispatch cycle finished"
        );
        self.record(report);
    }

    /// Stores the report and drops cycles older than the history window.
    fn record(&self, report: CycleReport) {
        let mut reports = self
            .state
            .reports
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        reports.push(report);
        if reports.len() <= self.history {
            return;
        }

        reports.sort_by_key(|r| r.cycle);
        let excess = reports.len() - self.history;
        reports.drain(..excess);
        if let Some(oldest) = reports.first().map(|r| r.cycle) {
            self.state.worker_log.retain(|_, record| record.cycle >= oldest);
            self.state.cycle_failures.retain(|cycle, _| *cycle >= oldest);
        }
    }

    fn job(
        &self,
        task: TaskDescriptor,
    ) -> impl FnOnce() -> Result<(), TaskError> + Send + 'static {
        let state = Arc::clone(&self.state);
        let workload = Arc::clone(&self.workload);
        move || {
            let seq = state.processed.fetch_add(1, Ordering::SeqCst);
            state.worker_log.insert(
                seq,
                TaskRecord {
                    cycle: task.cycle,
                    task: task.index,
                    worker: current_thread_label(),
                },
            );

            let result = workload.perform(&task);
            if result.is_err() {
                state.task_failures.fetch_add(1, Ordering::SeqCst);
                *state.cycle_failures.entry(task.cycle).or_insert(0) += 1;
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wait_until;

    fn config(cadence: Cadence, period_ms: u64, task_work_ms: u64) -> DispatcherConfig {
        DispatcherConfig {
            batch_size: 4,
            cadence,
            period_ms,
            initial_delay_ms: 0,
            wait_for_completion: true,
            task_work_ms,
            scheduler_thread_name: "test-scheduler".to_string(),
            pool: PoolConfig {
                capacity: 2,
                thread_name_prefix: "test-executor-".to_string(),
                ..PoolConfig::default()
            },
            ..DispatcherConfig::default()
        }
    }

    struct AlwaysFails;

    impl Workload for AlwaysFails {
        fn perform(&self, task: &TaskDescriptor) -> Result<(), TaskError> {
            Err(TaskError::failed(format!("task {} refused", task.index)))
        }
    }

    fn with_workload(config: DispatcherConfig, workload: Arc<dyn Workload>) -> PeriodicDispatcher {
        let pool = Arc::new(WorkerPool::new(config.pool.clone()).unwrap());
        let scheduler = Scheduler::new(config.scheduler_thread_name.clone());
        PeriodicDispatcher::new(config, pool, scheduler, workload).unwrap()
    }

    #[test]
    fn test_fixed_delay_waits_for_batch_then_full_period() {
        // 4 tasks of 50ms on 2 workers: each cycle waits ~100ms.
        let mut dispatcher =
            PeriodicDispatcher::start(config(Cadence::FixedDelay, 300, 50)).unwrap();
        assert!(wait_until(Duration::from_secs(5), || dispatcher.reports().len() >= 2));
        dispatcher.stop(Duration::from_secs(1));

        let reports = dispatcher.reports();
        let (first, second) = (&reports[0], &reports[1]);
        assert!(first.finished_at - first.started_at >= Duration::from_millis(100));
        assert!(second.started_at - first.finished_at >= Duration::from_millis(300));
        assert!(second.started_at - first.started_at >= Duration::from_millis(400));
        assert_eq!(first.completed, 4);
        assert_eq!(first.failed, 0);
    }

    #[test]
    fn test_fixed_rate_fires_while_tasks_outstanding() {
        let mut cfg = config(Cadence::FixedRate, 100, 600);
        cfg.wait_for_completion = false;
        cfg.batch_size = 2;
        cfg.pool.capacity = 4;

        let mut dispatcher = PeriodicDispatcher::start(cfg).unwrap();
        assert!(wait_until(Duration::from_secs(2), || dispatcher.reports().len() >= 2));
        let outstanding = dispatcher.pool().active_count();
        dispatcher.stop(Duration::ZERO);

        let reports = dispatcher.reports();
        let gap = reports[1].started_at - reports[0].started_at;
        assert!(gap >= Duration::from_millis(80), "gap {gap:?}");
        assert!(gap < Duration::from_millis(300), "gap {gap:?}");
        assert!(reports[1].started_at < reports[0].started_at + Duration::from_millis(600));
        assert!(outstanding > 0);
    }

    #[test]
    fn test_fixed_rate_with_wait_still_keeps_cadence() {
        let mut cfg = config(Cadence::FixedRate, 100, 500);
        cfg.batch_size = 1;
        cfg.pool.capacity = 4;

        let mut dispatcher = PeriodicDispatcher::start(cfg).unwrap();
        assert!(wait_until(Duration::from_secs(1), || dispatcher.fired_cycles() >= 3));
        // No cycle can have finished its 500ms wait yet.
        assert!(dispatcher.reports().is_empty());
        dispatcher.stop(Duration::ZERO);
    }

    #[test]
    fn test_stop_with_zero_grace_is_prompt() {
        let mut dispatcher =
            PeriodicDispatcher::start(config(Cadence::FixedDelay, 1_000, 5_000)).unwrap();
        assert!(wait_until(Duration::from_secs(1), || dispatcher.pool().active_count() == 2));

        let begin = Instant::now();
        let report = dispatcher.stop(Duration::ZERO);
        assert!(begin.elapsed() < Duration::from_millis(200));
        assert_eq!(report.abandoned, 2);
        assert!(dispatcher.pool().is_shut_down());
    }

    #[test]
    fn test_fire_and_forget_counts_failures_per_cycle() {
        let mut cfg = config(Cadence::FixedDelay, 50, 0);
        cfg.wait_for_completion = false;

        let mut dispatcher = with_workload(cfg, Arc::new(AlwaysFails));
        assert!(wait_until(Duration::from_secs(2), || dispatcher.reports().len() >= 2));
        dispatcher.cancel_timer();
        thread::sleep(Duration::from_millis(100));
        dispatcher.stop(Duration::from_secs(1));

        // The pool has drained, so every submitted task has reported back.
        let reports = dispatcher.reports();
        assert!(reports.len() >= 2);
        assert!(reports.iter().all(|r| r.submitted == 4 && r.failed == 4 && !r.waited));
        assert_eq!(dispatcher.task_failures(), reports.len() * 4);
    }

    #[test]
    fn test_history_keeps_only_recent_cycles() {
        let mut cfg = config(Cadence::FixedDelay, 10, 0);
        cfg.history_cycles = 2;

        let mut dispatcher = PeriodicDispatcher::start(cfg).unwrap();
        assert!(wait_until(Duration::from_secs(2), || dispatcher.fired_cycles() >= 5));
        dispatcher.stop(Duration::from_secs(1));
        thread::sleep(Duration::from_millis(50));

        let reports = dispatcher.reports();
        assert!(reports.len() <= 2);
        let oldest = reports[0].cycle;
        assert!(oldest >= 3, "oldest kept cycle {oldest}");
        assert!(dispatcher.worker_log().iter().all(|r| r.cycle >= oldest));
    }

    #[test]
    fn test_wait_mode_counts_failed_handles() {
        let mut dispatcher = with_workload(config(Cadence::Once, 0, 0), Arc::new(AlwaysFails));
        assert!(wait_until(Duration::from_secs(2), || !dispatcher.reports().is_empty()));
        dispatcher.stop(Duration::from_secs(1));

        let report = &dispatcher.reports()[0];
        assert_eq!(report.submitted, 4);
        assert_eq!(report.completed, 0);
        assert_eq!(report.failed, 4);
    }

    #[test]
    fn test_once_runs_single_cycle_with_first_batch_flag() {
        let mut dispatcher = PeriodicDispatcher::start(config(Cadence::Once, 0, 0)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || !dispatcher.reports().is_empty()));
        thread::sleep(Duration::from_millis(50));
        dispatcher.stop(Duration::from_secs(1));

        let reports = dispatcher.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].first_batch);
        assert_eq!(reports[0].dispatcher, "test-scheduler");
        assert_eq!(dispatcher.fired_cycles(), 1);
    }

    #[test]
    fn test_only_first_cycle_is_first_batch() {
        let mut dispatcher = PeriodicDispatcher::start(config(Cadence::FixedDelay, 20, 0)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || dispatcher.reports().len() >= 3));
        dispatcher.stop(Duration::from_secs(1));

        let flags: Vec<bool> = dispatcher.reports().iter().map(|r| r.first_batch).collect();
        assert!(flags[0]);
        assert!(flags[1..].iter().all(|f| !f));
    }

    #[test]
    fn test_worker_log_records_pool_threads() {
        let mut dispatcher = PeriodicDispatcher::start(config(Cadence::Once, 0, 10)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || !dispatcher.reports().is_empty()));
        dispatcher.stop(Duration::from_secs(1));

        let log = dispatcher.worker_log();
        assert_eq!(log.len(), 4);
        assert_eq!(dispatcher.processed_index(), 4);
        assert!(log.iter().all(|r| r.worker.starts_with("test-executor-")));
        let tasks: Vec<usize> = log.iter().map(|r| r.task).collect();
        assert_eq!(tasks, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_cancel_timer_leaves_pool_running() {
        let mut dispatcher = PeriodicDispatcher::start(config(Cadence::FixedDelay, 20, 0)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || dispatcher.fired_cycles() >= 1));
        dispatcher.cancel_timer();
        thread::sleep(Duration::from_millis(100));
        let fired = dispatcher.fired_cycles();
        thread::sleep(Duration::from_millis(100));

        assert_eq!(dispatcher.fired_cycles(), fired);
        assert!(!dispatcher.pool().is_shut_down());
        assert_eq!(dispatcher.pool().submit(|| Ok(())).unwrap().wait(), Ok(()));
    }

    #[test]
    fn test_start_rejects_invalid_config() {
        assert!(matches!(
            PeriodicDispatcher::start(config(Cadence::FixedDelay, 0, 0)),
            Err(LabError::Config(_))
        ));
    }
}
