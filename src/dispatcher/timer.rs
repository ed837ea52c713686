//! Recurring timer on one dedicated thread, driven by `Instant` and a
//! cancellable wait.

use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, Sender};
use crossbeam::select;
use tracing::{debug, warn};

use super::config::Cadence;

/// Builds timers whose driving thread carries the given name.
#[derive(Debug, Clone)]
pub struct Scheduler {
    thread_name: String,
}

impl Scheduler {
    pub fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }

    /// Starts the timer. `job` receives the 1-based firing number.
    ///
    /// `FixedDelay` and `Once` run `job` on the timer thread. `FixedRate` runs
    /// each firing on its own thread so a slow firing never delays the next.
    pub fn schedule<F>(
        &self,
        cadence: Cadence,
        initial_delay: Duration,
        period: Duration,
        job: F,
    ) -> io::Result<ScheduleHandle>
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let (cancel_tx, cancel_rx) = channel::bounded::<()>(0);
        let cancelled = Arc::new(AtomicBool::new(false));
        let fired = Arc::new(AtomicU64::new(0));

        let timer = Timer {
            name: self.thread_name.clone(),
            cadence,
            initial_delay,
            period,
            cancel: cancel_rx,
            cancelled: Arc::clone(&cancelled),
            fired: Arc::clone(&fired),
        };
        let job = Arc::new(job);
        let thread = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || timer.run(job))?;

        Ok(ScheduleHandle {
            cancel: Some(cancel_tx),
            cancelled,
            fired,
            thread: Some(thread),
        })
    }
}

struct Timer {
    name: String,
    cadence: Cadence,
    initial_delay: Duration,
    period: Duration,
    cancel: Receiver<()>,
    cancelled: Arc<AtomicBool>,
    fired: Arc<AtomicU64>,
}

impl Timer {
    fn run<F>(self, job: Arc<F>)
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        let mut next = Instant::now() + self.initial_delay;

        loop {
            // Returns early when the handle drops its sender.
            select! {
                recv(self.cancel) -> _ => {}
                recv(channel::at(next)) -> _ => {}
            }
            if self.cancelled.load(Ordering::SeqCst) {
                break;
            }

            let firing = self.fired.fetch_add(1, Ordering::SeqCst) + 1;
            debug!(firing, cadence = ?self.cadence, "timer fired");

            match self.cadence {
                Cadence::Once => {
                    (*job)(firing);
                    break;
                }
                Cadence::FixedDelay => {
                    (*job)(firing);
                    next = Instant::now() + self.period;
                }
                Cadence::FixedRate => {
                    let job = Arc::clone(&job);
                    let spawned = thread::Builder::new()
                        .name(format!("{}-fire-{}", self.name, firing))
                        .spawn(move || (*job)(firing));
                    if let Err(err) = spawned {
                        warn!(firing, %err, "could not spawn firing thread; skipping");
                    }
                    // A late timer fires the missed slots back to back.
                    next += self.period;
                }
            }
        }
        debug!(timer = %self.name, "timer stopped");
    }
}

/// Owner side of a running timer. Dropping it cancels the timer.
#[derive(Debug)]
pub struct ScheduleHandle {
    cancel: Option<Sender<()>>,
    cancelled: Arc<AtomicBool>,
    fired: Arc<AtomicU64>,
    thread: Option<JoinHandle<()>>,
}

impl ScheduleHandle {
    /// Stops further firings. Returns at once, even if the timer thread is in
    /// the middle of a firing; work already handed out is left alone.
    pub fn cancel(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.cancel.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::SeqCst)
    }

    /// Whether the timer thread has exited.
    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for ScheduleHandle {
    fn drop(&mut self) {
        self.cancel();
        // Detach; the thread exits after its current firing.
        self.thread.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::wait_until;
    use std::sync::Mutex;

    #[test]
    fn test_once_fires_exactly_once() {
        let scheduler = Scheduler::new("test-timer");
        let handle = scheduler
            .schedule(Cadence::Once, Duration::ZERO, Duration::ZERO, |_| {})
            .unwrap();

        assert!(wait_until(Duration::from_secs(1), || handle.is_finished()));
        assert_eq!(handle.fired(), 1);
    }

    #[test]
    fn test_initial_delay_is_honoured() {
        let started = Instant::now();
        let (tx, rx) = channel::bounded(1);
        let _handle = Scheduler::new("test-timer")
            .schedule(Cadence::Once, Duration::from_millis(100), Duration::ZERO, move |_| {
                let _ = tx.send(Instant::now());
            })
            .unwrap();

        let fired_at = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(fired_at - started >= Duration::from_millis(100));
    }

    #[test]
    fn test_job_runs_on_named_timer_thread() {
        let (tx, rx) = channel::bounded(1);
        let _handle = Scheduler::new("polling-timer")
            .schedule(Cadence::Once, Duration::ZERO, Duration::ZERO, move |_| {
                let _ = tx.send(crate::named::current_thread_label());
            })
            .unwrap();

        assert_eq!(rx.recv_timeout(Duration::from_secs(1)).unwrap(), "polling-timer");
    }

    #[test]
    fn test_fixed_delay_waits_after_job_returns() {
        let stamps = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&stamps);
        let mut handle = Scheduler::new("test-timer")
            .schedule(
                Cadence::FixedDelay,
                Duration::ZERO,
                Duration::from_millis(100),
                move |_| {
                    let start = Instant::now();
                    thread::sleep(Duration::from_millis(50));
                    recorded.lock().unwrap().push((start, Instant::now()));
                },
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(3), || stamps.lock().unwrap().len() >= 3));
        handle.cancel();

        let stamps = stamps.lock().unwrap();
        for pair in stamps.windows(2) {
            let (_, previous_end) = pair[0];
            let (next_start, _) = pair[1];
            assert!(next_start - previous_end >= Duration::from_millis(100));
        }
    }

    #[test]
    fn test_fixed_rate_overlaps_slow_firings() {
        let starts = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&starts);
        let origin = Instant::now();
        let mut handle = Scheduler::new("test-timer")
            .schedule(
                Cadence::FixedRate,
                Duration::ZERO,
                Duration::from_millis(100),
                move |_| {
                    recorded.lock().unwrap().push(Instant::now());
                    thread::sleep(Duration::from_millis(400));
                },
            )
            .unwrap();

        assert!(wait_until(Duration::from_secs(2), || starts.lock().unwrap().len() >= 3));
        handle.cancel();

        let starts = starts.lock().unwrap();
        // The third firing starts while the first is still sleeping.
        assert!(starts[2] - origin < Duration::from_millis(400));
        assert!(starts[1] - starts[0] >= Duration::from_millis(80));
    }

    #[test]
    fn test_cancel_interrupts_long_wait() {
        let mut handle = Scheduler::new("test-timer")
            .schedule(
                Cadence::FixedDelay,
                Duration::from_secs(60),
                Duration::from_secs(60),
                |_| {},
            )
            .unwrap();

        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(wait_until(Duration::from_millis(500), || handle.is_finished()));
        assert_eq!(handle.fired(), 0);
    }
}
