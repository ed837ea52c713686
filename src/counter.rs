//! Shared counter with a racy and a locked read-modify-write.
//!
//! The value lives in an `AtomicI64` so the racy path stays free of undefined
//! behaviour: it performs a separate load and store, which loses updates
//! under contention exactly like a plain `value = value + 1` would.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncrementMode {
    Unsynchronized,
    Synchronized,
}

#[derive(Debug, Default)]
pub struct SharedCounter {
    value: AtomicI64,
    lock: Mutex<()>,
}

impl SharedCounter {
    pub fn new(initial: i64) -> Self {
        Self {
            value: AtomicI64::new(initial),
            lock: Mutex::new(()),
        }
    }

    pub fn get_value(&self) -> i64 {
        self.value.load(Ordering::Relaxed)
    }

    /// Read, add one, write back. No exclusion between the read and the write.
    pub fn increment_unsynchronized(&self) {
        let current = self.value.load(Ordering::Relaxed);
        self.value.store(current.wrapping_add(1), Ordering::Relaxed);
    }

    /// Same read-modify-write, with the whole sequence under one lock.
    pub fn increment_synchronized(&self) {
        // The lock guards `()`, so a poisoned lock has no state to corrupt.
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.value.load(Ordering::Relaxed);
        self.value.store(current.wrapping_add(1), Ordering::Relaxed);
    }

    pub fn increment(&self, mode: IncrementMode) {
        match mode {
            IncrementMode::Unsynchronized => self.increment_unsynchronized(),
            IncrementMode::Synchronized => self.increment_synchronized(),
        }
    }
}

/// Spawns `threads` threads that each call `increment(mode)` `per_thread`
/// times, joins all of them, and returns the final value. A thread that
/// panicked is logged and its missing increments show up in the total.
pub fn hammer(
    counter: &Arc<SharedCounter>,
    threads: usize,
    per_thread: usize,
    mode: IncrementMode,
) -> i64 {
    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let counter = Arc::clone(counter);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    counter.increment(mode);
                }
            })
        })
        .collect();

    join_all(handles);
    counter.get_value()
}

/// Joins every handle and returns how many of the threads panicked.
fn join_all(handles: Vec<thread::JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    for (index, handle) in handles.into_iter().enumerate() {
        if handle.join().is_err() {
            warn!(thread = index, "counter thread panicked before finishing");
            panicked += 1;
        }
    }
    panicked
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_thread_unsynchronized_is_exact() {
        let counter = Arc::new(SharedCounter::new(0));
        assert_eq!(hammer(&counter, 1, 1_000, IncrementMode::Unsynchronized), 1_000);
    }

    #[test]
    fn test_synchronized_is_exact_under_contention() {
        let counter = Arc::new(SharedCounter::new(0));
        assert_eq!(hammer(&counter, 1_000, 1_000, IncrementMode::Synchronized), 1_000_000);
    }

    #[test]
    fn test_unsynchronized_never_exceeds_expected() {
        for _ in 0..3 {
            let counter = Arc::new(SharedCounter::new(0));
            let value = hammer(&counter, 1_000, 1_000, IncrementMode::Unsynchronized);
            assert!(value <= 1_000_000, "got {value}");
            assert!(value > 0);
        }
    }

    #[test]
    fn test_initial_value_is_preserved() {
        let counter = Arc::new(SharedCounter::new(41));
        counter.increment_synchronized();
        assert_eq!(counter.get_value(), 42);
    }

    #[test]
    fn test_join_all_reports_panicked_threads() {
        let handles = vec![
            thread::spawn(|| {}),
            thread::spawn(|| panic!("counter thread failed")),
            thread::spawn(|| {}),
        ];
        assert_eq!(join_all(handles), 1);
    }

    #[test]
    fn test_increment_wraps_at_max() {
        let counter = SharedCounter::new(i64::MAX);
        counter.increment_unsynchronized();
        assert_eq!(counter.get_value(), i64::MIN);

        let counter = SharedCounter::new(i64::MAX);
        counter.increment_synchronized();
        assert_eq!(counter.get_value(), i64::MIN);
    }

    #[test]
    fn test_synchronized_survives_poisoned_lock() {
        let counter = Arc::new(SharedCounter::new(0));
        let clone = Arc::clone(&counter);
        let _ = thread::spawn(move || {
            let _guard = clone.lock.lock().unwrap();
            panic!("poison the counter lock");
        })
        .join();

        counter.increment_synchronized();
        assert_eq!(counter.get_value(), 1);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_synchronized_total_is_threads_times_calls(
            initial in -1_000i64..1_000,
            threads in 1usize..16,
            per_thread in 0usize..200,
        ) {
            let counter = Arc::new(SharedCounter::new(initial));
            let value = hammer(&counter, threads, per_thread, IncrementMode::Synchronized);
            prop_assert_eq!(value, initial + (threads * per_thread) as i64);
        }
    }
}
