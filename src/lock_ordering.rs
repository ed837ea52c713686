//! Two resources, two procedures, opposite acquisition order.
//!
//! [`LockOrderingPair`] has no timeout and no detector: if `run_ab` holds R1
//! while `run_ba` holds R2, both threads block forever. [`OrderedPair`] keeps
//! the same procedures but always acquires in ascending [`LockRank`].

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    /// R1 then R2.
    Ab,
    /// R2 then R1.
    Ba,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    HoldingFirst = 1,
    HoldingBoth = 2,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => Phase::HoldingFirst,
            2 => Phase::HoldingBoth,
            _ => Phase::Idle,
        }
    }
}

/// Global acquisition order used by [`OrderedPair`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LockRank {
    R1 = 1,
    R2 = 2,
}

#[derive(Debug, Default)]
struct Resource {
    uses: u64,
}

#[derive(Debug, Default)]
struct ProcState {
    phase: AtomicU8,
    completed: AtomicUsize,
}

impl ProcState {
    fn enter(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }
}

fn lock(resource: &Mutex<Resource>) -> MutexGuard<'_, Resource> {
    resource.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Shared state behind both pair flavours.
#[derive(Debug, Default)]
struct Resources {
    r1: Mutex<Resource>,
    r2: Mutex<Resource>,
    ab: ProcState,
    ba: ProcState,
    hold_delay: Duration,
}

impl Resources {
    fn with_delay(hold_delay: Duration) -> Self {
        Self {
            hold_delay,
            ..Self::default()
        }
    }

    fn state(&self, procedure: Procedure) -> &ProcState {
        match procedure {
            Procedure::Ab => &self.ab,
            Procedure::Ba => &self.ba,
        }
    }

    fn resource(&self, rank: LockRank) -> &Mutex<Resource> {
        match rank {
            LockRank::R1 => &self.r1,
            LockRank::R2 => &self.r2,
        }
    }

    /// Acquires `first`, pauses, acquires `second`, touches both, releases.
    fn run(&self, procedure: Procedure, first: LockRank, second: LockRank) {
        let state = self.state(procedure);

        let mut a = lock(self.resource(first));
        state.enter(Phase::HoldingFirst);
        debug!(?procedure, ?first, "holding first lock");

        if !self.hold_delay.is_zero() {
            thread::sleep(self.hold_delay);
        }

        let mut b = lock(self.resource(second));
        state.enter(Phase::HoldingBoth);
        debug!(?procedure, ?second, "holding both locks");

        a.uses += 1;
        b.uses += 1;
        drop(b);
        drop(a);

        state.enter(Phase::Idle);
        state.completed.fetch_add(1, Ordering::SeqCst);
    }
}

// =============================================================================
// Inconsistent ordering (deadlock-prone)
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct LockOrderingPair {
    inner: Arc<Resources>,
}

impl LockOrderingPair {
    /// `hold_delay` is the pause between the first and the second acquisition.
    /// A non-zero delay makes the circular wait close to certain.
    pub fn new(hold_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Resources::with_delay(hold_delay)),
        }
    }

    pub fn run_ab(&self) {
        self.inner.run(Procedure::Ab, LockRank::R1, LockRank::R2);
    }

    pub fn run_ba(&self) {
        self.inner.run(Procedure::Ba, LockRank::R2, LockRank::R1);
    }

    pub fn phase(&self, procedure: Procedure) -> Phase {
        Phase::from_u8(self.inner.state(procedure).phase.load(Ordering::SeqCst))
    }

    pub fn completed(&self, procedure: Procedure) -> usize {
        self.inner.state(procedure).completed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Global ordering (the fix)
// =============================================================================

#[derive(Debug, Clone, Default)]
pub struct OrderedPair {
    inner: Arc<Resources>,
}

impl OrderedPair {
    pub fn new(hold_delay: Duration) -> Self {
        Self {
            inner: Arc::new(Resources::with_delay(hold_delay)),
        }
    }

    pub fn run_ab(&self) {
        self.run_in_rank_order(Procedure::Ab, LockRank::R1, LockRank::R2);
    }

    /// Wants R2 then R1, but the global order puts R1 first.
    pub fn run_ba(&self) {
        self.run_in_rank_order(Procedure::Ba, LockRank::R2, LockRank::R1);
    }

    fn run_in_rank_order(
        &self,
        procedure: Procedure,
        wanted_first: LockRank,
        wanted_second: LockRank,
    ) {
        let (first, second) = if wanted_first < wanted_second {
            (wanted_first, wanted_second)
        } else {
            (wanted_second, wanted_first)
        };
        self.inner.run(procedure, first, second);
    }

    pub fn phase(&self, procedure: Procedure) -> Phase {
        Phase::from_u8(self.inner.state(procedure).phase.load(Ordering::SeqCst))
    }

    pub fn completed(&self, procedure: Procedure) -> usize {
        self.inner.state(procedure).completed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Anything exposing the two procedures; lets one harness drive both pairs.
pub trait ProcedurePair: Clone + Send + 'static {
    fn run(&self, procedure: Procedure);
    fn phase_of(&self, procedure: Procedure) -> Phase;
}

impl ProcedurePair for LockOrderingPair {
    fn run(&self, procedure: Procedure) {
        match procedure {
            Procedure::Ab => self.run_ab(),
            Procedure::Ba => self.run_ba(),
        }
    }

    fn phase_of(&self, procedure: Procedure) -> Phase {
        self.phase(procedure)
    }
}

impl ProcedurePair for OrderedPair {
    fn run(&self, procedure: Procedure) {
        match procedure {
            Procedure::Ab => self.run_ab(),
            Procedure::Ba => self.run_ba(),
        }
    }

    fn phase_of(&self, procedure: Procedure) -> Phase {
        self.phase(procedure)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlockOutcome {
    Completed,
    Deadlocked { ab: Phase, ba: Phase },
}

/// Runs both procedures on their own threads and waits up to `watchdog` for
/// both to finish. Threads stuck in a circular wait are left detached.
pub fn run_concurrently<P: ProcedurePair>(pair: &P, watchdog: Duration) -> DeadlockOutcome {
    let (done_tx, done_rx) = channel::unbounded();

    for procedure in [Procedure::Ab, Procedure::Ba] {
        let pair = pair.clone();
        let done_tx = done_tx.clone();
        let spawned = thread::Builder::new()
            .name(format!("proc-{procedure:?}").to_lowercase())
            .spawn(move || {
                pair.run(procedure);
                let _ = done_tx.send(procedure);
            });
        if let Err(err) = spawned {
            warn!(?procedure, %err, "could not spawn procedure thread");
        }
    }
    drop(done_tx);

    let deadline = Instant::now() + watchdog;
    let mut finished = 0;
    while finished < 2 {
        match done_rx.recv_deadline(deadline) {
            Ok(_) => finished += 1,
            Err(_) => break,
        }
    }

    if finished == 2 {
        DeadlockOutcome::Completed
    } else {
        let outcome = DeadlockOutcome::Deadlocked {
            ab: pair.phase_of(Procedure::Ab),
            ba: pair.phase_of(Procedure::Ba),
        };
        warn!(?outcome, ?watchdog, "procedures did not finish before the watchdog");
        outcome
    }
}
