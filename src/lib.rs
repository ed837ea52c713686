//! # Concurrency Lab
//!
//! Hazard/fix pairs for shared mutable state and scheduled execution.
//!
//! ## Patterns Covered
//!
//! 1. **Lost updates** - [`counter::SharedCounter`] with a racy and a locked increment
//! 2. **Racy lazy init** - [`singleton::RacySingleton`] vs [`singleton::SyncSingleton`]
//! 3. **Lock ordering** - [`lock_ordering::LockOrderingPair`] deadlocks,
//!    [`lock_ordering::OrderedPair`] does not
//! 4. **Periodic fan-out** - [`dispatcher::PeriodicDispatcher`] over a bounded worker pool
//! 5. **Named threads** - [`named::spawn_named`] vs running work inline
//!
//! ## Running Demos
//!
//! ```bash
//! cargo run --bin complete_14_race_condition
//! cargo run --bin complete_14_singleton_race
//! cargo run --bin complete_14_deadlock
//! cargo run --bin complete_14_named_thread
//! cargo run --bin complete_24_polling_job -- --cycles 2
//! ```

pub mod counter;
pub mod dispatcher;
pub mod error;
pub mod lock_ordering;
pub mod logging;
pub mod named;
pub mod singleton;

#[cfg(test)]
mod testing;

pub use counter::{IncrementMode, SharedCounter};
pub use dispatcher::{
    Cadence, CycleReport, DispatcherConfig, PeriodicDispatcher, PoolConfig, ShutdownReport,
    WorkerPool,
};
pub use error::{ConfigError, LabError, PoolError, TaskError};
pub use lock_ordering::{DeadlockOutcome, LockOrderingPair, OrderedPair, Phase, Procedure};
pub use singleton::{InstanceAccessor, RacySingleton, SyncSingleton};
