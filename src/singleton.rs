//! Lazily constructed shared instance, with and without a race between the
//! "is it set?" check and the assignment.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

type Init<T> = Box<dyn Fn() -> T + Send + Sync>;

/// Accessor shared by both variants so a harness can drive either one.
pub trait InstanceAccessor<T> {
    fn get_instance(&self) -> Arc<T>;

    /// How many times the constructor has run.
    fn constructions(&self) -> usize;
}

// =============================================================================
// Racy: check and assign are separate critical sections
// =============================================================================

pub struct RacySingleton<T> {
    slot: RwLock<Option<Arc<T>>>,
    init: Init<T>,
    constructed: AtomicUsize,
}

impl<T: Default + 'static> RacySingleton<T> {
    pub fn new() -> Self {
        Self::with_init(T::default)
    }
}

impl<T: Default + 'static> Default for RacySingleton<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RacySingleton<T> {
    pub fn with_init<F>(init: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            slot: RwLock::new(None),
            init: Box::new(init),
            constructed: AtomicUsize::new(0),
        }
    }
}

impl<T> InstanceAccessor<T> for RacySingleton<T> {
    fn get_instance(&self) -> Arc<T> {
        let existing = self
            .slot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();
        if let Some(instance) = existing {
            return instance;
        }

        // Another caller may be here at the same time; both construct.
        let fresh = Arc::new((self.init)());
        self.constructed.fetch_add(1, Ordering::SeqCst);

        *self
            .slot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Arc::clone(&fresh));
        fresh
    }

    fn constructions(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Fixed: one lock covers check, construct and assign
// =============================================================================

pub struct SyncSingleton<T> {
    slot: Mutex<Option<Arc<T>>>,
    init: Init<T>,
    constructed: AtomicUsize,
}

impl<T: Default + 'static> SyncSingleton<T> {
    pub fn new() -> Self {
        Self::with_init(T::default)
    }
}

impl<T: Default + 'static> Default for SyncSingleton<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SyncSingleton<T> {
    pub fn with_init<F>(init: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        Self {
            slot: Mutex::new(None),
            init: Box::new(init),
            constructed: AtomicUsize::new(0),
        }
    }
}

impl<T> InstanceAccessor<T> for SyncSingleton<T> {
    fn get_instance(&self) -> Arc<T> {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(instance) = slot.as_ref() {
            return Arc::clone(instance);
        }

        let fresh = Arc::new((self.init)());
        self.constructed.fetch_add(1, Ordering::SeqCst);
        *slot = Some(Arc::clone(&fresh));
        fresh
    }

    fn constructions(&self) -> usize {
        self.constructed.load(Ordering::SeqCst)
    }
}
