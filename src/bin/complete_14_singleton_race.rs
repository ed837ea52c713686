//! Racy lazy initialization versus a locked one.
//!
//! Run with: cargo run --bin complete_14_singleton_race

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use colored::Colorize;
use concurrency_lab::singleton::{InstanceAccessor, RacySingleton, SyncSingleton};
use lazy_static::lazy_static;

#[derive(Debug)]
struct AppContext {
    created_on: String,
}

fn slow_context() -> AppContext {
    // Widens the window between the check and the assignment.
    thread::sleep(Duration::from_millis(20));
    AppContext {
        created_on: concurrency_lab::named::current_thread_label(),
    }
}

lazy_static! {
    static ref RACY: RacySingleton<AppContext> = RacySingleton::with_init(slow_context);
    static ref FIXED: SyncSingleton<AppContext> = SyncSingleton::with_init(slow_context);
}

fn race(label: &str, accessor: &'static (dyn InstanceAccessor<AppContext> + Sync), callers: usize) {
    let barrier = Arc::new(Barrier::new(callers));
    let handles: Vec<_> = (0..callers)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            thread::Builder::new()
                .name(format!("caller-{i}"))
                .spawn(move || {
                    barrier.wait();
                    accessor.get_instance()
                })
                .expect("spawn caller thread")
        })
        .collect();

    let instances: Vec<Arc<AppContext>> = handles
        .into_iter()
        .map(|h| h.join().expect("caller thread panicked"))
        .collect();
    let distinct = instances
        .iter()
        .enumerate()
        .filter(|(i, a)| instances[..*i].iter().all(|b| !Arc::ptr_eq(a, b)))
        .count();

    let line = format!(
        "{label:<8} constructions = {}, distinct instances seen = {distinct}, first built on {}",
        accessor.constructions(),
        instances[0].created_on
    );
    if distinct == 1 {
        println!("{}", line.green());
    } else {
        println!("{}", line.red());
    }
}

fn main() {
    concurrency_lab::logging::init(false);

    println!("{}\n", "=== Lazy Singleton Race ===".bold());
    race("racy", &*RACY, 16);
    race("fixed", &*FIXED, 16);

    println!("\n=== Key Points ===");
    println!("1. Checking for None and assigning are two separate steps");
    println!("2. Callers that all see None all construct an instance");
    println!("3. One lock over check, construct and assign yields one instance");
}
