//! Spawning work on a named thread versus calling it directly.
//!
//! Run with: cargo run --bin complete_14_named_thread

use concurrency_lab::named::{current_thread_label, run_inline, spawn_named};

fn report() -> String {
    format!("I am running in: {}", current_thread_label())
}

fn main() -> anyhow::Result<()> {
    concurrency_lab::logging::init(false);

    println!("=== Naming Threads ===\n");
    let handle = spawn_named("My custom name", report)?;
    let spawned = handle
        .join()
        .map_err(|_| anyhow::anyhow!("named thread panicked"))?;
    println!("spawned: {spawned}");
    println!("inline:  {}", run_inline(report));

    println!("\n=== Key Points ===");
    println!("1. thread::Builder sets the name before the thread starts");
    println!("2. Calling the work directly runs it on the caller's thread");
    Ok(())
}
