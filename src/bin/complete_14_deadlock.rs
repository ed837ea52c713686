//! Two procedures taking the same two locks in opposite order.
//!
//! Run with: cargo run --bin complete_14_deadlock -- --watchdog-ms 2000

use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use concurrency_lab::lock_ordering::{
    run_concurrently, DeadlockOutcome, LockOrderingPair, OrderedPair,
};

#[derive(Parser, Debug)]
#[command(version, about = "Lock ordering deadlock demo")]
struct Args {
    /// Pause between the first and the second lock.
    #[arg(long, default_value_t = 100)]
    hold_ms: u64,

    /// How long to wait before declaring a deadlock.
    #[arg(long, default_value_t = 2_000)]
    watchdog_ms: u64,

    #[arg(short, long)]
    verbose: bool,
}

fn describe(label: &str, outcome: DeadlockOutcome) {
    match outcome {
        DeadlockOutcome::Completed => {
            println!("{label:<10} {}", "both procedures completed".green())
        }
        DeadlockOutcome::Deadlocked { ab, ba } => println!(
            "{label:<10} {} (AB: {ab:?}, BA: {ba:?})",
            "deadlocked".red()
        ),
    }
}

fn main() {
    let args = Args::parse();
    concurrency_lab::logging::init(args.verbose);
    let hold = Duration::from_millis(args.hold_ms);
    let watchdog = Duration::from_millis(args.watchdog_ms);

    println!("{}\n", "=== Deadlock via Lock Ordering ===".bold());
    describe("ordered", run_concurrently(&OrderedPair::new(hold), watchdog));
    describe("unordered", run_concurrently(&LockOrderingPair::new(hold), watchdog));

    println!("\n=== Key Points ===");
    println!("1. AB holds R1 and waits for R2 while BA holds R2 and waits for R1");
    println!("2. Neither lock has a timeout, so both threads wait forever");
    println!("3. One global acquisition order makes the cycle impossible");

    // Deadlocked threads never finish; leave without joining them.
    std::process::exit(0);
}
