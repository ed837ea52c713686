//! Lost updates on a shared counter, then the same workload under a lock.
//!
//! Run with: cargo run --bin complete_14_race_condition -- --threads 1000 --increments 1000

use std::sync::Arc;

use clap::Parser;
use colored::Colorize;
use concurrency_lab::counter::{hammer, IncrementMode, SharedCounter};
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Shared counter race demo")]
struct Args {
    #[arg(short, long, default_value_t = 1_000)]
    threads: usize,

    #[arg(short, long, default_value_t = 1_000)]
    increments: usize,

    #[arg(short, long)]
    verbose: bool,
}

fn run(label: &str, threads: usize, increments: usize, mode: IncrementMode) {
    let counter = Arc::new(SharedCounter::new(0));
    let expected = (threads * increments) as i64;
    let value = hammer(&counter, threads, increments, mode);
    info!(?mode, threads, increments, value, "counter run finished");

    let verdict = if value == expected {
        "exact".green()
    } else {
        format!("lost {} updates", expected - value).red()
    };
    println!("{label:<28} value = {value:>9} / {expected} ({verdict})");
}

fn main() {
    let args = Args::parse();
    concurrency_lab::logging::init(args.verbose);

    println!("{}\n", "=== Race Condition on a Shared Counter ===".bold());
    run("single thread, unsync", 1, args.increments, IncrementMode::Unsynchronized);
    run("many threads, unsync", args.threads, args.increments, IncrementMode::Unsynchronized);
    run("many threads, synchronized", args.threads, args.increments, IncrementMode::Synchronized);

    println!("\n=== Key Points ===");
    println!("1. value = value + 1 is a read, an add and a write");
    println!("2. Two threads reading the same value both write value + 1");
    println!("3. One lock around the whole read-modify-write restores the total");
}
