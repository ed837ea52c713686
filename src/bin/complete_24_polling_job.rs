//! Periodic polling job: a scheduler thread fans a batch out to a worker pool.
//!
//! Run with: cargo run --bin complete_24_polling_job -- --period-ms 3000 --task-ms 1000 --cycles 3

use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use colored::Colorize;
use concurrency_lab::dispatcher::{Cadence, DispatcherConfig, PeriodicDispatcher};
use tracing::info;

#[derive(Parser, Debug)]
#[command(version, about = "Periodic dispatcher demo")]
struct Args {
    /// TOML file with dispatcher settings; flags below override it.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long, value_enum)]
    cadence: Option<CadenceArg>,

    #[arg(long)]
    period_ms: Option<u64>,

    #[arg(long)]
    task_ms: Option<u64>,

    #[arg(long)]
    batch: Option<usize>,

    /// Fire-and-forget instead of waiting on every task.
    #[arg(long)]
    no_wait: bool,

    /// Stop after this many firings.
    #[arg(long, default_value_t = 2)]
    cycles: u64,

    /// Grace period for in-flight tasks on stop.
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Print cycle reports as JSON.
    #[arg(long)]
    json: bool,

    #[arg(short, long)]
    verbose: bool,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy)]
enum CadenceArg {
    FixedDelay,
    FixedRate,
    Once,
}

impl From<CadenceArg> for Cadence {
    fn from(arg: CadenceArg) -> Self {
        match arg {
            CadenceArg::FixedDelay => Cadence::FixedDelay,
            CadenceArg::FixedRate => Cadence::FixedRate,
            CadenceArg::Once => Cadence::Once,
        }
    }
}

fn load_config(args: &Args) -> anyhow::Result<DispatcherConfig> {
    let mut config = match &args.config {
        Some(path) => DispatcherConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DispatcherConfig {
            period_ms: 3_000,
            task_work_ms: 1_000,
            ..DispatcherConfig::default()
        },
    };

    if let Some(cadence) = args.cadence {
        config.cadence = cadence.into();
    }
    if let Some(period) = args.period_ms {
        config.period_ms = period;
    }
    if let Some(task) = args.task_ms {
        config.task_work_ms = task;
    }
    if let Some(batch) = args.batch {
        config.batch_size = batch;
    }
    if args.no_wait {
        config.wait_for_completion = false;
    }
    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    concurrency_lab::logging::init(args.verbose);
    let config = load_config(&args)?;

    println!("{}\n", "=== Periodic Polling Job ===".bold());
    println!(
        "cadence: {:?}, period: {:?}, batch: {}, workers: {}, wait: {}",
        config.cadence,
        config.period(),
        config.batch_size,
        config.pool.capacity,
        config.wait_for_completion
    );

    let target = if config.cadence == Cadence::Once { 1 } else { args.cycles };
    let grace = args
        .grace_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| config.pool.await_termination());
    let mut dispatcher = PeriodicDispatcher::start(config)?;

    while (dispatcher.reports().len() as u64) < target {
        thread::sleep(Duration::from_millis(50));
    }
    let shutdown = dispatcher.stop(grace);
    info!(?shutdown, "polling job finished");

    let reports = dispatcher.reports();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    } else {
        for r in &reports {
            println!(
                "cycle {} on {}: started {:?}, took {:?}, submitted {}, completed {}, failed {}",
                r.cycle,
                r.dispatcher,
                r.started_at,
                r.finished_at - r.started_at,
                r.submitted,
                r.completed,
                r.failed
            );
        }
        for record in dispatcher.worker_log().iter().take(10) {
            println!("  task {}.{} ran on {}", record.cycle, record.task, record.worker);
        }
    }
    println!(
        "shutdown: {} workers joined, {} abandoned",
        shutdown.joined, shutdown.abandoned
    );

    println!("\n=== Key Points ===");
    println!("1. Fixed delay: the next firing waits for this one to return");
    println!("2. Waiting on every task handle stretches the effective period");
    println!("3. Fixed rate keeps the cadence and lets firings overlap");
    println!("4. Stop cancels the timer first, then drains the pool for the grace period");
    Ok(())
}
