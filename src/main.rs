//! cloudtask - CLI
//!
//! Drives a synthetic workload through a task manager so rate limits and
//! pool sizes can be tried out before wiring them into a client.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cloudtask::util::config::{load_config, save_config};
use cloudtask::util::logger::{self, LogLevel};
use cloudtask::{wait_for_futures, AcceptAll, ManagerConfig, RateSetting, NAME, VERSION};
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Rate-limited task dispatch for cloud API clients
#[derive(Parser, Debug)]
#[command(name = "cloudtask")]
#[command(version = VERSION)]
#[command(about = NAME, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Dispatch a synthetic workload and print dispatch statistics
    Run {
        /// Manager configuration file (TOML)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Number of tasks to submit
        #[arg(short = 'n', long, default_value_t = 10)]
        tasks: usize,

        /// Rate-limit tag attached to every task
        #[arg(short, long)]
        tag: Option<String>,

        /// Seconds between dispatches (overrides the config file)
        #[arg(short, long)]
        rate: Option<f64>,

        /// Run tasks on the execution pool instead of the dispatch thread
        #[arg(long = "async")]
        run_async: bool,

        /// Execution pool size (overrides the config file)
        #[arg(short, long)]
        workers: Option<usize>,

        /// Simulated call latency in milliseconds
        #[arg(long, default_value_t = 0)]
        work_ms: u64,

        /// Log level (overrides the config file)
        #[arg(long, value_enum)]
        log_level: Option<LogLevel>,
    },

    /// Write a default configuration file
    Init {
        /// Destination path
        #[arg(value_name = "FILE", default_value = "cloudtask.toml")]
        path: PathBuf,
    },

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.verbose {
        eprintln!("cloudtask version: {}", VERSION);
        eprintln!("Host: {}", std::env::consts::OS);
    }

    match args.command {
        Commands::Run {
            config,
            tasks,
            tag,
            rate,
            run_async,
            workers,
            work_ms,
            log_level,
        } => {
            let mut config = match config {
                Some(path) => load_config(&path)
                    .with_context(|| format!("Failed to load config: {}", path.display()))?,
                None => ManagerConfig::default(),
            };
            if let Some(rate) = rate {
                config.rate = Some(RateSetting::PerCall(rate));
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }
            logger::init_with_level(log_level.unwrap_or(config.log_level));

            let workload = Workload {
                tasks,
                tag,
                run_async,
                work: Duration::from_millis(work_ms),
            };
            run_workload(&config, &workload).context("Workload failed")?;
        }
        Commands::Init { path } => {
            save_config(&ManagerConfig::default(), &path)
                .with_context(|| format!("Failed to write config: {}", path.display()))?;
            eprintln!("Wrote {}", path.display());
        }
        Commands::Version => {
            println!("{} {}", NAME, VERSION);
        }
    }

    Ok(())
}

struct Workload {
    tasks: usize,
    tag: Option<String>,
    run_async: bool,
    work: Duration,
}

fn run_workload(
    config: &ManagerConfig,
    workload: &Workload,
) -> Result<()> {
    let manager = config.build_manager();
    manager.start()?;
    info!(
        tasks = workload.tasks,
        run_async = workload.run_async,
        "dispatching synthetic workload"
    );

    let started = Instant::now();
    let tag = workload.tag.as_deref();
    let work = workload.work;

    let (completed, failed, retries) = if workload.run_async {
        let futures = (0..workload.tasks)
            .map(|i| {
                manager.submit_async(format!("call-{}", i), tag, move || {
                    thread::sleep(work);
                    Ok(i)
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let (results, retries) = wait_for_futures(&futures, false, &AcceptAll)?;
        (results.len(), 0, retries.len())
    } else {
        let handles = (0..workload.tasks)
            .map(|i| {
                let task = cloudtask::TaskBuilder::new()
                    .name(format!("call-{}", i))
                    .maybe_tag(tag)
                    .build(move || {
                        thread::sleep(work);
                        Ok(i)
                    });
                manager.enqueue(task)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut failed = 0;
        for handle in &handles {
            if let Err(err) = handle.await_result() {
                warn!(task = handle.name(), error = %err, "task failed");
                failed += 1;
            }
        }
        (handles.len() - failed, failed, 0)
    };

    manager.stop();
    let elapsed = started.elapsed();

    let report = serde_json::json!({
        "manager": manager.name(),
        "completed": completed,
        "failed": failed,
        "retries": retries,
        "elapsed_ms": elapsed.as_millis() as u64,
        "stats": manager.stats().snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
