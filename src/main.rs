//! # coopsched demo binary
//!
//! Runs a small mix of hard-realtime, soft-realtime, and idle tasks on
//! one or more cores, printing the status JSON to stderr once per
//! second via a background idle task on core 0.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use coopsched::clock::MonotonicClock;
use coopsched::coordinator::{CoreReservation, MultiCoreCoordinator};
use coopsched::task::TaskStatus;
use coopsched::TaskKind;

/// Run the cooperative scheduler demo workload.
#[derive(Parser, Debug)]
#[command(name = "coopsched", about = "Cooperative real-time scheduler demo")]
struct Args {
    /// Number of cores (schedulers) to run. Defaults to the number of
    /// logical CPUs detected on this machine.
    #[arg(long)]
    cores: Option<usize>,

    /// Wall-clock duration to run before exiting. Runs forever if unset.
    #[arg(long)]
    seconds: Option<u64>,

    /// How the coordinator reserves CPU cores for its threads.
    #[arg(long, value_enum, default_value = "none")]
    reserve: ReserveArg,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum ReserveArg {
    None,
    Taskset,
    Cgroups,
}

impl From<ReserveArg> for CoreReservation {
    fn from(value: ReserveArg) -> Self {
        match value {
            ReserveArg::None => CoreReservation::None,
            ReserveArg::Taskset => CoreReservation::Taskset,
            ReserveArg::Cgroups => CoreReservation::Cgroups,
        }
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let cores = args.cores.unwrap_or_else(num_cpus::get);
    let max_runtime = args.seconds.map(Duration::from_secs);

    info!(cores, ?max_runtime, "starting coopsched demo");

    let clock = Arc::new(MonotonicClock::new());
    let mut coordinator = MultiCoreCoordinator::new(clock, args.reserve.into());

    for core_index in 0..cores {
        let scheduler = coordinator.add_core();

        let sensor_count = Arc::new(AtomicU64::new(0));
        let sensor = scheduler.add_periodic(
            TaskKind::HardRealtime,
            "sensor-sample",
            Duration::from_millis(5),
            Box::new(move |_ctx| {
                sensor_count.fetch_add(1, Ordering::Relaxed);
                TaskStatus::Ok
            }),
        );
        scheduler.enable(sensor);

        let telemetry = scheduler.add_periodic(
            TaskKind::SoftRealtime,
            "telemetry-publish",
            Duration::from_millis(50),
            Box::new(|_ctx| TaskStatus::Ok),
        );
        scheduler.enable(telemetry);

        if core_index == 0 {
            let status_cache = scheduler.status_cache();
            let mut last_printed = Instant::now();
            scheduler.add_idle_task(
                "status-printer",
                Box::new(move |_ctx| {
                    if last_printed.elapsed() >= Duration::from_secs(1) {
                        eprintln!("{}", status_cache.read().as_str());
                        last_printed = Instant::now();
                    }
                    TaskStatus::Yield
                }),
            );
        } else {
            scheduler.add_idle_task("background-work", Box::new(|_ctx| TaskStatus::Ok));
        }
    }

    if let Err(err) = coordinator.run(max_runtime) {
        eprintln!("coopsched demo exited with an error: {err}");
        std::process::exit(1);
    }
}
