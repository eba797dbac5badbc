//! # Multi-core coordinator
//!
//! Grounded on `MultiCoreRealtimeKernel` (`include/urtsched/MultiCoreRealtimeKernel.hpp`,
//! `src/MultiCoreRealtimeKernel.cpp`): owns one [`Scheduler`] per core, reserves
//! cores either via cgroups or by assuming an external `taskset`/`isolcpus`
//! placement, spawns a thread per non-primary core, and runs the primary
//! core's scheduler on the calling thread.

use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::clock::Clock;
use crate::error::{Result, SchedError};
use crate::scheduler::Scheduler;

/// How the coordinator ensures its threads actually land on the cores it
/// assigns them to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreReservation {
    /// Assume some other mechanism (`isolcpus=`, an external `taskset`
    /// invocation) already placed this process correctly.
    None,
    /// Same assumption as `None`, but logs a reminder to run `taskset`.
    Taskset,
    /// Create and populate a dedicated cpuset under
    /// `/sys/fs/cgroup/cpuset/urtsched` before spawning any threads.
    Cgroups,
}

const CPUSET_PATH: &str = "/sys/fs/cgroup/cpuset/urtsched";

fn echo(value: &str, path: &str) -> Result<()> {
    info!(value, path, "writing cgroups setting");
    fs::write(path, format!("{value}\n")).map_err(|source| SchedError::Cgroups {
        path: path.to_string(),
        source,
    })
}

/// Owns one [`Scheduler`] per core and drives them all to completion.
pub struct MultiCoreCoordinator {
    clock: Arc<dyn Clock>,
    reserve_cores: CoreReservation,
    schedulers: Vec<Scheduler>,
}

impl MultiCoreCoordinator {
    pub fn new(clock: Arc<dyn Clock>, reserve_cores: CoreReservation) -> Self {
        Self {
            clock,
            reserve_cores,
            schedulers: Vec::new(),
        }
    }

    /// Add one more core's worth of scheduler, named `core-<n>` to match
    /// the source's naming.
    pub fn add_core(&mut self) -> &mut Scheduler {
        let index = self.schedulers.len();
        self.schedulers
            .push(Scheduler::new(format!("core-{index}"), Arc::clone(&self.clock)));
        self.schedulers.last_mut().expect("just pushed")
    }

    pub fn core_count(&self) -> usize {
        self.schedulers.len()
    }

    /// Status JSON for every core, keyed by scheduler name. Grounded on
    /// `ServiceBus`'s status aggregation (`src/ServiceBus.cpp`).
    pub fn status_json(&self) -> String {
        let entries: Vec<String> = self
            .schedulers
            .iter()
            .map(|s| format!("\"{}\":{}", s.name(), s.status_json()))
            .collect();
        format!("{{{}}}", entries.join(","))
    }

    fn reserve_cores_using_cgroups(&self) -> Result<()> {
        let path = Path::new(CPUSET_PATH);
        if !path.exists() {
            fs::create_dir_all(path).map_err(|source| SchedError::Cgroups {
                path: CPUSET_PATH.to_string(),
                source,
            })?;
        } else {
            info!(path = CPUSET_PATH, "cpuset already created");
        }

        let cpu_list = format!("0-{}", self.schedulers.len().saturating_sub(1));
        echo(&cpu_list, &format!("{CPUSET_PATH}/cpuset.cpus"))?;
        echo("1", &format!("{CPUSET_PATH}/cpuset.cpu_exclusive"))?;
        echo("0", &format!("{CPUSET_PATH}/cpuset.mems"))?;
        echo(&std::process::id().to_string(), &format!("{CPUSET_PATH}/tasks"))?;
        Ok(())
    }

    /// Reserve cores per `reserve_cores`, then run every scheduler: all
    /// but the first on their own thread, the first on the calling
    /// thread. Blocks until every scheduler's `run` returns.
    pub fn run(mut self, max_runtime: Option<Duration>) -> Result<()> {
        match self.reserve_cores {
            CoreReservation::Cgroups => self.reserve_cores_using_cgroups()?,
            CoreReservation::Taskset => {
                info!("assuming an external `taskset` invocation placed this process")
            }
            CoreReservation::None => {
                info!("assuming CPU reservation is managed some other way")
            }
        }

        assert!(!self.schedulers.is_empty(), "coordinator has no cores to run");

        let mut rest = self.schedulers.split_off(1);
        let mut primary = self.schedulers.remove(0);

        let mut handles = Vec::with_capacity(rest.len());
        for (offset, mut scheduler) in rest.drain(..).enumerate() {
            let core = offset + 1;
            handles.push(std::thread::spawn(move || {
                if let Err(err) = scheduler.set_sched_affinity(core) {
                    warn!(core, %err, "failed to bind scheduler thread to core, continuing unpinned");
                }
                scheduler.run(max_runtime)
            }));
        }

        if let Err(err) = primary.set_sched_affinity(0) {
            warn!(core = 0, %err, "failed to bind scheduler thread to core, continuing unpinned");
        }
        primary.run(max_runtime);

        for handle in handles {
            handle.join().expect("scheduler thread panicked");
        }
        Ok(())
    }
}
