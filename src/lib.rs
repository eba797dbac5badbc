//! # coopsched — cooperative real-time scheduling
//!
//! A user-space, single-threaded-per-core scheduler for mixing
//! hard-realtime, soft-realtime, and idle work on one logical CPU, plus a
//! thin coordination layer for running one such scheduler per physical
//! core.
//!
//! ## Overview
//!
//! coopsched never preempts a running callback. Instead each
//! [`scheduler::Scheduler::step`] call makes one scheduling decision: pick
//! the enabled periodic task with the nearest deadline, compute which
//! other periodic tasks overlap its execution window into one cohort,
//! spend whatever slack remains on idle work, then dispatch the cohort —
//! hard-realtime members busy-waited to their exact deadline first,
//! soft-realtime members best-effort immediately after.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                    coordinator.rs                          │
//! │      MultiCoreCoordinator — one Scheduler per core          │
//! │      CoreReservation::{None,Taskset,Cgroups}                 │
//! ├──────────────┬─────────────────────┬───────────────────────┤
//! │ scheduler.rs │      task.rs          │     slots.rs          │
//! │ Scheduler    │  Task, TaskStats      │  SlotTable<T>         │
//! │  ─ step()    │  TaskKind, TaskStatus │  SlotHandle           │
//! │  ─ run()     │  TaskContext          │                       │
//! ├──────────────┴─────────────────────┴───────────────────────┤
//! │  clock.rs: Clock, MonotonicClock, SimulatedClock              │
//! │  affinity.rs: set_sched_affinity                              │
//! │  registry.rs: ServiceRegistry, Service, SchedulerService       │
//! │  workqueue.rs: WorkQueue — one-shot jobs drained by idle tasks │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Timing statistics
//!
//! Every [`task::Task::run`] call measures wall-clock duration against
//! [`clock::Clock`]. The first [`config::WARMUP_COUNT`] calls feed
//! `warmup_max_time_ns` rather than `max_time_ns`, so lazy init or cache
//! warm-up in a task's first few invocations doesn't bias the
//! steady-state statistic cohort overlap reads. A single call exceeding
//! [`config::MAX_ALLOWED_TASK_TIME_US`] is logged and its recorded
//! duration divided by [`config::OVERRUN_DAMPING_FACTOR`], so one
//! pathological sample can't permanently make a task look too expensive
//! to schedule.

pub mod affinity;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod registry;
pub mod scheduler;
pub mod slots;
pub mod task;
pub mod workqueue;

pub use clock::{Clock, MonotonicClock, SimulatedClock};
pub use error::{Result, SchedError};
pub use scheduler::{IdleHandle, PeriodicHandle, Scheduler};
pub use task::{TaskKind, TaskStatus};
