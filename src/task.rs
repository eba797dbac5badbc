//! # Task record
//!
//! Grounded on the source's `BaseTask` / `PeriodicTask` / `IdleTask`
//! hierarchy (`include/urtsched/BaseTask.hpp`, `PeriodicTask.hpp`,
//! `IdleTask.hpp`). Rather than an inheritance chain, every task — periodic
//! or idle — is one [`Task`] record; `periodic` is `Some(..)` only for
//! periodic tasks and carries the fields the idle path never touches.

use std::cell::Cell;
use std::sync::Arc;

use tracing::error;

use crate::clock::Clock;
use crate::config::{MAX_ALLOWED_TASK_TIME_US, OVERRUN_DAMPING_FACTOR, WARMUP_COUNT};

/// Whether a periodic task busy-waits to its exact deadline (`Hard`) or
/// runs best-effort once slack has been consumed (`Soft`). Idle tasks are
/// always `Soft` — they never appear in a cohort and never busy-wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    HardRealtime,
    SoftRealtime,
}

/// Outcome of one callback invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The callback completed a useful unit of work.
    Ok,
    /// The callback voluntarily gave up without completing; statistics
    /// beyond `total_time_us` are not updated for this invocation.
    Yield,
}

/// The view a running callback gets of its own task record. Lets a
/// one-shot task (see [`crate::workqueue`]) disable itself from inside its
/// own body without holding a back-pointer into the scheduler.
pub struct TaskContext<'a> {
    name: &'a str,
    enabled: &'a Cell<bool>,
}

impl<'a> TaskContext<'a> {
    pub fn name(&self) -> &str {
        self.name
    }

    pub fn disable(&self) {
        self.enabled.set(false);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }
}

pub type Callback = Box<dyn FnMut(&TaskContext) -> TaskStatus + Send>;

/// Running statistics for one task, updated exclusively by [`Task::run`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskStats {
    pub num_calls: u64,
    pub num_ok_calls: u64,
    /// Accumulated in microseconds to avoid overflow over a long run.
    pub total_time_us: i64,
    pub max_time_ns: i64,
    pub warmup_max_time_ns: i64,
}

impl TaskStats {
    /// Average wall-clock time per call, in microseconds. Guards against
    /// `num_calls == 0` (open question in the source's design) by
    /// returning `0.0` rather than dividing by zero.
    pub fn average_time_us(&self) -> f64 {
        if self.num_calls == 0 {
            0.0
        } else {
            self.total_time_us as f64 / self.num_calls as f64
        }
    }
}

/// Fields that exist only for periodic tasks: the deadline clock and the
/// hard/soft dispatch kind. `snapshot_deadline_ns` is written once per
/// `step` by the scheduler's cohort-selection pass (§4.3) purely for
/// diagnostics — dispatch itself uses the live deadline.
pub(crate) struct PeriodicFields {
    pub kind: TaskKind,
    pub period_ns: Cell<i64>,
    pub deadline_ns: Cell<i64>,
    pub snapshot_deadline_ns: Cell<i64>,
}

pub struct Task {
    name: String,
    callback: Callback,
    clock: Arc<dyn Clock>,
    enabled: Cell<bool>,
    stats: TaskStats,
    pub(crate) periodic: Option<PeriodicFields>,
}

impl Task {
    pub(crate) fn new_periodic(
        name: impl Into<String>,
        kind: TaskKind,
        period_ns: i64,
        callback: Callback,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let now = clock.now_ns();
        Task {
            name: name.into(),
            callback,
            clock,
            // Periodic tasks start disabled: the caller opts in explicitly.
            enabled: Cell::new(false),
            stats: TaskStats::default(),
            periodic: Some(PeriodicFields {
                kind,
                period_ns: Cell::new(period_ns),
                // Zero-remaining on construction: immediately eligible.
                deadline_ns: Cell::new(now),
                snapshot_deadline_ns: Cell::new(now),
            }),
        }
    }

    pub(crate) fn new_idle(name: impl Into<String>, callback: Callback, clock: Arc<dyn Clock>) -> Self {
        Task {
            name: name.into(),
            callback,
            clock,
            // Idle tasks start enabled.
            enabled: Cell::new(true),
            stats: TaskStats::default(),
            periodic: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.get()
    }

    pub fn enable(&self) {
        self.enabled.set(true);
    }

    pub fn disable(&self) {
        self.enabled.set(false);
    }

    pub fn kind(&self) -> Option<TaskKind> {
        self.periodic.as_ref().map(|p| p.kind)
    }

    pub fn stats(&self) -> TaskStats {
        self.stats
    }

    pub fn set_period_ns(&self, period_ns: i64) {
        if let Some(p) = &self.periodic {
            p.period_ns.set(period_ns);
        }
    }

    /// Largest execution-time sample seen so far, post-warmup.
    pub fn max_time_ns(&self) -> i64 {
        self.stats.max_time_ns
    }

    pub fn warmup_max_time_ns(&self) -> i64 {
        self.stats.warmup_max_time_ns
    }

    /// The statistic cohort overlap actually reads. Falls back to the
    /// warm-up sample when no post-warmup sample has been recorded yet so
    /// a brand-new periodic task isn't invisible to overlap detection
    /// during its first few dispatches (resolves the source's open
    /// question on this point — see SPEC_FULL.md §3).
    pub fn effective_max_time_ns(&self) -> i64 {
        self.stats.max_time_ns.max(self.stats.warmup_max_time_ns)
    }

    /// Nanoseconds remaining until this periodic task's deadline. Negative
    /// once the deadline has passed. Idle tasks have no deadline and
    /// report `0`.
    pub fn time_left_until_deadline(&self) -> i64 {
        match &self.periodic {
            Some(p) => p.deadline_ns.get() - self.clock.now_ns(),
            None => 0,
        }
    }

    pub fn have_time_left_before_deadline(&self) -> bool {
        self.time_left_until_deadline() > 0
    }

    /// `true` iff `other`'s deadline falls inside this task's projected
    /// execution window — an asymmetric test; the cohort in
    /// [`crate::scheduler`] checks it in both directions.
    pub fn overlaps_with(&self, other: &Task) -> bool {
        let self_left = self.time_left_until_deadline();
        let other_left = other.time_left_until_deadline();
        let window_end = self_left + self.effective_max_time_ns();
        other_left >= self_left && other_left <= window_end
    }

    /// Busy-wait until this task's deadline elapses. Only valid for
    /// hard-realtime periodic tasks — the only suspension point in the
    /// whole scheduler (§5).
    pub fn wait_for_deadline(&self) {
        debug_assert!(matches!(
            self.periodic.as_ref().map(|p| p.kind),
            Some(TaskKind::HardRealtime)
        ));
        while self.have_time_left_before_deadline() {
            std::hint::spin_loop();
        }
    }

    /// Reset the deadline to `now + period` and run the callback. For
    /// hard-realtime tasks, asserts the deadline had already elapsed —
    /// callers are expected to have called `wait_for_deadline` first.
    pub fn run_elapsed(&mut self) -> TaskStatus {
        if let Some(p) = &self.periodic {
            if p.kind == TaskKind::HardRealtime {
                debug_assert!(!self.have_time_left_before_deadline());
            }
            let now = self.clock.now_ns();
            p.deadline_ns.set(now + p.period_ns.get());
        }
        self.run()
    }

    /// Invoke the callback once, measuring wall-clock duration and
    /// updating statistics per the overrun/warm-up rules in SPEC_FULL.md §3.
    pub fn run(&mut self) -> TaskStatus {
        self.stats.num_calls += 1;

        let ctx = TaskContext {
            name: &self.name,
            enabled: &self.enabled,
        };
        let start = self.clock.now_ns();
        let status = (self.callback)(&ctx);
        let end = self.clock.now_ns();
        debug_assert!(end >= start, "clock went backwards during task.run()");
        let mut took_ns = end - start;

        let took_us = took_ns / 1_000;
        if took_us > MAX_ALLOWED_TASK_TIME_US {
            error!(
                task = %self.name,
                took_us,
                avg_us = self.stats.average_time_us(),
                num_calls = self.stats.num_calls,
                num_ok_calls = self.stats.num_ok_calls,
                "task took too long"
            );
            // Lie a bit so this task remains schedulable despite the outlier.
            took_ns /= OVERRUN_DAMPING_FACTOR;
        }

        self.stats.total_time_us += took_ns / 1_000;

        if status == TaskStatus::Yield {
            return status;
        }

        self.stats.num_ok_calls += 1;

        if self.stats.num_calls <= WARMUP_COUNT {
            if took_ns > self.stats.warmup_max_time_ns {
                self.stats.warmup_max_time_ns = took_ns;
            }
        } else {
            let took_us_post = took_ns / 1_000;
            if took_us_post <= MAX_ALLOWED_TASK_TIME_US && took_ns > self.stats.max_time_ns {
                self.stats.max_time_ns = took_ns;
            }
        }

        status
    }

    pub(crate) fn snapshot_deadline(&self) {
        if let Some(p) = &self.periodic {
            p.snapshot_deadline_ns.set(p.deadline_ns.get());
        }
    }
}
