//! # Scheduler configuration
//!
//! Compile-time constants governing the scheduler's hot path and
//! observability. Nothing here allocates; all limits are fixed so the
//! slot tables can be sized once at construction time.

/// Maximum number of periodic tasks a single [`crate::scheduler::Scheduler`]
/// can hold. Bounds the periodic slot table.
pub const MAX_PERIODIC_TASKS: usize = 64;

/// Maximum number of idle tasks a single [`crate::scheduler::Scheduler`]
/// can hold. Bounds the idle slot table.
pub const MAX_IDLE_TASKS: usize = 16;

/// Number of leading invocations whose timing is tracked separately in
/// `warmup_max_time_ns` rather than `max_time_ns`. Lets a task's first few
/// calls (cache warm-up, lazy init) skew its own history without biasing
/// the steady-state statistic used for cohort overlap.
pub const WARMUP_COUNT: u64 = 5;

/// A single callback invocation taking longer than this is considered
/// an overrun: it is logged, and its recorded duration is damped by
/// [`OVERRUN_DAMPING_FACTOR`] so the task remains schedulable.
pub const MAX_ALLOWED_TASK_TIME_US: i64 = 500;

/// Divisor applied to an overrunning task's measured duration before it
/// is folded into `total_time_us`. Keeps one pathological sample from
/// permanently inflating the task's apparent cost.
pub const OVERRUN_DAMPING_FACTOR: i64 = 20;

/// Number of consecutive `step`s with no idle task executed before the
/// scheduler logs a warning that the idle list may be starved.
pub const MISSED_IDLE_WARN_THRESHOLD: u64 = 100;
