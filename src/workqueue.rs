//! # Work queue facade
//!
//! Grounded on `Service::run_oneshot_idle_task` / `push_work_queue`
//! (`include/urtsched/Service.hpp`, `src/Service.cpp`): a way to hand a
//! scheduler a batch of one-shot closures that drain through a single
//! idle task, one per slack window, instead of each caller needing to
//! register its own idle task.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::scheduler::{IdleHandle, Scheduler};
use crate::task::TaskStatus;

/// A FIFO of one-shot jobs drained by a single idle task registered with
/// [`WorkQueue::attach`]. Cloning shares the same underlying queue — the
/// clone is how callers on other threads enqueue work for the scheduler
/// thread to run.
#[derive(Clone)]
pub struct WorkQueue {
    jobs: Arc<Mutex<VecDeque<Box<dyn FnOnce() + Send>>>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// Queue one job. Runs on the scheduler's thread, in FIFO order, one
    /// per idle-task dispatch.
    pub fn push(&self, job: impl FnOnce() + Send + 'static) {
        self.jobs.lock().push_back(Box::new(job));
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Register an idle task on `scheduler` that pops and runs one job
    /// per dispatch. Matches the source's one-job-per-call draining: a
    /// burst of queued work drains over several slack windows rather than
    /// all at once, so it cannot itself become the overrun it guards
    /// against.
    pub fn attach(&self, scheduler: &mut Scheduler, name: impl Into<String>) -> IdleHandle {
        let jobs = Arc::clone(&self.jobs);
        scheduler.add_idle_task(
            name,
            Box::new(move |_ctx| {
                let job = jobs.lock().pop_front();
                match job {
                    Some(job) => {
                        job();
                        TaskStatus::Ok
                    }
                    None => TaskStatus::Yield,
                }
            }),
        )
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimulatedClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn attached_idle_task_drains_one_job_per_step() {
        let clock = Arc::new(SimulatedClock::new());
        let mut scheduler = Scheduler::new("test", clock);
        let queue = WorkQueue::new();

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let c = counter.clone();
            queue.push(move || {
                c.fetch_add(1, Ordering::SeqCst);
            });
        }
        queue.attach(&mut scheduler, "work");

        assert_eq!(queue.len(), 3);
        scheduler.step();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(queue.len(), 2);

        scheduler.step();
        scheduler.step();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(queue.is_empty());
    }

    #[test]
    fn empty_queue_yields_without_panicking() {
        let clock = Arc::new(SimulatedClock::new());
        let mut scheduler = Scheduler::new("test", clock);
        let queue = WorkQueue::new();
        queue.attach(&mut scheduler, "work");
        scheduler.step();
    }
}
