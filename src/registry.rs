//! # Service registry
//!
//! Grounded on `ServiceBus`/`IService` (`include/urtsched/ServiceBus.hpp`,
//! `src/ServiceBus.cpp`, `include/urtsched/IService.hpp`): a place every
//! long-lived collaborator registers itself so its status JSON can be
//! queried uniformly, without the registry knowing any collaborator's
//! concrete type.

use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::Result;

/// Anything that can report a JSON status fragment and participate in a
/// two-phase lifecycle. A [`crate::scheduler::Scheduler`] is the only
/// first-party implementor, via the blanket impl below; the trait exists
/// so the registry can hold heterogeneous collaborators.
pub trait Service: Send + Sync {
    /// A JSON object fragment describing this service's status, or `None`
    /// if it has nothing to report yet.
    fn status_json(&self) -> Option<String>;

    fn init(&self) -> Result<()> {
        Ok(())
    }

    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

/// Adapts a [`Scheduler`]'s status cache to [`Service`] without requiring
/// the scheduler crate to depend on the registry.
///
/// [`Scheduler`]: crate::scheduler::Scheduler
pub struct SchedulerService {
    name: String,
    status_cache: Arc<RwLock<String>>,
}

impl SchedulerService {
    pub fn new(scheduler: &crate::scheduler::Scheduler) -> Self {
        Self {
            name: scheduler.name().to_string(),
            status_cache: scheduler.status_cache(),
        }
    }
}

impl Service for SchedulerService {
    fn status_json(&self) -> Option<String> {
        Some(format!("{{\"{}\":{}}}", self.name, self.status_cache.read().as_str()))
    }
}

/// Registers every [`Service`] in the process so a single call can gather
/// every collaborator's status. Lock-free on the hot scheduling path —
/// registration only happens at startup.
#[derive(Default)]
pub struct ServiceRegistry {
    services: Vec<Arc<dyn Service>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    /// Comma-joined status fragments from every registered service that
    /// has something to report, matching the source's "skip empty
    /// fragments" behavior.
    pub fn status_json(&self) -> String {
        let fragments: Vec<String> = self.services.iter().filter_map(|s| s.status_json()).collect();
        fragments.join(",")
    }

    /// Call `init` on every registered service, short-circuiting on the
    /// first failure.
    pub fn init_all(&self) -> Result<()> {
        for service in &self.services {
            service.init()?;
        }
        Ok(())
    }

    /// Call `finish` on every registered service. Unlike `init_all`, this
    /// runs every service regardless of earlier failures and returns the
    /// first error encountered, since shutdown should not be abandoned
    /// halfway.
    pub fn finish_all(&self) -> Result<()> {
        let mut first_err = None;
        for service in &self.services {
            if let Err(e) = service.finish() {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
