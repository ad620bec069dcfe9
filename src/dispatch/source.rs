//! Event sources.
//!
//! An [`EventSource`] is both the producer and the consumer side of a
//! cooperatively scheduled unit of work.  Producers call
//! [`dispatch_event`](EventSource::dispatch_event) (cheap, lock-free
//! counter bump plus a wake of the owning scheduler); the scheduler's
//! run-loop later invokes the handler once per recorded event.
//!
//! A source belongs to at most one [`Scheduler`] at a time.  The
//! scheduler's list holds the strong reference; the source only keeps a
//! weak back-reference, so dropping a scheduler never leaks its sources
//! and a source never keeps a dead scheduler alive.

use core::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use log::{debug, trace};
use parking_lot::Mutex;

use super::scheduler::{Scheduler, SchedulerCore};

/// Handler invoked on the scheduler thread once per event.
pub type EventHandler = Box<dyn Fn(&Arc<EventSource>) + Send + Sync>;

pub struct EventSource {
    name: String,
    events: AtomicUsize,
    handler: EventHandler,
    scheduler: Mutex<Weak<SchedulerCore>>,
}

impl EventSource {
    /// Create an unscheduled source.
    pub fn new(
        name: impl Into<String>,
        handler: impl Fn(&Arc<EventSource>) + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            events: AtomicUsize::new(0),
            handler: Box::new(handler),
            scheduler: Mutex::new(Weak::new()),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Move this source onto `scheduler`.
    ///
    /// A source already owned by another scheduler is unlinked from it
    /// first; adding to the current owner is a no-op.
    pub fn add_to_scheduler(self: &Arc<Self>, scheduler: &Scheduler) {
        let mut owner = self.scheduler.lock();
        let target = scheduler.core();

        if let Some(current) = owner.upgrade() {
            if Arc::ptr_eq(&current, target) {
                return;
            }
            // Keep ourselves alive while we are between lists.
            let _retained = Arc::clone(self);
            current.unlink(self);
            debug!("{}: moving from '{}' to '{}'", self.name, current.name(), target.name());
        }

        target.link(Arc::clone(self));
        *owner = Arc::downgrade(target);
    }

    /// Unlink from the owning scheduler and forget pending events.
    ///
    /// A handler invocation already in progress is not interrupted.
    pub fn remove_from_scheduler(self: &Arc<Self>) {
        self.clear_events();

        let mut owner = self.scheduler.lock();
        if let Some(current) = owner.upgrade() {
            current.unlink(self);
        }
        *owner = Weak::new();
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduler.lock().strong_count() > 0
    }

    /// Record one event and wake the owning scheduler.
    ///
    /// Lock-free apart from the back-reference read; `from_isr` selects
    /// the interrupt-safe notify path on targets that distinguish it.
    pub fn dispatch_event(&self, from_isr: bool) {
        let owner = self.scheduler.lock().upgrade();
        match owner {
            Some(scheduler) => {
                self.events.fetch_add(1, Ordering::AcqRel);
                scheduler.notify(from_isr);
            }
            None => trace!("{}: event dropped, not scheduled", self.name),
        }
    }

    pub fn clear_events(&self) {
        self.events.store(0, Ordering::Release);
    }

    pub fn pending_events(&self) -> usize {
        self.events.load(Ordering::Acquire)
    }

    /// Decrement the event count if it is positive.
    pub(crate) fn take_event(&self) -> bool {
        self.events
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    pub(crate) fn handle(self: &Arc<Self>) {
        (self.handler)(self);
    }
}

impl core::fmt::Debug for EventSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventSource")
            .field("name", &self.name)
            .field("events", &self.pending_events())
            .finish_non_exhaustive()
    }
}
