//! One-shot and periodic timers that fire into a [`Scheduler`].
//!
//! Each [`TimerSource`] owns an [`EventSource`] and a small waiter thread
//! standing in for the hardware timer peripheral.  On expiry the waiter
//! only bumps the source's event counter; the handler itself always runs
//! on the scheduler thread.

use core::time::Duration;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use log::{error, trace};
use parking_lot::{Condvar, Mutex};

use super::scheduler::Scheduler;
use super::source::EventSource;
use crate::error::{Error, Result};

#[derive(Debug, Default)]
struct TimerState {
    deadline: Option<Instant>,
    period: Option<Duration>,
    shutdown: bool,
}

#[derive(Default)]
struct TimerShared {
    state: Mutex<TimerState>,
    changed: Condvar,
}

impl TimerShared {
    fn wait_loop(&self, source: &EventSource) {
        let mut state = self.state.lock();
        loop {
            if state.shutdown {
                return;
            }
            match state.deadline {
                None => self.changed.wait(&mut state),
                Some(deadline) if Instant::now() >= deadline => {
                    state.deadline = state.period.map(|p| deadline + p);
                    drop(state);
                    source.dispatch_event(false);
                    state = self.state.lock();
                }
                Some(deadline) => {
                    let _ = self.changed.wait_until(&mut state, deadline);
                }
            }
        }
    }

    fn arm(&self, delay: Duration, period: Option<Duration>) {
        let mut state = self.state.lock();
        state.deadline = Some(Instant::now() + delay);
        state.period = period;
        self.changed.notify_one();
    }
}

/// A timer whose expiries are delivered as events on a scheduler.
pub struct TimerSource {
    source: Arc<EventSource>,
    shared: Arc<TimerShared>,
    thread: Option<JoinHandle<()>>,
}

impl TimerSource {
    /// Create a disarmed timer on `scheduler` calling `handler` per expiry.
    pub fn new(
        name: impl Into<String>,
        scheduler: &Scheduler,
        handler: impl Fn(&Arc<EventSource>) + Send + Sync + 'static,
    ) -> Result<Self> {
        let name = name.into();
        let source = EventSource::new(name.clone(), handler);
        let shared = Arc::new(TimerShared::default());

        let waiter_source = Arc::clone(&source);
        let waiter_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name(format!("{name}-timer"))
            .spawn(move || waiter_shared.wait_loop(&waiter_source))
            .map_err(|_| Error::Io)?;

        source.add_to_scheduler(scheduler);
        trace!("{name}: timer created on '{}'", scheduler.name());

        Ok(Self {
            source,
            shared,
            thread: Some(thread),
        })
    }

    /// Fire once after `delay`, replacing any pending expiry.
    pub fn start_once(&self, delay: Duration) {
        self.shared.arm(delay, None);
    }

    /// Fire every `period`, first after one `period`.
    pub fn start_periodic(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(Error::InvalidArgument);
        }
        self.shared.arm(period, Some(period));
        Ok(())
    }

    /// Disarm.  Events already dispatched are still delivered.
    pub fn stop(&self) {
        let mut state = self.shared.state.lock();
        state.deadline = None;
        state.period = None;
        self.shared.changed.notify_one();
    }

    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().deadline.is_some()
    }

    /// Deliver an expiry right now without touching the armed deadline.
    pub fn fire_now(&self) {
        self.source.dispatch_event(false);
    }

    pub fn source(&self) -> &Arc<EventSource> {
        &self.source
    }
}

impl Drop for TimerSource {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.changed.notify_one();
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("{}: timer thread panicked", self.source.name());
            }
        }
        self.source.remove_from_scheduler();
    }
}

impl core::fmt::Debug for TimerSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TimerSource")
            .field("source", &self.source)
            .field("armed", &self.is_armed())
            .finish()
    }
}
