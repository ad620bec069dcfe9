//! Cooperative run-loop.
//!
//! One thread per [`Scheduler`] services every [`EventSource`] it owns.
//!
//! ```text
//! ┌────────────┐ dispatch_event ┌──────────────┐  wake(count)  ┌──────────┐
//! │ TimerSource│───────────────▶│  notify ctr  │──────────────▶│ run-loop │
//! │ caller     │───────────────▶│  (Condvar)   │               │  thread  │
//! └────────────┘                └──────────────┘               └────┬─────┘
//!                                                                   │
//!              first source with events > 0, rotate to back, call ◀─┘
//! ```
//!
//! Within one wake cycle each source is serviced at most once, in list
//! order as it stood when the cycle began.  A serviced source moves to
//! the back of the list so a noisy source cannot starve the others.
//! Handlers run with no scheduler lock held.

use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle, ThreadId};

use log::{debug, error, info, trace};
use parking_lot::{Condvar, Mutex};

use super::source::EventSource;
use crate::error::{Error, Result};

/// How long an idle run-loop sleeps before re-checking for shutdown.
const IDLE_WAIT: Duration = Duration::from_millis(250);

pub(crate) struct SchedulerCore {
    name: String,
    sources: Mutex<Vec<Arc<EventSource>>>,
    notifications: Mutex<usize>,
    wake: Condvar,
    running: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,
    thread_id: Mutex<Option<ThreadId>>,
}

impl SchedulerCore {
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn link(&self, source: Arc<EventSource>) {
        let mut sources = self.sources.lock();
        if !sources.iter().any(|s| Arc::ptr_eq(s, &source)) {
            trace!("{}: linked source '{}'", self.name, source.name());
            sources.push(source);
        }
    }

    pub(crate) fn unlink(&self, source: &Arc<EventSource>) {
        self.sources.lock().retain(|s| !Arc::ptr_eq(s, source));
    }

    /// Count one notification and wake the run-loop.
    pub(crate) fn notify(&self, from_isr: bool) {
        let mut pending = self.notifications.lock();
        *pending = pending.saturating_add(1);
        if from_isr {
            trace!("{}: notified from interrupt context", self.name);
        }
        self.wake.notify_one();
    }

    /// Block until notified or `timeout` elapses.  Returns and clears the
    /// number of notifications received since the last wake.
    fn wait(&self, timeout: Duration) -> usize {
        let mut pending = self.notifications.lock();
        if *pending == 0 {
            let _ = self.wake.wait_for(&mut pending, timeout);
        }
        core::mem::take(&mut *pending)
    }

    /// Pop the next unserviced source with an event and rotate it to the
    /// back of the list.
    fn next_source(&self, serviced: &[Arc<EventSource>]) -> Option<Arc<EventSource>> {
        let mut sources = self.sources.lock();
        let index = sources.iter().position(|s| {
            !serviced.iter().any(|done| Arc::ptr_eq(done, s)) && s.take_event()
        })?;
        let source = sources.remove(index);
        sources.push(Arc::clone(&source));
        Some(source)
    }

    /// Service one wake cycle.  Returns the number of handlers invoked.
    fn run_once(&self, timeout: Duration) -> usize {
        let mut budget = self.wait(timeout);
        let mut serviced: Vec<Arc<EventSource>> = Vec::new();

        while budget > 0 {
            let Some(source) = self.next_source(&serviced) else {
                break;
            };
            source.handle();
            serviced.push(source);
            budget -= 1;
        }

        // Sources serviced this cycle that still have events get the
        // leftover budget on the next cycle.
        if budget > 0 && serviced.iter().any(|s| s.pending_events() > 0) {
            let mut pending = self.notifications.lock();
            *pending = pending.saturating_add(budget);
        }

        serviced.len()
    }

    fn run(&self) {
        debug!("{}: run-loop started", self.name);
        while self.running.load(Ordering::Acquire) {
            self.run_once(IDLE_WAIT);
        }
        debug!("{}: run-loop exited", self.name);
    }
}

/// Handle to a cooperative run-loop.  Clones share the same loop.
#[derive(Clone)]
pub struct Scheduler {
    core: Arc<SchedulerCore>,
}

impl Scheduler {
    /// Create a scheduler without starting its thread.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            core: Arc::new(SchedulerCore {
                name: name.into(),
                sources: Mutex::new(Vec::new()),
                notifications: Mutex::new(0),
                wake: Condvar::new(),
                running: AtomicBool::new(false),
                thread: Mutex::new(None),
                thread_id: Mutex::new(None),
            }),
        }
    }

    /// The process-wide scheduler, started on first use.
    pub fn shared() -> &'static Scheduler {
        static SHARED: OnceLock<Scheduler> = OnceLock::new();
        SHARED.get_or_init(|| {
            let scheduler = Scheduler::new("dispatch");
            if let Err(e) = scheduler.start() {
                error!("dispatch: failed to start shared run-loop: {e}");
            }
            scheduler
        })
    }

    pub(crate) fn core(&self) -> &Arc<SchedulerCore> {
        &self.core
    }

    pub fn name(&self) -> &str {
        &self.core.name
    }

    /// Spawn the run-loop thread.  Starting a running scheduler is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut thread = self.core.thread.lock();
        if thread.is_some() {
            return Ok(());
        }

        self.core.running.store(true, Ordering::Release);
        let core = Arc::clone(&self.core);
        let handle = thread::Builder::new()
            .name(self.core.name.clone())
            .spawn(move || core.run())
            .map_err(|_| {
                self.core.running.store(false, Ordering::Release);
                Error::Io
            })?;

        *self.core.thread_id.lock() = Some(handle.thread().id());
        *thread = Some(handle);
        info!("{}: started", self.core.name);
        Ok(())
    }

    /// Stop the run-loop and join its thread.
    ///
    /// Called from a handler on this scheduler, the loop exits after the
    /// handler returns and the thread is detached instead of joined.
    pub fn shutdown(&self) {
        self.core.running.store(false, Ordering::Release);
        self.core.wake.notify_all();

        let handle = self.core.thread.lock().take();
        let own_id = self.core.thread_id.lock().take();
        if let Some(handle) = handle {
            if own_id == Some(thread::current().id()) {
                return;
            }
            if handle.join().is_err() {
                error!("{}: run-loop panicked", self.core.name);
            }
        }
        info!("{}: stopped", self.core.name);
    }

    pub fn is_running(&self) -> bool {
        self.core.running.load(Ordering::Acquire)
    }

    /// True when called from this scheduler's run-loop thread.
    pub fn is_current_thread(&self) -> bool {
        *self.core.thread_id.lock() == Some(thread::current().id())
    }

    pub fn source_count(&self) -> usize {
        self.core.sources.lock().len()
    }

    /// Service a single wake cycle on the calling thread.
    ///
    /// For schedulers that were never started; waits at most `timeout`
    /// for a notification.  Returns the number of handlers invoked.
    pub fn run_once(&self, timeout: Duration) -> usize {
        self.core.run_once(timeout)
    }
}

impl core::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.core.name)
            .field("sources", &self.source_count())
            .field("running", &self.is_running())
            .finish()
    }
}
