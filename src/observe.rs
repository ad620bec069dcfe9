//! Reading fan-out.
//!
//! A sensor publishes each completed reading to every registered
//! [`ReadingObserver`].  Delivery happens outside the registry lock on a
//! retained snapshot, so an observer may remove itself (or others) from
//! inside its callback.  An observer removed mid-pass is skipped for the
//! rest of that pass.

use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::ports::{ReadingMessage, ReadingObserver};

/// Registry of reading observers.
#[derive(Default)]
pub struct Observers {
    observers: Mutex<Vec<Arc<dyn ReadingObserver>>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer`.  Registering the same instance twice is an error.
    pub fn add(&self, observer: Arc<dyn ReadingObserver>) -> Result<()> {
        let mut observers = self.observers.lock();
        if observers.iter().any(|o| Arc::ptr_eq(o, &observer)) {
            return Err(Error::AlreadyExists);
        }
        observers.push(observer);
        Ok(())
    }

    /// Unregister `observer`.  Unknown observers are ignored.
    pub fn remove(&self, observer: &Arc<dyn ReadingObserver>) {
        self.observers.lock().retain(|o| !Arc::ptr_eq(o, observer));
    }

    pub fn is_observed(&self) -> bool {
        !self.observers.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.observers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `message` to every observer registered when the pass began.
    pub fn notify(&self, sensor: &str, message: &ReadingMessage) {
        let snapshot: Vec<Arc<dyn ReadingObserver>> = self.observers.lock().clone();
        if snapshot.is_empty() {
            return;
        }
        trace!("{}: notifying {} observer(s)", sensor, snapshot.len());

        for observer in snapshot {
            let still_present = self
                .observers
                .lock()
                .iter()
                .any(|o| Arc::ptr_eq(o, &observer));
            if still_present {
                observer.on_reading(sensor, message);
            }
        }
    }
}
