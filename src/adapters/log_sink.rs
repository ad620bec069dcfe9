//! Log-based reading observer.
//!
//! Implements [`ReadingObserver`] by writing every published reading to
//! the logger.  Another sink (MQTT, a database) would implement the same
//! trait.

use std::time::UNIX_EPOCH;

use log::info;

use crate::ports::{ReadingMessage, ReadingObserver};

/// Observer that logs every reading.
#[derive(Debug, Default)]
pub struct LogObserver;

impl LogObserver {
    pub fn new() -> Self {
        Self
    }
}

impl ReadingObserver for LogObserver {
    fn on_reading(&self, sensor: &str, message: &ReadingMessage) {
        let millis = message
            .when
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        info!("READING | {} = {:.3} | t={}ms", sensor, message.value, millis);
    }
}
