//! Port traits — the boundary between the EZO command runtime and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ AtlasSensor (domain)
//! ```
//!
//! The bus, the temperature source used for compensation and the
//! consumers of readings are all injected through these traits, so the
//! state machine never touches hardware directly and runs on the host
//! against mock adapters.

use core::time::Duration;
use std::time::SystemTime;

use crate::error::Result;

// ───────────────────────────────────────────────────────────────
// Transport port (driven adapter: domain ↔ I2C bus)
// ───────────────────────────────────────────────────────────────

/// A device registered on a [`Transport`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceHandle {
    address: u8,
}

impl DeviceHandle {
    pub const fn new(address: u8) -> Self {
        Self { address }
    }

    /// 7-bit bus address of the device.
    pub const fn address(self) -> u8 {
        self.address
    }
}

/// Byte-level access to the bus the EZO circuits sit on.
///
/// Writes are whole-message; reads always fill the whole buffer.  The
/// first byte of every read is the EZO status code.  A transfer that
/// outlives its `timeout` fails with [`Error::Timeout`](crate::Error::Timeout);
/// any other bus failure is [`Error::Io`](crate::Error::Io).
pub trait Transport: Send + Sync {
    /// Register a device at `address`.
    fn register_device(&self, address: u8) -> Result<DeviceHandle>;

    /// Release a device registered with [`register_device`](Self::register_device).
    fn unregister_device(&self, device: DeviceHandle) -> Result<()>;

    /// Write `bytes` to `device` as a single transfer.
    fn write(&self, device: DeviceHandle, bytes: &[u8], timeout: Duration) -> Result<()>;

    /// Read exactly `buffer.len()` bytes from `device`.
    fn read(&self, device: DeviceHandle, buffer: &mut [u8], timeout: Duration) -> Result<()>;
}

// ───────────────────────────────────────────────────────────────
// Temperature provider port
// ───────────────────────────────────────────────────────────────

/// Source of the water temperature used to compensate pH and EC readings.
pub trait TemperatureProvider: Send + Sync {
    /// Current temperature in Celsius, or `None` if it is not known yet.
    fn current_temperature(&self) -> Option<f64>;
}

// ───────────────────────────────────────────────────────────────
// Reading observer port (driven adapter: domain → consumers)
// ───────────────────────────────────────────────────────────────

/// Published by a sensor every time a reading completes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReadingMessage {
    pub value: f64,
    pub when: SystemTime,
}

/// Receives readings through [`Observers`](crate::observe::Observers).
///
/// Callbacks run on the scheduler thread and must not block.
pub trait ReadingObserver: Send + Sync {
    fn on_reading(&self, sensor: &str, message: &ReadingMessage);
}
