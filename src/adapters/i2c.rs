//! I2C bus adapter.
//!
//! Implements [`Transport`] over any `embedded-hal` 1.0 blocking I2C bus.
//! Transfers are serialised by a bus lock; each EZO write or read is a
//! single transaction.  Transfer timeouts are whatever the HAL enforces.

use core::time::Duration;

use embedded_hal::i2c::{ErrorKind, I2c};
use log::{trace, warn};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::ports::{DeviceHandle, Transport};

/// Lowest and highest usable 7-bit addresses.
pub const MIN_ADDRESS: u8 = 1;
pub const MAX_ADDRESS: u8 = 127;

pub struct I2cBus<I> {
    bus: Mutex<I>,
    devices: Mutex<Vec<u8>>,
}

impl<I: I2c> I2cBus<I> {
    pub fn new(bus: I) -> Self {
        Self {
            bus: Mutex::new(bus),
            devices: Mutex::new(Vec::new()),
        }
    }

    /// Give the bus back.
    pub fn into_inner(self) -> I {
        self.bus.into_inner()
    }

    fn check_registered(&self, device: DeviceHandle) -> Result<()> {
        if self.devices.lock().contains(&device.address()) {
            Ok(())
        } else {
            Err(Error::InvalidArgument)
        }
    }
}

fn map_error(address: u8, error: &impl embedded_hal::i2c::Error) -> Error {
    match error.kind() {
        ErrorKind::NoAcknowledge(source) => {
            warn!("i2c 0x{:02x}: no acknowledge ({:?})", address, source);
        }
        kind => warn!("i2c 0x{:02x}: {:?}", address, kind),
    }
    Error::Io
}

impl<I: I2c + Send> Transport for I2cBus<I> {
    fn register_device(&self, address: u8) -> Result<DeviceHandle> {
        if !(MIN_ADDRESS..=MAX_ADDRESS).contains(&address) {
            return Err(Error::OutOfRange);
        }
        let mut devices = self.devices.lock();
        if devices.contains(&address) {
            return Err(Error::AlreadyExists);
        }
        devices.push(address);
        trace!("i2c: registered 0x{:02x}", address);
        Ok(DeviceHandle::new(address))
    }

    fn unregister_device(&self, device: DeviceHandle) -> Result<()> {
        let mut devices = self.devices.lock();
        let index = devices
            .iter()
            .position(|&a| a == device.address())
            .ok_or(Error::InvalidArgument)?;
        devices.swap_remove(index);
        trace!("i2c: unregistered 0x{:02x}", device.address());
        Ok(())
    }

    fn write(&self, device: DeviceHandle, bytes: &[u8], _timeout: Duration) -> Result<()> {
        self.check_registered(device)?;
        self.bus
            .lock()
            .write(device.address(), bytes)
            .map_err(|e| map_error(device.address(), &e))
    }

    fn read(&self, device: DeviceHandle, buffer: &mut [u8], _timeout: Duration) -> Result<()> {
        self.check_registered(device)?;
        self.bus
            .lock()
            .read(device.address(), buffer)
            .map_err(|e| map_error(device.address(), &e))
    }
}
