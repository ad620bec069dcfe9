//! EZO-RTD temperature circuit.
//!
//! Besides its own readings the RTD feeds the compensation temperature
//! of the pH and EC circuits through [`TemperatureProvider`].

use core::ops::Deref;
use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;

use crate::config::DriverConfig;
use crate::dispatch::Scheduler;
use crate::error::{Error, Result};
use crate::ezo::{
    AtlasSensor, CompletionCallback, Response, ResponseBody, SensorModel, TemperatureScale,
    success_frame,
};
use crate::ports::{TemperatureProvider, Transport};

pub const DEFAULT_ADDRESS: u8 = 0x66;

/// Longest data-logger interval, in 10 s units.  Zero disables logging.
pub const MAX_DATA_LOGGER_INTERVAL: i32 = 32_000;

/// Readings at or beyond these bounds mean the probe is not in water.
const PLAUSIBLE_LOW_C: f64 = -10.0;
const PLAUSIBLE_HIGH_C: f64 = 110.0;
const UNPLUGGED_PROBE_C: f64 = 20.0;

const SIMULATED_READING: &str = "20.000";

/// Settings last written, echoed back by the simulator.
#[derive(Debug, Default)]
struct RtdSettings {
    data_logger_interval: i32,
    scale: TemperatureScale,
}

struct RtdModel;

impl SensorModel for RtdModel {
    fn simulated_reading(&self) -> String {
        SIMULATED_READING.to_owned()
    }
}

/// Replace implausible water temperatures with a room-temperature guess.
pub fn clamp_implausible(celsius: f64) -> f64 {
    if celsius <= PLAUSIBLE_LOW_C || celsius >= PLAUSIBLE_HIGH_C {
        UNPLUGGED_PROBE_C
    } else {
        celsius
    }
}

#[derive(Debug, Clone)]
pub struct AtlasRtd {
    sensor: Arc<AtlasSensor>,
    settings: Arc<Mutex<RtdSettings>>,
}

impl AtlasRtd {
    pub fn new(
        name: impl Into<String>,
        address: u8,
        transport: Arc<dyn Transport>,
        scheduler: &Scheduler,
        config: DriverConfig,
    ) -> Self {
        Self {
            sensor: AtlasSensor::new(name, address, transport, scheduler, config, RtdModel),
            settings: Arc::new(Mutex::new(RtdSettings::default())),
        }
    }

    pub fn sensor(&self) -> &Arc<AtlasSensor> {
        &self.sensor
    }

    /// Generic init, then turn off the data logger and select Celsius
    /// before the reading loop starts.
    pub fn init(&self) -> Result<()> {
        self.sensor.init_with(true)?;
        self.send_set_data_logger_interval(0, false, None)?;
        self.send_set_temperature_scale(TemperatureScale::Celsius, false, None)?;
        self.sensor.enqueue_send_get_reading()
    }

    fn submit(
        &self,
        text: impl Into<String>,
        response_wait_ms: u32,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let mut command = self.sensor.command(text, ResponseBody::Raw, response_wait_ms)?;
        if let Some(callback) = callback {
            command = command.on_complete(callback);
        }
        self.sensor.submit(command, synchronous)
    }

    /// `cal,<t>`: single-point calibration at `temperature`.
    pub fn send_calibration(
        &self,
        temperature: f64,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        self.submit(
            format!("cal,{temperature:.3}"),
            self.sensor.timing().calibration_response_wait_ms,
            synchronous,
            callback,
        )
    }

    /// `m,clear`
    pub fn send_clear_memory(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        self.submit(
            "m,clear",
            self.sensor.timing().default_response_wait_ms,
            synchronous,
            callback,
        )
    }

    /// `d,?`: data-logger interval in 10 s units.
    pub fn send_get_data_logger_interval(
        &self,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| {
                match response.as_int().filter(|_| response.is_ok()) {
                    Some(0) => debug!("{}: data logger is disabled", sensor.name()),
                    Some(interval) => debug!(
                        "{}: data logger interval is {} ({} seconds)",
                        sensor.name(),
                        interval,
                        interval * 10
                    ),
                    None => {}
                }
            })
        });
        let settings = Arc::clone(&self.settings);
        let command = self
            .sensor
            .command("d,?", ResponseBody::int(), self.sensor.timing().default_response_wait_ms)?
            .with_prefix("?d,")
            .on_complete(callback)
            .simulated_by(move |_| {
                success_frame(&format!("?D,{}", settings.lock().data_logger_interval))
            });
        self.sensor.submit(command, synchronous)
    }

    /// `d,<n>`: 0 disables, otherwise 1..=32000.
    pub fn send_set_data_logger_interval(
        &self,
        interval: i32,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        if !(0..=MAX_DATA_LOGGER_INTERVAL).contains(&interval) {
            return Err(Error::InvalidArgument);
        }
        self.settings.lock().data_logger_interval = interval;
        self.submit(
            format!("d,{interval}"),
            self.sensor.timing().default_response_wait_ms,
            synchronous,
            callback,
        )
    }

    fn memory_command(
        &self,
        text: &'static str,
        what: &'static str,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(move |sensor: &AtlasSensor, response: &Response| {
                if let Some(memory) = response.memory().filter(|_| response.is_ok()) {
                    debug!(
                        "{}: memory {} index {}: {:.3}",
                        sensor.name(),
                        what,
                        memory.index,
                        memory.value
                    );
                }
            })
        });
        let command = self
            .sensor
            .command(text, ResponseBody::memory(), self.sensor.timing().default_response_wait_ms)?
            .on_complete(callback)
            .simulated_by(|_| success_frame("1,25.00"));
        self.sensor.submit(command, synchronous)
    }

    /// `m,?`: index and value of the last stored reading.
    pub fn send_get_memory_last_stored(
        &self,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        self.memory_command("m,?", "last stored", synchronous, callback)
    }

    /// `m`: next stored reading.
    pub fn send_get_memory_next(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        self.memory_command("m", "at", synchronous, callback)
    }

    /// `s,?`
    pub fn send_get_temperature_scale(
        &self,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| {
                if let Some(scale) = response.temperature_scale().filter(|_| response.is_ok()) {
                    debug!("{}: temperature scale is {}", sensor.name(), scale);
                }
            })
        });
        let settings = Arc::clone(&self.settings);
        let command = self
            .sensor
            .command(
                "s,?",
                ResponseBody::temperature_scale(),
                self.sensor.timing().default_response_wait_ms,
            )?
            .with_prefix("?s,")
            .on_complete(callback)
            .simulated_by(move |_| success_frame(&format!("?S,{}", settings.lock().scale.code())));
        self.sensor.submit(command, synchronous)
    }

    /// `s,<c|f|k>`
    pub fn send_set_temperature_scale(
        &self,
        scale: TemperatureScale,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        self.settings.lock().scale = scale;
        self.submit(
            format!("s,{}", scale.code()),
            self.sensor.timing().default_response_wait_ms,
            synchronous,
            callback,
        )
    }
}

impl TemperatureProvider for AtlasRtd {
    /// Last reading, clamped when `clamp_rtd_temperature` is set.
    fn current_temperature(&self) -> Option<f64> {
        let value = self.sensor.last_value()?;
        if self.sensor.config().clamp_rtd_temperature {
            Some(clamp_implausible(value))
        } else {
            Some(value)
        }
    }
}

impl Deref for AtlasRtd {
    type Target = AtlasSensor;

    fn deref(&self) -> &AtlasSensor {
        &self.sensor
    }
}
