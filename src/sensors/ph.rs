//! EZO-pH circuit.

use core::fmt;
use core::ops::Deref;
use std::sync::Arc;

use log::debug;

use crate::config::{DriverConfig, TimingConfig};
use crate::dispatch::Scheduler;
use crate::error::Result;
use crate::ezo::{
    AtlasSensor, CompletionCallback, FirmwareVersion, Response, ResponseBody, SensorModel,
    TemperatureCompensatedSensor, TemperatureCompensation, success_frame,
};
use crate::ports::{TemperatureProvider, Transport};

pub const DEFAULT_ADDRESS: u8 = 0x63;

/// First firmware accepting `rt,<t>`.
pub const COMBINED_READING_SINCE: FirmwareVersion = FirmwareVersion::new(2, 12);

const SIMULATED_PH: f64 = 5.0;

/// Calibration buffer point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPoint {
    Low,
    Mid,
    High,
}

impl fmt::Display for CalibrationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Low => "low",
            Self::Mid => "mid",
            Self::High => "high",
        })
    }
}

struct PhModel {
    compensation: Arc<TemperatureCompensation>,
}

impl SensorModel for PhModel {
    fn reading_response_wait_ms(&self, timing: &TimingConfig) -> u32 {
        timing.compensated_reading_response_wait_ms
    }

    fn simulated_reading(&self) -> String {
        format!("{SIMULATED_PH:.3}")
    }

    fn compensation(&self) -> Option<&Arc<TemperatureCompensation>> {
        Some(&self.compensation)
    }
}

#[derive(Debug, Clone)]
pub struct AtlasPh {
    inner: TemperatureCompensatedSensor,
}

impl AtlasPh {
    pub fn new(
        name: impl Into<String>,
        address: u8,
        transport: Arc<dyn Transport>,
        scheduler: &Scheduler,
        config: DriverConfig,
        provider: Option<Arc<dyn TemperatureProvider>>,
    ) -> Self {
        let compensation = Arc::new(TemperatureCompensation::new(provider, COMBINED_READING_SINCE));
        let model = PhModel {
            compensation: Arc::clone(&compensation),
        };
        let sensor = AtlasSensor::new(name, address, transport, scheduler, config, model);
        Self {
            inner: TemperatureCompensatedSensor::new(sensor, compensation),
        }
    }

    /// `cal,<point>,<ph>`
    pub fn send_calibration(
        &self,
        point: CalibrationPoint,
        solution_ph: f64,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        // Calibration takes as long as a compensated reading.
        let mut command = self.command(
            format!("cal,{point},{solution_ph:.3}"),
            ResponseBody::Raw,
            self.timing().compensated_reading_response_wait_ms,
        )?;
        if let Some(callback) = callback {
            command = command.on_complete(callback);
        }
        self.submit(command, synchronous)
    }

    /// `slope,?`: probe slope against an ideal probe.
    pub fn send_get_slope(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| {
                if let Some(slope) = response.slope().filter(|_| response.is_ok()) {
                    debug!(
                        "{}: probe slope acid match {:.1}%, base match {:.1}%, mV from zero {:.2}",
                        sensor.name(),
                        slope.acid_percent,
                        slope.base_percent,
                        slope.zero_offset_mv
                    );
                }
            })
        });
        let command = self
            .command("slope,?", ResponseBody::slope(), self.timing().default_response_wait_ms)?
            .with_prefix("?slope,")
            .on_complete(callback)
            .simulated_by(|_| success_frame("?Slope,99.7,100.3,-0.89"));
        self.submit(command, synchronous)
    }
}

impl Deref for AtlasPh {
    type Target = TemperatureCompensatedSensor;

    fn deref(&self) -> &TemperatureCompensatedSensor {
        &self.inner
    }
}
