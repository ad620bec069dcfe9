//! Temperature-compensated readings.
//!
//! Newer firmware takes the compensation temperature and the reading in
//! one `rt,<t>` command.  Older firmware needs `t,<t>` followed by `r`;
//! both steps ride on a single queued command that flips between them
//! through `Resend`, so callers only ever see the reading.

use core::ops::Deref;
use core::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::Mutex;

use super::command::{Command, CompletionBehavior, CompletionCallback, Priority};
use super::frame::success_frame;
use super::response::{FirmwareVersion, Response, ResponseBody};
use super::sensor::{AtlasSensor, simulated_reading_frame};
use crate::error::{Error, Result};
use crate::ports::TemperatureProvider;

/// Compensation temperature used when nothing better is known.
pub const DEFAULT_TEMPERATURE_C: f64 = 25.0;

/// Compensation state shared between a sensor model and its handle.
pub struct TemperatureCompensation {
    provider: Option<Arc<dyn TemperatureProvider>>,
    combined_since: FirmwareVersion,
    forced: Mutex<Option<f64>>,
    last_sent: Mutex<f64>,
}

impl TemperatureCompensation {
    /// `combined_since` is the first firmware version that accepts `rt`.
    pub fn new(provider: Option<Arc<dyn TemperatureProvider>>, combined_since: FirmwareVersion) -> Self {
        Self {
            provider,
            combined_since,
            forced: Mutex::new(None),
            last_sent: Mutex::new(DEFAULT_TEMPERATURE_C),
        }
    }

    pub fn has_provider(&self) -> bool {
        self.provider.is_some()
    }

    pub fn forced(&self) -> Option<f64> {
        *self.forced.lock()
    }

    pub fn set_forced(&self, degrees: Option<f64>) {
        *self.forced.lock() = degrees;
    }

    /// Last compensation temperature written to the circuit.
    pub fn last_sent(&self) -> f64 {
        *self.last_sent.lock()
    }

    fn record_sent(&self, degrees: f64) {
        *self.last_sent.lock() = degrees;
    }

    /// Forced override, then the provider, then the fallback.
    ///
    /// In simulator mode the fallback is the last value sent so a
    /// simulated `t,<x>` sticks.
    pub fn effective_temperature(&self, simulator: bool) -> f64 {
        if let Some(forced) = self.forced() {
            return forced;
        }
        if let Some(degrees) = self.provider.as_ref().and_then(|p| p.current_temperature()) {
            return degrees;
        }
        if simulator {
            self.last_sent()
        } else {
            DEFAULT_TEMPERATURE_C
        }
    }

    pub fn supports_combined(&self, firmware: FirmwareVersion) -> bool {
        firmware >= self.combined_since
    }

    /// Build the compensated reading command for `sensor`.
    pub(crate) fn reading_command(
        self: &Arc<Self>,
        sensor: &AtlasSensor,
        callback: CompletionCallback,
        priority: Priority,
        behavior: CompletionBehavior,
    ) -> Result<Command> {
        if self.supports_combined(sensor.firmware_version()) {
            self.combined_reading_command(sensor, callback, priority, behavior)
        } else {
            self.two_step_reading_command(sensor, callback, priority, behavior)
        }
    }

    fn combined_reading_command(
        self: &Arc<Self>,
        sensor: &AtlasSensor,
        callback: CompletionCallback,
        priority: Priority,
        behavior: CompletionBehavior,
    ) -> Result<Command> {
        let simulator = sensor.config().simulator_enabled;
        let degrees = self.effective_temperature(simulator);
        let compensation = Arc::clone(self);

        Ok(sensor
            .command(
                format!("rt,{degrees:.3}"),
                ResponseBody::Raw,
                sensor.timing().compensated_reading_response_wait_ms,
            )?
            .with_priority(priority)
            .with_behavior(behavior)
            .on_complete(callback)
            .before_send(move |_, command| {
                let degrees = compensation.effective_temperature(simulator);
                compensation.record_sent(degrees);
                command.set_text(format!("rt,{degrees:.3}"));
                Ok(())
            })
            .simulated_by(simulated_reading_frame))
    }

    fn two_step_reading_command(
        self: &Arc<Self>,
        sensor: &AtlasSensor,
        callback: CompletionCallback,
        priority: Priority,
        behavior: CompletionBehavior,
    ) -> Result<Command> {
        let simulator = sensor.config().simulator_enabled;
        let set_wait = sensor.timing().set_temperature_response_wait_ms;
        let read_wait = sensor.model().reading_response_wait_ms(sensor.timing());

        // True once `t,<x>` has gone out this cycle.
        let temperature_set = Arc::new(AtomicBool::new(false));
        let on_send = Arc::clone(&temperature_set);
        let on_response = temperature_set;
        let compensation = Arc::clone(self);

        Ok(sensor
            .command("r", ResponseBody::Raw, set_wait)?
            .with_priority(priority)
            .with_behavior(CompletionBehavior::Resend)
            .on_complete(callback)
            .before_send(move |_, command| {
                if on_send.load(Ordering::Acquire) {
                    command.set_text("r");
                    command.set_response_wait_ms(read_wait);
                    command.set_behavior(behavior);
                    command.set_simulator(Box::new(simulated_reading_frame));
                } else {
                    let degrees = compensation.effective_temperature(simulator);
                    compensation.record_sent(degrees);
                    command.set_text(format!("t,{degrees:.3}"));
                    command.set_response_wait_ms(set_wait);
                    command.set_behavior(CompletionBehavior::Resend);
                    command.set_simulator(Box::new(|_: &AtlasSensor| success_frame("")));
                }
                Ok(())
            })
            .after_response(move |_, command| {
                let outcome = command.response().status();
                if outcome.is_ok() {
                    on_response.fetch_xor(true, Ordering::AcqRel);
                } else {
                    on_response.store(false, Ordering::Release);
                    command.set_behavior(behavior.after(outcome));
                }
            }))
    }
}

impl core::fmt::Debug for TemperatureCompensation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TemperatureCompensation")
            .field("has_provider", &self.has_provider())
            .field("combined_since", &self.combined_since)
            .field("forced", &self.forced())
            .field("last_sent", &self.last_sent())
            .finish()
    }
}

// ───────────────────────────────────────────────────────────────
// Handle
// ───────────────────────────────────────────────────────────────

/// A driver whose readings are temperature compensated.
///
/// Derefs to the underlying [`AtlasSensor`] for the generic command set.
#[derive(Debug, Clone)]
pub struct TemperatureCompensatedSensor {
    sensor: Arc<AtlasSensor>,
    compensation: Arc<TemperatureCompensation>,
}

impl TemperatureCompensatedSensor {
    pub fn new(sensor: Arc<AtlasSensor>, compensation: Arc<TemperatureCompensation>) -> Self {
        Self { sensor, compensation }
    }

    pub fn sensor(&self) -> &Arc<AtlasSensor> {
        &self.sensor
    }

    pub fn compensation(&self) -> &Arc<TemperatureCompensation> {
        &self.compensation
    }

    pub fn init(&self) -> Result<()> {
        self.sensor.init()
    }

    pub fn init_with(&self, defer_reading: bool) -> Result<()> {
        self.sensor.init_with(defer_reading)
    }

    /// Temperature the next compensated reading would use.
    pub fn current_temperature(&self) -> f64 {
        self.compensation
            .effective_temperature(self.sensor.config().simulator_enabled)
    }

    pub fn forced_temperature(&self) -> Option<f64> {
        self.compensation.forced()
    }

    /// Override the provider.  With `enabled` and `send_now`, push the
    /// forced temperature to the circuit right away.
    pub fn set_forced_temperature(
        &self,
        enabled: bool,
        degrees: f64,
        send_now: bool,
        synchronous: bool,
    ) -> Result<()> {
        self.compensation.set_forced(enabled.then_some(degrees));
        if enabled {
            info!("{}: forcing compensation temperature to {:.3}", self.sensor.name(), degrees);
        } else {
            info!("{}: compensation temperature no longer forced", self.sensor.name());
        }
        if enabled && send_now {
            self.send_set_temperature_compensation(degrees, synchronous, None)
        } else {
            Ok(())
        }
    }

    pub fn is_combined_reading_supported(&self) -> bool {
        self.compensation
            .supports_combined(self.sensor.firmware_version())
    }

    /// `t,?`
    pub fn send_get_temperature_compensation(
        &self,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| {
                if let Some(degrees) = response.as_double().filter(|_| response.is_ok()) {
                    info!("{}: temperature compensation value is {:.3}", sensor.name(), degrees);
                }
            })
        });
        let compensation = Arc::clone(&self.compensation);
        let command = self
            .sensor
            .command("t,?", ResponseBody::double(), self.sensor.timing().default_response_wait_ms)?
            .with_prefix("?t,")
            .on_complete(callback)
            .simulated_by(move |_| success_frame(&format!("?T,{:.3}", compensation.last_sent())));
        self.sensor.submit(command, synchronous)
    }

    /// `t,<degrees>`.  A forced temperature wins over `degrees`.
    pub fn send_set_temperature_compensation(
        &self,
        degrees: f64,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let degrees = self.compensation.forced().unwrap_or(degrees);
        let mut command = self.sensor.command(
            format!("t,{degrees:.3}"),
            ResponseBody::Raw,
            self.sensor.timing().set_temperature_response_wait_ms,
        )?;
        if let Some(callback) = callback {
            command = command.on_complete(callback);
        }
        self.compensation.record_sent(degrees);
        debug!("{}: compensation temperature {:.3}", self.sensor.name(), degrees);
        self.sensor.submit(command, synchronous)
    }

    /// `rt,<degrees>`.  `NotSupported` on firmware without `rt`.
    pub fn send_set_temperature_compensation_and_take_reading(
        &self,
        degrees: f64,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        if !self.is_combined_reading_supported() {
            warn!(
                "{}: firmware {} has no combined compensated reading",
                self.sensor.name(),
                self.sensor.firmware_version()
            );
            return Err(Error::NotSupported);
        }
        let degrees = self.compensation.forced().unwrap_or(degrees);
        let callback = callback.unwrap_or_else(|| {
            Box::new(|sensor: &AtlasSensor, response: &Response| {
                if response.is_ok() {
                    sensor.handle_reading(response);
                }
            })
        });
        let command = self
            .sensor
            .command(
                format!("rt,{degrees:.3}"),
                ResponseBody::Raw,
                self.sensor.timing().compensated_reading_response_wait_ms,
            )?
            .on_complete(callback)
            .simulated_by(simulated_reading_frame);
        self.compensation.record_sent(degrees);
        self.sensor.submit(command, synchronous)
    }
}

impl Deref for TemperatureCompensatedSensor {
    type Target = AtlasSensor;

    fn deref(&self) -> &AtlasSensor {
        &self.sensor
    }
}
