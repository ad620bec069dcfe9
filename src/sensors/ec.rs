//! EZO-EC conductivity circuit.
//!
//! A reading response carries one field per enabled output, in the order
//! `o,?` reports them.  The driver remembers where conductivity sits and
//! publishes only that field.

use core::ops::{Deref, RangeInclusive};
use std::sync::Arc;

use log::{debug, error};
use parking_lot::Mutex;

use crate::config::DriverConfig;
use crate::dispatch::Scheduler;
use crate::error::{Error, Result};
use crate::ezo::{
    AtlasSensor, CompletionCallback, FirmwareVersion, OutputParameters, Response, ResponseBody,
    SensorModel, TemperatureCompensatedSensor, TemperatureCompensation, success_frame,
};
use crate::ports::{TemperatureProvider, Transport};

pub const DEFAULT_ADDRESS: u8 = 0x64;

/// First firmware accepting `rt,<t>`.
pub const COMBINED_READING_SINCE: FirmwareVersion = FirmwareVersion::new(2, 13);

/// Calibration solutions must be at room temperature.
pub const CALIBRATION_TEMPERATURE_C: RangeInclusive<f64> = 20.0..=25.0;

const SIMULATED_CONDUCTIVITY: u32 = 1000;
const DEFAULT_PROBE_K: f64 = 1.0;
const DEFAULT_TDS_FACTOR: f64 = 0.54;

/// Reading outputs the circuit can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Conductivity,
    TotalDissolvedSolids,
    Salinity,
    SpecificGravity,
}

impl Output {
    const fn code(self) -> &'static str {
        match self {
            Self::Conductivity => "ec",
            Self::TotalDissolvedSolids => "tds",
            Self::Salinity => "s",
            Self::SpecificGravity => "sg",
        }
    }
}

/// Outputs requested and the reading layout last reported.
#[derive(Debug, Clone)]
struct EcState {
    conductivity: bool,
    total_dissolved_solids: bool,
    salinity: bool,
    specific_gravity: bool,
    layout: OutputParameters,
    probe_k: f64,
    tds_factor: f64,
}

impl Default for EcState {
    fn default() -> Self {
        Self {
            conductivity: true,
            total_dissolved_solids: false,
            salinity: false,
            specific_gravity: false,
            layout: OutputParameters::default(),
            probe_k: DEFAULT_PROBE_K,
            tds_factor: DEFAULT_TDS_FACTOR,
        }
    }
}

impl EcState {
    fn set(&mut self, output: Output, enabled: bool) {
        match output {
            Output::Conductivity => self.conductivity = enabled,
            Output::TotalDissolvedSolids => self.total_dissolved_solids = enabled,
            Output::Salinity => self.salinity = enabled,
            Output::SpecificGravity => self.specific_gravity = enabled,
        }
    }

    fn is_enabled(&self, output: Output) -> bool {
        match output {
            Output::Conductivity => self.conductivity,
            Output::TotalDissolvedSolids => self.total_dissolved_solids,
            Output::Salinity => self.salinity,
            Output::SpecificGravity => self.specific_gravity,
        }
    }

    /// `?O,...` as the circuit would answer `o,?`.
    fn parameters_text(&self) -> String {
        let mut text = String::from("?O");
        for (output, name) in [
            (Output::Conductivity, ",EC"),
            (Output::TotalDissolvedSolids, ",TDS"),
            (Output::Salinity, ",S"),
            (Output::SpecificGravity, ",SG"),
        ] {
            if self.is_enabled(output) {
                text.push_str(name);
            }
        }
        text
    }
}

struct EcModel {
    compensation: Arc<TemperatureCompensation>,
    state: Arc<Mutex<EcState>>,
}

impl SensorModel for EcModel {
    fn convert_reading(&self, text: &str) -> Option<f64> {
        if text.is_empty() || text.eq_ignore_ascii_case("no output") {
            return None;
        }
        let Some(index) = self.state.lock().layout.conductivity else {
            debug!("conductivity not in reading layout, ignoring '{}'", text);
            return None;
        };
        let field = text.split(',').nth(index)?.trim();
        match field.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                error!("failed to convert '{}' to conductivity", field);
                None
            }
        }
    }

    fn simulated_reading(&self) -> String {
        SIMULATED_CONDUCTIVITY.to_string()
    }

    fn compensation(&self) -> Option<&Arc<TemperatureCompensation>> {
        Some(&self.compensation)
    }
}

#[derive(Debug, Clone)]
pub struct AtlasEc {
    inner: TemperatureCompensatedSensor,
    state: Arc<Mutex<EcState>>,
}

impl AtlasEc {
    pub fn new(
        name: impl Into<String>,
        address: u8,
        transport: Arc<dyn Transport>,
        scheduler: &Scheduler,
        config: DriverConfig,
        provider: Option<Arc<dyn TemperatureProvider>>,
    ) -> Self {
        let compensation = Arc::new(TemperatureCompensation::new(provider, COMBINED_READING_SINCE));
        let state = Arc::new(Mutex::new(EcState::default()));
        let model = EcModel {
            compensation: Arc::clone(&compensation),
            state: Arc::clone(&state),
        };
        let sensor = AtlasSensor::new(name, address, transport, scheduler, config, model);
        Self {
            inner: TemperatureCompensatedSensor::new(sensor, compensation),
            state,
        }
    }

    /// Generic init, then select conductivity as the only output and learn
    /// the reading layout before the reading loop starts.
    pub fn init(&self) -> Result<()> {
        self.inner.init_with(true)?;
        let requested = self.state.lock().clone();
        for output in [
            Output::Conductivity,
            Output::Salinity,
            Output::SpecificGravity,
            Output::TotalDissolvedSolids,
        ] {
            self.send_set_output(output, requested.is_enabled(output), false, None)?;
        }
        self.send_get_parameters(false, None)?;
        self.send_get_probe_k(false, None)?;
        self.send_get_tds_conversion_factor(false, None)?;
        self.enqueue_send_get_reading()
    }

    /// Field layout of reading responses, as last reported by `o,?`.
    pub fn reading_layout(&self) -> OutputParameters {
        self.state.lock().layout
    }

    fn send_plain(
        &self,
        text: String,
        response_wait_ms: u32,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let mut command = self.command(text, ResponseBody::Raw, response_wait_ms)?;
        if let Some(callback) = callback {
            command = command.on_complete(callback);
        }
        self.submit(command, synchronous)
    }

    // ── Calibration ───────────────────────────────────────────

    /// `cal,dry`
    pub fn send_calibrate_dry(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        self.send_plain(
            "cal,dry".to_owned(),
            self.timing().calibration_response_wait_ms,
            synchronous,
            callback,
        )
    }

    /// `cal,<ec>`
    pub fn send_calibrate_single(
        &self,
        solution_ec: f64,
        solution_temperature_c: f64,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        self.send_calibration("", solution_ec, solution_temperature_c, synchronous, callback)
    }

    /// `cal,low,<ec>`
    pub fn send_calibrate_low(
        &self,
        solution_ec: f64,
        solution_temperature_c: f64,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        self.send_calibration(",low", solution_ec, solution_temperature_c, synchronous, callback)
    }

    /// `cal,high,<ec>`
    pub fn send_calibrate_high(
        &self,
        solution_ec: f64,
        solution_temperature_c: f64,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        self.send_calibration(",high", solution_ec, solution_temperature_c, synchronous, callback)
    }

    fn send_calibration(
        &self,
        point: &str,
        solution_ec: f64,
        solution_temperature_c: f64,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        if !CALIBRATION_TEMPERATURE_C.contains(&solution_temperature_c) {
            error!(
                "{}: calibration solution at {:.1} C is outside {:?}",
                self.name(),
                solution_temperature_c,
                CALIBRATION_TEMPERATURE_C
            );
            return Err(Error::OutOfRange);
        }
        self.send_plain(
            format!("cal{point},{solution_ec:.1}"),
            self.timing().calibration_response_wait_ms,
            synchronous,
            callback,
        )
    }

    // ── Outputs ───────────────────────────────────────────────

    /// `o,<output>,<0|1>`
    pub fn send_set_output(
        &self,
        output: Output,
        enabled: bool,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        self.state.lock().set(output, enabled);
        self.send_plain(
            format!("o,{},{}", output.code(), u8::from(enabled)),
            self.timing().default_response_wait_ms,
            synchronous,
            callback,
        )
    }

    /// `o,?`.  The driver always records the reported layout before the
    /// callback runs.
    pub fn send_get_parameters(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let layout_state = Arc::clone(&self.state);
        let sim_state = Arc::clone(&self.state);
        let mut command = self
            .command("o,?", ResponseBody::parameters(), self.timing().default_response_wait_ms)?
            .with_prefix("?o,")
            .after_response(move |sensor, command| {
                if let Some(layout) = command.response().parameters().filter(|_| command.response().is_ok()) {
                    debug!("{}: reading layout {:?}", sensor.name(), layout);
                    layout_state.lock().layout = *layout;
                }
            })
            .simulated_by(move |_| success_frame(&sim_state.lock().parameters_text()));
        if let Some(callback) = callback {
            command = command.on_complete(callback);
        }
        self.submit(command, synchronous)
    }

    // ── Probe K / TDS factor ──────────────────────────────────

    fn send_get_double(
        &self,
        text: &'static str,
        prefix: &'static str,
        what: &'static str,
        simulated: f64,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let callback = callback.unwrap_or_else(|| {
            Box::new(move |sensor: &AtlasSensor, response: &Response| {
                if let Some(value) = response.as_double().filter(|_| response.is_ok()) {
                    debug!("{}: {} is {:.3}", sensor.name(), what, value);
                }
            })
        });
        // Echo prefixes come back upper-cased.
        let echo = prefix.to_ascii_uppercase();
        let command = self
            .command(text, ResponseBody::double(), self.timing().default_response_wait_ms)?
            .with_prefix(prefix)
            .on_complete(callback)
            .simulated_by(move |_| success_frame(&format!("{echo}{simulated:.3}")));
        self.submit(command, synchronous)
    }

    /// `k,?`
    pub fn send_get_probe_k(&self, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        let simulated = self.state.lock().probe_k;
        self.send_get_double("k,?", "?k,", "probe K value", simulated, synchronous, callback)
    }

    /// `k,<k>`
    pub fn send_set_probe_k(&self, k: f64, synchronous: bool, callback: Option<CompletionCallback>) -> Result<()> {
        self.state.lock().probe_k = k;
        self.send_plain(
            format!("k,{k:.3}"),
            self.timing().default_response_wait_ms,
            synchronous,
            callback,
        )
    }

    /// `tds,?`
    pub fn send_get_tds_conversion_factor(
        &self,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        let simulated = self.state.lock().tds_factor;
        self.send_get_double(
            "tds,?",
            "?tds,",
            "TDS conversion factor",
            simulated,
            synchronous,
            callback,
        )
    }

    /// `tds,<factor>`
    pub fn send_set_tds_conversion_factor(
        &self,
        factor: f64,
        synchronous: bool,
        callback: Option<CompletionCallback>,
    ) -> Result<()> {
        self.state.lock().tds_factor = factor;
        self.send_plain(
            format!("tds,{factor:.3}"),
            self.timing().default_response_wait_ms,
            synchronous,
            callback,
        )
    }
}

impl Deref for AtlasEc {
    type Target = TemperatureCompensatedSensor;

    fn deref(&self) -> &TemperatureCompensatedSensor {
        &self.inner
    }
}
